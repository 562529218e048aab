// Display currencies the user can pick from. Selection is in-memory only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    ZAR,
    USD,
    EUR,
    GBP,
    JPY,
}

impl Currency {
    pub const ALL: [Currency; 5] = [
        Currency::ZAR,
        Currency::USD,
        Currency::EUR,
        Currency::GBP,
        Currency::JPY,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::ZAR => "ZAR",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::JPY => "JPY",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Currency::ZAR => "South African Rand",
            Currency::USD => "US Dollar",
            Currency::EUR => "Euro",
            Currency::GBP => "British Pound",
            Currency::JPY => "Japanese Yen",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::ZAR => "R",
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::JPY => "¥",
        }
    }

    pub fn format_amount(&self, amount: f64) -> String {
        match self {
            Currency::JPY => format!("{}{:.0}", self.symbol(), amount),
            _ => format!("{}{:.2}", self.symbol(), amount),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SyncError::ValidationFailure(format!("unsupported currency: {}", s)))
    }
}
