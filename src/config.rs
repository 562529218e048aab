// Configuration for the session synchronizer and the hotel search client

use serde::Deserialize;
use std::time::Duration;

use crate::error::SyncError;

// Synchronizer configuration: storage keys, collection names and timeouts
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    // Local store key holding the JSON-encoded cart
    pub cart_key: String,
    // Local store key holding the onboarding flag ("true" once completed)
    pub onboarding_key: String,
    pub carts_collection: String,
    pub bookings_collection: String,
    pub reviews_collection: String,
    pub users_collection: String,
    // Field linking bookings and reviews to their author
    pub owner_field: String,
    // Upper bound on the local-cart reload performed during an identity change
    pub transition_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cart_key: "@hotel_cart".to_string(),
            onboarding_key: "@onboarding_completed".to_string(),
            carts_collection: "carts".to_string(),
            bookings_collection: "bookings".to_string(),
            reviews_collection: "reviews".to_string(),
            users_collection: "users".to_string(),
            owner_field: "userId".to_string(),
            transition_timeout_ms: 5000,
        }
    }
}

impl SyncConfig {
    pub fn from_json(raw: &str) -> Result<Self, SyncError> {
        let config: SyncConfig = serde_json::from_str(raw)?;
        if config.cart_key.is_empty() || config.onboarding_key.is_empty() {
            return Err(SyncError::ValidationFailure(
                "local store keys must not be empty".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }
}

// Hotel search client configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_host: String,
    pub max_results: usize,
    pub currency_code: String,
    pub language_code: String,
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://booking-com18.p.rapidapi.com".to_string(),
            api_key: String::new(),
            api_host: "booking-com18.p.rapidapi.com".to_string(),
            max_results: 10,
            currency_code: "INR".to_string(),
            language_code: "en-us".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl SearchConfig {
    pub fn from_json(raw: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(raw)?)
    }
}
