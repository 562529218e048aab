// Bookings and reviews: drafts built by the caller, records read back from the document store

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::store::{Document, StoredDocument};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    #[default]
    Confirmed,
}

// What the booking screen collects before confirming
#[derive(Debug, Clone, PartialEq)]
pub struct BookingDraft {
    pub hotel_id: String,
    pub hotel_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub rooms: u32,
    pub price_per_night: f64,
}

impl BookingDraft {
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.hotel_id.trim().is_empty() {
            return Err(SyncError::ValidationFailure("hotel id is required".to_string()));
        }
        if self.nights() <= 0 {
            return Err(SyncError::ValidationFailure(
                "check-out date must be after check-in date".to_string(),
            ));
        }
        if self.rooms == 0 {
            return Err(SyncError::ValidationFailure("at least one room is required".to_string()));
        }
        if !self.price_per_night.is_finite() || self.price_per_night < 0.0 {
            return Err(SyncError::ValidationFailure(format!(
                "invalid nightly price: {}",
                self.price_per_night
            )));
        }
        Ok(())
    }

    // price per night x rooms x nights, with at least one night charged
    pub fn total_price(&self) -> f64 {
        self.price_per_night * self.rooms as f64 * self.nights().max(1) as f64
    }

    pub(crate) fn into_booking(self, user_id: &str, created_at: DateTime<Utc>) -> Booking {
        let total_price = self.total_price();
        Booking {
            id: String::new(),
            hotel_id: self.hotel_id,
            hotel_name: self.hotel_name,
            check_in: self.check_in,
            check_out: self.check_out,
            rooms: self.rooms,
            total_price,
            status: BookingStatus::Confirmed,
            user_id: user_id.to_string(),
            created_at: Some(created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub hotel_id: String,
    #[serde(default)]
    pub hotel_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub rooms: u32,
    pub total_price: f64,
    #[serde(default)]
    pub status: BookingStatus,
    pub user_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn from_stored(stored: StoredDocument) -> Result<Self, SyncError> {
        let mut booking: Booking = serde_json::from_value(serde_json::Value::Object(stored.data))?;
        booking.id = stored.id;
        Ok(booking)
    }

    pub fn to_document(&self) -> Result<Document, SyncError> {
        to_document(self)
    }
}

// What the review form collects
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewDraft {
    pub text: String,
    pub rating: i32,
}

impl ReviewDraft {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.text.trim().is_empty() {
            return Err(SyncError::ValidationFailure("review text is required".to_string()));
        }
        Ok(())
    }

    // Out-of-range ratings are clamped rather than rejected
    pub fn clamped_rating(&self) -> u8 {
        self.rating.clamp(MIN_RATING as i32, MAX_RATING as i32) as u8
    }

    pub(crate) fn into_review(
        self,
        hotel_id: &str,
        user_id: &str,
        user_name: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Review {
        let rating = self.clamped_rating();
        Review {
            id: String::new(),
            hotel_id: hotel_id.to_string(),
            text: self.text.trim().to_string(),
            rating,
            user_id: user_id.to_string(),
            user_name: user_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or("Anonymous")
                .to_string(),
            created_at: Some(created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub hotel_id: String,
    pub text: String,
    pub rating: u8,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Review {
    pub fn from_stored(stored: StoredDocument) -> Result<Self, SyncError> {
        let mut review: Review = serde_json::from_value(serde_json::Value::Object(stored.data))?;
        if !(MIN_RATING..=MAX_RATING).contains(&review.rating) {
            return Err(SyncError::ValidationFailure(format!(
                "review {} has rating {}",
                stored.id, review.rating
            )));
        }
        review.id = stored.id;
        Ok(review)
    }

    pub fn to_document(&self) -> Result<Document, SyncError> {
        to_document(self)
    }
}

pub(crate) fn to_document<T: Serialize>(value: &T) -> Result<Document, SyncError> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(SyncError::SerializationError(format!(
            "expected an object, got {}",
            other
        ))),
    }
}
