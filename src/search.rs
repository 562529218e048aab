// Hotel search client for the explore screen.
//
// The search backend is a booking-style `stays/search` endpoint behind an API
// gateway that authenticates with key/host headers. Responses are reduced to
// HotelListing values; parsing is separate from transport so it can be tested
// without a network.

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SearchConfig;

const SEARCH_PATH: &str = "/stays/search";
const DEFAULT_CITY: &str = "mumbai";
const DEFAULT_DEST_ID: &str = "-2092174";

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("API error: {status_code} - {message}")]
    ApiResponseError { status_code: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub city: String,
    pub dest_id: String,
    pub arrival: NaiveDate,
    pub departure: NaiveDate,
}

impl SearchQuery {
    // One night starting today
    pub fn new(city: impl Into<String>, dest_id: impl Into<String>) -> Self {
        let arrival = Utc::now().date_naive();
        let departure = arrival.checked_add_days(Days::new(1)).unwrap_or(arrival);
        Self {
            city: city.into(),
            dest_id: dest_id.into(),
            arrival,
            departure,
        }
    }

    pub fn with_dates(mut self, arrival: NaiveDate, departure: NaiveDate) -> Self {
        self.arrival = arrival;
        self.departure = departure;
        self
    }
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self::new(DEFAULT_CITY, DEFAULT_DEST_ID)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelListing {
    pub id: String,
    pub name: String,
    pub location: String,
    pub price: Option<f64>,
    pub rating: Option<f64>,
    pub image: Option<String>,
    pub review_count: u32,
    pub review_score_word: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Price,
    Rating,
}

#[async_trait]
pub trait HotelSearch: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<HotelListing>, SearchError>;
}

pub struct RapidApiHotelSearch {
    client: reqwest::Client,
    config: SearchConfig,
}

impl RapidApiHotelSearch {
    pub fn new(config: SearchConfig) -> Result<Self, SearchError> {
        if config.api_key.trim().is_empty() {
            return Err(SearchError::ConfigError("API key is required".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SearchError::ConfigError(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn request_params(&self, query: &SearchQuery) -> Vec<(&'static str, String)> {
        vec![
            ("dest_id", query.dest_id.clone()),
            ("search_type", "CITY".to_string()),
            ("arrival_date", query.arrival.format("%Y-%m-%d").to_string()),
            ("departure_date", query.departure.format("%Y-%m-%d").to_string()),
            ("adults", "1".to_string()),
            ("room_qty", "1".to_string()),
            ("page_number", "1".to_string()),
            ("units", "metric".to_string()),
            ("temperature_unit", "c".to_string()),
            ("languagecode", self.config.language_code.clone()),
            ("currency_code", self.config.currency_code.clone()),
        ]
    }

    fn classify(&self, error: reqwest::Error) -> SearchError {
        if error.is_timeout() {
            SearchError::Timeout(self.config.timeout_ms)
        } else {
            SearchError::NetworkError(error.to_string())
        }
    }
}

#[async_trait]
impl HotelSearch for RapidApiHotelSearch {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<HotelListing>, SearchError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), SEARCH_PATH);
        debug!(city = %query.city, dest_id = %query.dest_id, "Searching hotels");

        let response = self
            .client
            .get(&url)
            .query(&self.request_params(query))
            .header("X-RapidAPI-Key", &self.config.api_key)
            .header("X-RapidAPI-Host", &self.config.api_host)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Hotel search rejected");
            return Err(SearchError::ApiResponseError {
                status_code: status.as_u16(),
                message,
            });
        }

        let body: Value = response.json().await.map_err(|e| self.classify(e))?;
        parse_search_response(&body, &query.city, self.config.max_results)
    }
}

// Keeps at most `max_results` hotels from a search response body
pub fn parse_search_response(
    body: &Value,
    city: &str,
    max_results: usize,
) -> Result<Vec<HotelListing>, SearchError> {
    if body.get("status").and_then(Value::as_bool) != Some(true) {
        return Err(SearchError::InvalidResponse("search status is not true".to_string()));
    }
    let hotels = body
        .pointer("/data/hotels")
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::InvalidResponse("missing data.hotels".to_string()))?;

    Ok(hotels
        .iter()
        .filter_map(|hotel| parse_hotel(hotel, city))
        .take(max_results)
        .collect())
}

fn parse_hotel(hotel: &Value, city: &str) -> Option<HotelListing> {
    let id = match hotel.get("id")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let text = |pointer: &str| {
        hotel
            .pointer(pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Some(HotelListing {
        id,
        name: text("/name").unwrap_or_default(),
        location: text("/wishlistName").unwrap_or_else(|| city.to_string()),
        price: hotel
            .pointer("/priceBreakdown/grossPrice/value")
            .and_then(Value::as_f64),
        rating: hotel
            .pointer("/property/reviewScore")
            .and_then(Value::as_f64)
            .filter(|score| *score > 0.0),
        image: text("/photoUrls/0"),
        review_count: hotel
            .pointer("/property/reviewCount")
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0),
        review_score_word: text("/property/reviewScoreWord").unwrap_or_default(),
        latitude: hotel.get("latitude").and_then(Value::as_f64),
        longitude: hotel.get("longitude").and_then(Value::as_f64),
    })
}

// Price ascending or rating descending; listings missing the key sort last
pub fn sort_listings(listings: &mut [HotelListing], order: SortOrder) {
    listings.sort_by(|a, b| match order {
        SortOrder::Price => compare_known(a.price, b.price, |x, y| x.total_cmp(&y)),
        SortOrder::Rating => compare_known(a.rating, b.rating, |x, y| y.total_cmp(&x)),
    });
}

fn compare_known(a: Option<f64>, b: Option<f64>, cmp: impl Fn(f64, f64) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => cmp(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
