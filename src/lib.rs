// Session state synchronizer for the hotel booking app

// Session-scoped state and its reconciliation across local and remote storage
pub mod sync;

// Domain types
pub mod booking;
pub mod cart;
pub mod currency;

// Collaborators and their plumbing
pub mod auth;
pub mod feed;
pub mod memory;
pub mod search;
pub mod store;

pub mod config;
pub mod error;

// Re-export key types for convenience
pub use auth::{AuthProvider, AuthUser, ProfileUpdate, Registration, Session, SignIn};
pub use booking::{Booking, BookingDraft, BookingStatus, Review, ReviewDraft};
pub use cart::{Cart, CartLine, Product};
pub use config::{SearchConfig, SyncConfig};
pub use currency::Currency;
pub use error::{AuthError, StoreError, SyncError};
pub use feed::{Feed, FeedHandle, FeedKind, Listeners, Unsubscribe};
pub use memory::{MemoryAuthProvider, MemoryDocumentStore, MemoryLocalStore};
pub use search::{
    parse_search_response, sort_listings, HotelListing, HotelSearch, RapidApiHotelSearch,
    SearchError, SearchQuery, SortOrder,
};
pub use store::{Document, DocumentStore, FieldFilter, LocalStore, StoredDocument};
pub use sync::{IdentityState, SessionSynchronizer};
