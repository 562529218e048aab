// Storage collaborators consumed by the synchronizer.
//
// Both traits describe external systems (device key-value storage and a cloud
// document database). In-memory implementations live in `memory`.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::feed::Feed;

// A document body: a JSON object
pub type Document = Map<String, Value>;

// Snapshot delivered by a document subscription (None when the document does not exist)
pub type DocumentEvent = Result<Option<Document>, StoreError>;

// Snapshot delivered by a query subscription: the full current result set
pub type QueryEvent = Result<Vec<StoredDocument>, StoreError>;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Document,
}

// Field equality filter used by queries and query subscriptions
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, data: &Document) -> bool {
        data.get(&self.field) == Some(&self.value)
    }
}

// On-device key-value storage that survives restarts
#[async_trait]
pub trait LocalStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// Cloud document database with change notification
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get_document(&self, collection: &str, id: &str)
        -> Result<Option<Document>, StoreError>;

    // Replaces the whole document, creating it if needed
    async fn set_document(&self, collection: &str, id: &str, data: Document)
        -> Result<(), StoreError>;

    // Merges top-level fields into an existing document; fails if it does not exist
    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        updates: Document,
    ) -> Result<(), StoreError>;

    // Creates a document with a store-generated id and returns the id
    async fn add_document(&self, collection: &str, data: Document) -> Result<String, StoreError>;

    async fn query_documents(
        &self,
        collection: &str,
        filter: &FieldFilter,
    ) -> Result<Vec<StoredDocument>, StoreError>;

    // The feed delivers the current snapshot first, then one per change
    fn subscribe_document(&self, collection: &str, id: &str)
        -> Result<Feed<DocumentEvent>, StoreError>;

    fn subscribe_query(
        &self,
        collection: &str,
        filter: &FieldFilter,
    ) -> Result<Feed<QueryEvent>, StoreError>;
}
