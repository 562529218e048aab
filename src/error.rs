// Error types shared by the synchronizer and its collaborators

use thiserror::Error;

// Errors reported at the synchronizer boundary. Storage variants are logged and
// absorbed by the cart/feed paths; only user-initiated auth actions return them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Local storage failure: {0}")]
    LocalStorageFailure(String),

    #[error("Remote read failure: {0}")]
    RemoteReadFailure(String),

    #[error("Remote write failure: {0}")]
    RemoteWriteFailure(String),

    #[error("Remote subscription failure: {0}")]
    RemoteSubscriptionFailure(String),

    #[error("Validation failure: {0}")]
    ValidationFailure(String),

    #[error("Authentication failure: {0}")]
    AuthFailure(String),

    #[error("No authenticated session")]
    NotAuthenticated,

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationError(err.to_string())
    }
}

impl From<AuthError> for SyncError {
    fn from(err: AuthError) -> Self {
        SyncError::AuthFailure(err.to_string())
    }
}

// Errors returned by local and remote store implementations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

// Errors returned by an authentication provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_converts_to_sync_error() {
        let err: SyncError = AuthError::InvalidCredentials.into();
        assert_eq!(
            err,
            SyncError::AuthFailure("Invalid credentials".to_string())
        );
    }

    #[test]
    fn test_json_error_converts_to_sync_error() {
        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: SyncError = json_err.into();
        assert!(matches!(err, SyncError::SerializationError(_)));
    }

    #[test]
    fn test_not_found_message() {
        let err = StoreError::NotFound {
            collection: "users".to_string(),
            id: "u1".to_string(),
        };
        assert_eq!(err.to_string(), "Document not found: users/u1");
    }
}
