// Authentication collaborator, the session it produces and credential checks

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, SyncError};
use crate::feed::Feed;

pub const MIN_PASSWORD_LEN: usize = 6;

// Identity as reported by the authentication provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

// The identity the synchronizer is currently scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl From<AuthUser> for Session {
    fn from(user: AuthUser) -> Self {
        Self {
            uid: user.uid,
            display_name: user.display_name,
            email: user.email,
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    // Delivers the current identity first (None when signed out), then every change
    fn on_session_change(&self) -> Feed<Option<AuthUser>>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignIn {
    pub email: String,
    pub password: String,
}

impl SignIn {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.email.trim().is_empty() {
            return Err(SyncError::ValidationFailure("email is required".to_string()));
        }
        if self.password.is_empty() {
            return Err(SyncError::ValidationFailure("password is required".to_string()));
        }
        validate_email(&self.email)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.name.trim().is_empty() {
            return Err(SyncError::ValidationFailure("name is required".to_string()));
        }
        if self.email.trim().is_empty() {
            return Err(SyncError::ValidationFailure("email is required".to_string()));
        }
        if self.password.is_empty() {
            return Err(SyncError::ValidationFailure("password is required".to_string()));
        }
        if self.confirm_password.is_empty() {
            return Err(SyncError::ValidationFailure(
                "password confirmation is required".to_string(),
            ));
        }
        validate_email(&self.email)?;
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SyncError::ValidationFailure(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if self.password != self.confirm_password {
            return Err(SyncError::ValidationFailure("passwords do not match".to_string()));
        }
        Ok(())
    }
}

// Fields the profile screen can change; None leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.email.is_none()
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if let Some(name) = &self.display_name {
            if name.trim().is_empty() {
                return Err(SyncError::ValidationFailure("name must not be blank".to_string()));
            }
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        Ok(())
    }
}

pub(crate) fn validate_email(email: &str) -> Result<(), SyncError> {
    if !email.contains('@') {
        return Err(SyncError::ValidationFailure(format!(
            "invalid email address: {}",
            email
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn registration(password: &str, confirm: &str) -> Registration {
        Registration {
            name: "Thandi".to_string(),
            email: "thandi@example.com".to_string(),
            password: password.to_string(),
            confirm_password: confirm.to_string(),
        }
    }

    #[test_case("a@b.com", "secret", true ; "valid")]
    #[test_case("", "secret", false ; "missing email")]
    #[test_case("a@b.com", "", false ; "missing password")]
    #[test_case("ab.com", "secret", false ; "email without at sign")]
    fn test_sign_in_validation(email: &str, password: &str, ok: bool) {
        let sign_in = SignIn {
            email: email.to_string(),
            password: password.to_string(),
        };
        assert_eq!(sign_in.validate().is_ok(), ok);
    }

    #[test]
    fn test_registration_accepts_matching_passwords() {
        assert!(registration("hunter22", "hunter22").validate().is_ok());
    }

    #[test]
    fn test_registration_rejects_short_password() {
        let err = registration("abc", "abc").validate().unwrap_err();
        assert_eq!(
            err,
            SyncError::ValidationFailure("password must be at least 6 characters".to_string())
        );
    }

    #[test]
    fn test_registration_rejects_mismatch() {
        let err = registration("hunter22", "hunter23").validate().unwrap_err();
        assert_eq!(err, SyncError::ValidationFailure("passwords do not match".to_string()));
    }

    #[test]
    fn test_profile_update_validation() {
        let blank = ProfileUpdate {
            display_name: Some("  ".to_string()),
            email: None,
        };
        assert!(blank.validate().is_err());
        assert!(ProfileUpdate::default().is_empty());

        let ok = ProfileUpdate {
            display_name: Some("Sam".to_string()),
            email: Some("sam@example.com".to_string()),
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_session_from_auth_user() {
        let session: Session = AuthUser {
            uid: "u1".to_string(),
            display_name: Some("Sam".to_string()),
            email: None,
        }
        .into();
        assert_eq!(session.uid, "u1");
        assert_eq!(session.display_name.as_deref(), Some("Sam"));
    }
}
