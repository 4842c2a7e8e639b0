//! Registration and credential checks for unauthenticated connections.

use thiserror::Error;
use tracing::{debug, warn};

use netchat_shared::crypto::{hash_password, verify_password};
use netchat_shared::{Envelope, ProtocolError, Username, UsernameError};
use netchat_store::StoreError;

use crate::cache::CredentialCache;
use crate::error::ServerError;
use crate::notice;
use crate::storage::Storage;

/// Why a register or login request was refused. Each variant maps to the
/// text the client is shown.
#[derive(Debug, Error)]
pub enum AuthRejection {
    #[error("malformed credentials: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    #[error("registration is closed")]
    RegistrationClosed,

    #[error("username already exists")]
    UsernameTaken,

    #[error("unknown username")]
    UnknownUser,

    #[error("wrong password")]
    WrongPassword,

    #[error("registration failed")]
    RegistrationUnavailable,

    #[error("login failed")]
    LoginUnavailable,
}

impl AuthRejection {
    pub fn client_message(&self) -> String {
        match self {
            AuthRejection::Malformed(_) => notice::MALFORMED_CREDENTIALS.to_string(),
            AuthRejection::InvalidUsername(e) => notice::invalid_username(e),
            AuthRejection::RegistrationClosed => notice::REGISTRATION_CLOSED.to_string(),
            AuthRejection::UsernameTaken => notice::USERNAME_TAKEN.to_string(),
            AuthRejection::UnknownUser => notice::UNKNOWN_USERNAME.to_string(),
            AuthRejection::WrongPassword => notice::WRONG_PASSWORD.to_string(),
            AuthRejection::RegistrationUnavailable => notice::REGISTRATION_FAILED.to_string(),
            AuthRejection::LoginUnavailable => notice::LOGIN_FAILED.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Authenticator {
    storage: Storage,
    cache: CredentialCache,
    registration_open: bool,
}

impl Authenticator {
    pub fn new(storage: Storage, cache: CredentialCache, registration_open: bool) -> Self {
        Self {
            storage,
            cache,
            registration_open,
        }
    }

    /// Create an account from a `username/password` payload.
    pub async fn register(&self, envelope: &Envelope) -> Result<Username, AuthRejection> {
        if !self.registration_open {
            return Err(AuthRejection::RegistrationClosed);
        }
        let (raw_name, password) = envelope.credentials()?;
        let username = Username::parse(raw_name)?;
        let record = hash_password(password).map_err(|e| {
            warn!(error = %e, "Password hashing failed");
            AuthRejection::RegistrationUnavailable
        })?;

        match self
            .storage
            .with(|db| db.insert_user(username.as_str(), &record))
        {
            Ok(()) => {
                debug!(user = %username, "Registered");
                // Drop anything cached for a previous holder of the name.
                self.cache.invalidate(username.as_str()).await;
                Ok(username)
            }
            Err(ServerError::Store(StoreError::DuplicateUsername(_))) => {
                Err(AuthRejection::UsernameTaken)
            }
            Err(e) => {
                warn!(user = %username, error = %e, "Registration failed");
                Err(AuthRejection::RegistrationUnavailable)
            }
        }
    }

    /// Check a `username/password` payload against the cache, falling back
    /// to the credential table on a miss.
    pub async fn login(&self, envelope: &Envelope) -> Result<Username, AuthRejection> {
        let (raw_name, password) = envelope.credentials()?;
        // Names that could never have been registered are simply unknown.
        let username = Username::parse(raw_name).map_err(|_| AuthRejection::UnknownUser)?;

        let record = match self.cache.get(username.as_str()).await {
            Some(record) => record,
            None => {
                let record = match self
                    .storage
                    .with(|db| db.lookup_password_hash(username.as_str()))
                {
                    Ok(record) => record,
                    Err(ServerError::Store(StoreError::NotFound)) => {
                        return Err(AuthRejection::UnknownUser)
                    }
                    Err(e) => {
                        warn!(user = %username, error = %e, "Credential lookup failed");
                        return Err(AuthRejection::LoginUnavailable);
                    }
                };
                self.cache.insert(username.as_str(), &record).await;
                record
            }
        };

        match verify_password(password, &record) {
            Ok(true) => Ok(username),
            Ok(false) => Err(AuthRejection::WrongPassword),
            Err(e) => {
                warn!(user = %username, error = %e, "Stored password record unusable");
                self.cache.invalidate(username.as_str()).await;
                Err(AuthRejection::LoginUnavailable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use netchat_shared::MessageKind;

    fn authenticator(registration_open: bool) -> Authenticator {
        Authenticator::new(
            Storage::in_memory().unwrap(),
            CredentialCache::new(Duration::from_secs(60)),
            registration_open,
        )
    }

    fn register(creds: &str) -> Envelope {
        Envelope::system(MessageKind::Register, creds)
    }

    fn login(creds: &str) -> Envelope {
        Envelope::system(MessageKind::Login, creds)
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let auth = authenticator(true);
        let name = auth.register(&register("alice/secret")).await.unwrap();
        assert_eq!(name.as_str(), "alice");

        let name = auth.login(&login("alice/secret")).await.unwrap();
        assert_eq!(name.as_str(), "alice");
        // The lookup populated the cache.
        assert!(auth.cache.get("alice").await.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let auth = authenticator(true);
        auth.register(&register("alice/secret")).await.unwrap();
        let err = auth.register(&register("alice/other")).await.unwrap_err();
        assert!(matches!(err, AuthRejection::UsernameTaken));
        assert_eq!(err.client_message(), "username already exists");
    }

    #[tokio::test]
    async fn test_login_rejections_are_distinct() {
        let auth = authenticator(true);
        auth.register(&register("alice/secret")).await.unwrap();

        let unknown = auth.login(&login("bob/secret")).await.unwrap_err();
        assert_eq!(unknown.client_message(), "unknown username, please register");

        let wrong = auth.login(&login("alice/nope")).await.unwrap_err();
        assert_eq!(wrong.client_message(), "wrong password");

        // A cached record still rejects a wrong password.
        auth.login(&login("alice/secret")).await.unwrap();
        let wrong = auth.login(&login("alice/nope")).await.unwrap_err();
        assert!(matches!(wrong, AuthRejection::WrongPassword));
    }

    #[tokio::test]
    async fn test_payload_validation() {
        let auth = authenticator(true);
        assert!(matches!(
            auth.register(&register("no-separator")).await,
            Err(AuthRejection::Malformed(_))
        ));
        assert!(matches!(
            auth.register(&register("bad:name/pw")).await,
            Err(AuthRejection::InvalidUsername(UsernameError::InvalidCharacter(':')))
        ));
        assert!(matches!(
            auth.login(&login("alice/")).await,
            Err(AuthRejection::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_registration_closed() {
        let auth = authenticator(false);
        let err = auth.register(&register("alice/secret")).await.unwrap_err();
        assert_eq!(err.client_message(), "registration is closed");
    }
}
