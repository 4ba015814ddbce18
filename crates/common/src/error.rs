use crate::backup::BackupStorageError;
use crate::crypto::CryptoError;
use crate::directory::DirectoryError;
use crate::key_store::KeyStoreError;

/// Every failure a session operation can surface
///
/// Cryptographic failures (`VerificationFailed`, `DecryptionFailed`,
///  `WrongPassword`) are final. Only `Network` and `Timeout` are worth retrying,
///  and the session never retries on its own.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),
    #[error("identity {0} is already registered")]
    AlreadyRegistered(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    /// More than one current card exists for the identity. Never resolved
    ///  automatically.
    #[error("identity {0} has more than one current card")]
    DuplicateCards(String),
    #[error("backup {0} already exists")]
    BackupAlreadyExists(String),
    #[error("backup {0} not found")]
    BackupNotFound(String),
    #[error("wrong password")]
    WrongPassword,
    #[error("weak password: {0}")]
    WeakPassword(String),
    #[error("sender verification failed")]
    VerificationFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("a private key is already stored on this device")]
    LocalKeyAlreadyPresent,
    /// Another key-mutating operation is in flight on this session
    #[error("session busy")]
    Busy,
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The card could not be published; the local key was rolled back
    #[error("card publish failed: {0}")]
    CardPublishFailed(String),
    /// The operation needs a private key on this device and there is none
    #[error("no private key stored on this device")]
    MissingPrivateKey,
    #[error("operation cancelled")]
    Cancelled,
    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether the caller may reasonably retry the same call
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Network(_) | SessionError::Timeout(_))
    }
}

impl From<DirectoryError> for SessionError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::NotFound(id) => SessionError::UserNotFound(id),
            DirectoryError::Conflict(msg) => SessionError::CardPublishFailed(msg),
            DirectoryError::Unauthorized(msg) => SessionError::NotAuthenticated(msg),
            DirectoryError::Network(msg) => SessionError::Network(msg),
            DirectoryError::Timeout(msg) => SessionError::Timeout(msg),
            DirectoryError::Invalid(msg) => SessionError::InvalidArgument(msg),
        }
    }
}

impl From<BackupStorageError> for SessionError {
    fn from(e: BackupStorageError) -> Self {
        match e {
            BackupStorageError::NotFound(name) => SessionError::BackupNotFound(name),
            BackupStorageError::AlreadyExists(name) => SessionError::BackupAlreadyExists(name),
            BackupStorageError::Unauthorized(msg) => SessionError::NotAuthenticated(msg),
            BackupStorageError::Network(msg) => SessionError::Network(msg),
            BackupStorageError::Timeout(msg) => SessionError::Timeout(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_errors_are_retryable() {
        assert!(SessionError::Network("reset".into()).is_retryable());
        assert!(SessionError::Timeout("30s".into()).is_retryable());
        assert!(!SessionError::WrongPassword.is_retryable());
        assert!(!SessionError::DuplicateCards("alice".into()).is_retryable());
        assert!(!SessionError::Busy.is_retryable());
    }

    #[test]
    fn test_collaborator_errors_keep_their_kind() {
        assert!(matches!(
            SessionError::from(DirectoryError::Timeout("search".into())),
            SessionError::Timeout(_)
        ));
        assert!(matches!(
            SessionError::from(DirectoryError::Network("reset".into())),
            SessionError::Network(_)
        ));
        assert!(matches!(
            SessionError::from(BackupStorageError::NotFound("default".into())),
            SessionError::BackupNotFound(_)
        ));
    }
}
