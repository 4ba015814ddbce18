use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};

use crate::crypto::KdfParams;
use crate::token::AccessToken;

/// Backup entry format version written by this crate
pub const BACKUP_SCHEME_VERSION: u32 = 1;
/// Key name used when the caller does not pick one
pub const DEFAULT_KEY_NAME: &str = "default";
/// Size of the per-entry KDF salt
pub const BACKUP_SALT_SIZE: usize = 16;

/// A password-wrapped private key, stored remotely under `(identity, key_name)`
///
/// `wrapped_key` is `nonce || ciphertext || tag`. The entry carries the salt
///  and cost parameters it was wrapped under, so restoring never depends on
///  the current defaults.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub identity: String,
    pub key_name: String,
    #[serde_as(as = "Hex")]
    pub wrapped_key: Vec<u8>,
    #[serde_as(as = "Hex")]
    pub salt: Vec<u8>,
    pub kdf_params: KdfParams,
    pub scheme_version: u32,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackupStorageError {
    #[error("backup not found: {0}")]
    NotFound(String),
    #[error("backup already exists: {0}")]
    AlreadyExists(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("backup storage timed out: {0}")]
    Timeout(String),
}

/// Remote storage of backup entries
///
/// Entries are scoped to the identity the token was issued to; a token never
///  reaches another identity's entries.
#[async_trait]
pub trait BackupStorage: Send + Sync + std::fmt::Debug {
    async fn exists(&self, token: &AccessToken, key_name: &str)
        -> Result<bool, BackupStorageError>;

    /// # Returns
    /// * `Err(BackupStorageError::NotFound)` - no entry under `key_name`
    async fn fetch(
        &self,
        token: &AccessToken,
        key_name: &str,
    ) -> Result<BackupEntry, BackupStorageError>;

    /// Store a new entry
    ///
    /// Must fail with `Err(BackupStorageError::AlreadyExists)` rather than overwrite.
    async fn create(&self, token: &AccessToken, entry: BackupEntry)
        -> Result<(), BackupStorageError>;

    /// Atomically swap an existing entry for `entry`
    ///
    /// Must fail with `Err(BackupStorageError::NotFound)` if there is nothing to replace.
    async fn replace(
        &self,
        token: &AccessToken,
        entry: BackupEntry,
    ) -> Result<(), BackupStorageError>;

    /// Delete one entry, returning whether it existed
    async fn delete(&self, token: &AccessToken, key_name: &str)
        -> Result<bool, BackupStorageError>;

    /// Delete every entry of the token's identity, returning how many there were
    async fn delete_all(&self, token: &AccessToken) -> Result<usize, BackupStorageError>;

    /// Key names with an entry, sorted
    async fn list(&self, token: &AccessToken) -> Result<Vec<String>, BackupStorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_json_uses_hex() {
        let entry = BackupEntry {
            identity: "alice".into(),
            key_name: DEFAULT_KEY_NAME.into(),
            wrapped_key: vec![0xde, 0xad],
            salt: vec![0xbe, 0xef],
            kdf_params: KdfParams::default(),
            scheme_version: BACKUP_SCHEME_VERSION,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["wrapped_key"], "dead");
        assert_eq!(json["salt"], "beef");
        assert_eq!(json["kdf_params"]["memory_kib"], 19456);

        let decoded: BackupEntry = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, entry);
    }
}
