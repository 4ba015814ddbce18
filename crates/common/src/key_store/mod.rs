//! Local persistence of an identity's private key
//!
//! The key store is the only place private key bytes live on a device. It never
//! talks to the network.

mod fs;
mod memory;

use async_trait::async_trait;

use crate::crypto::SecretKey;

pub use fs::FsKeyStore;
pub use memory::MemoryKeyStore;

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("no private key stored for {0}")]
    NotFound(String),
    #[error("key store io error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes exist but do not decode to a key
    #[error("invalid stored key: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait KeyStore: Send + Sync + std::fmt::Debug {
    async fn has(&self, identity: &str) -> Result<bool, KeyStoreError>;

    /// # Returns
    /// * `Err(KeyStoreError::NotFound)` - nothing is stored for `identity`
    async fn load(&self, identity: &str) -> Result<SecretKey, KeyStoreError>;

    /// Store `key`, replacing any key stored for `identity`
    ///
    /// Readers observe either the previous key or the new one, never a partial write.
    async fn store(&self, identity: &str, key: &SecretKey) -> Result<(), KeyStoreError>;

    /// Remove the key; removing a missing key is not an error
    async fn delete(&self, identity: &str) -> Result<(), KeyStoreError>;
}
