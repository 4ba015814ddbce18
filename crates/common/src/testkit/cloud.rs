use crate::backup::MemoryBackupStorage;
use crate::config::SessionConfig;
use crate::crypto::KdfParams;
use crate::directory::MemoryDirectory;
use crate::error::SessionError;
use crate::key_store::MemoryKeyStore;
use crate::session::{Session, SessionBuilder};
use crate::token::AccessToken;

/// Config with the cheapest KDF argon2 accepts and short deadlines
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        request_timeout_ms: 2_000,
        kdf: KdfParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
        ..SessionConfig::default()
    }
}

/// A directory and backup storage shared by every device created from it
#[derive(Debug, Clone, Default)]
pub struct TestCloud {
    pub directory: MemoryDirectory,
    pub backups: MemoryBackupStorage,
}

impl TestCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh device for `identity` with an empty key store
    pub async fn device(&self, identity: &str) -> Result<Session, SessionError> {
        self.device_with_store(identity, MemoryKeyStore::new()).await
    }

    /// A device for `identity` using `key_store`
    ///
    /// Passing a clone of another device's store models an app restart.
    pub async fn device_with_store(
        &self,
        identity: &str,
        key_store: MemoryKeyStore,
    ) -> Result<Session, SessionError> {
        self.device_with_config(identity, key_store, fast_config())
            .await
    }

    pub async fn device_with_config(
        &self,
        identity: &str,
        key_store: MemoryKeyStore,
        config: SessionConfig,
    ) -> Result<Session, SessionError> {
        let identity = identity.to_string();
        tracing::debug!(identity = %identity, "creating test device");

        SessionBuilder::new()
            .token_provider(move || -> anyhow::Result<AccessToken> {
                Ok(AccessToken::new(identity.clone(), "test-token"))
            })
            .directory(self.directory.clone())
            .backups(self.backups.clone())
            .key_store(key_store)
            .config(config)
            .bootstrap()
            .await
    }
}
