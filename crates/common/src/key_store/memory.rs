use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{KeyStore, KeyStoreError};
use crate::crypto::SecretKey;

/// Process-local key store
///
/// Clones share the same slots, which is how tests model "the same device".
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    inner: Arc<RwLock<HashMap<String, SecretKey>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn has(&self, identity: &str) -> Result<bool, KeyStoreError> {
        Ok(self.inner.read().contains_key(identity))
    }

    async fn load(&self, identity: &str) -> Result<SecretKey, KeyStoreError> {
        self.inner
            .read()
            .get(identity)
            .cloned()
            .ok_or_else(|| KeyStoreError::NotFound(identity.to_string()))
    }

    async fn store(&self, identity: &str, key: &SecretKey) -> Result<(), KeyStoreError> {
        self.inner.write().insert(identity.to_string(), key.clone());
        Ok(())
    }

    async fn delete(&self, identity: &str) -> Result<(), KeyStoreError> {
        self.inner.write().remove(identity);
        Ok(())
    }
}
