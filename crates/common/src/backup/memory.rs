use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::storage::{BackupEntry, BackupStorage, BackupStorageError};
use crate::token::AccessToken;

/// Backup operations that can have a failure injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupOp {
    Exists,
    Fetch,
    Create,
    Replace,
    Delete,
    List,
}

/// In-memory backup storage shared by every clone
#[derive(Debug, Clone, Default)]
pub struct MemoryBackupStorage {
    inner: Arc<RwLock<MemoryBackupStorageInner>>,
}

#[derive(Debug, Default)]
struct MemoryBackupStorageInner {
    /// identity -> key name -> entry
    entries: HashMap<String, BTreeMap<String, BackupEntry>>,
    faults: HashMap<BackupOp, BackupStorageError>,
    latency: Option<Duration>,
}

impl MemoryBackupStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner.write().latency = latency;
    }

    /// Fail the next call of `op` with `error`
    pub fn fail_next(&self, op: BackupOp, error: BackupStorageError) {
        self.inner.write().faults.insert(op, error);
    }

    /// Read an entry directly, without a token
    pub fn entry(&self, identity: &str, key_name: &str) -> Option<BackupEntry> {
        self.inner
            .read()
            .entries
            .get(identity)
            .and_then(|entries| entries.get(key_name))
            .cloned()
    }

    /// Overwrite an entry directly, without a token
    pub fn put_unchecked(&self, entry: BackupEntry) {
        self.inner
            .write()
            .entries
            .entry(entry.identity.clone())
            .or_default()
            .insert(entry.key_name.clone(), entry);
    }

    async fn enter(&self, op: BackupOp, token: &AccessToken) -> Result<(), BackupStorageError> {
        let latency = self.inner.read().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.inner.write().faults.remove(&op) {
            return Err(error);
        }
        if token.is_empty() {
            return Err(BackupStorageError::Unauthorized("empty access token".into()));
        }
        Ok(())
    }
}

fn check_owner(token: &AccessToken, entry: &BackupEntry) -> Result<(), BackupStorageError> {
    if entry.identity != token.identity() {
        return Err(BackupStorageError::Unauthorized(format!(
            "token for {} cannot write a backup of {}",
            token.identity(),
            entry.identity
        )));
    }
    Ok(())
}

#[async_trait]
impl BackupStorage for MemoryBackupStorage {
    async fn exists(
        &self,
        token: &AccessToken,
        key_name: &str,
    ) -> Result<bool, BackupStorageError> {
        self.enter(BackupOp::Exists, token).await?;
        Ok(self.entry(token.identity(), key_name).is_some())
    }

    async fn fetch(
        &self,
        token: &AccessToken,
        key_name: &str,
    ) -> Result<BackupEntry, BackupStorageError> {
        self.enter(BackupOp::Fetch, token).await?;
        self.entry(token.identity(), key_name)
            .ok_or_else(|| BackupStorageError::NotFound(key_name.to_string()))
    }

    async fn create(
        &self,
        token: &AccessToken,
        entry: BackupEntry,
    ) -> Result<(), BackupStorageError> {
        self.enter(BackupOp::Create, token).await?;
        check_owner(token, &entry)?;

        let mut inner = self.inner.write();
        let entries = inner.entries.entry(entry.identity.clone()).or_default();
        if entries.contains_key(&entry.key_name) {
            return Err(BackupStorageError::AlreadyExists(entry.key_name));
        }
        entries.insert(entry.key_name.clone(), entry);
        Ok(())
    }

    async fn replace(
        &self,
        token: &AccessToken,
        entry: BackupEntry,
    ) -> Result<(), BackupStorageError> {
        self.enter(BackupOp::Replace, token).await?;
        check_owner(token, &entry)?;

        let mut inner = self.inner.write();
        match inner
            .entries
            .get_mut(&entry.identity)
            .and_then(|entries| entries.get_mut(&entry.key_name))
        {
            Some(slot) => {
                *slot = entry;
                Ok(())
            }
            None => Err(BackupStorageError::NotFound(entry.key_name)),
        }
    }

    async fn delete(
        &self,
        token: &AccessToken,
        key_name: &str,
    ) -> Result<bool, BackupStorageError> {
        self.enter(BackupOp::Delete, token).await?;
        Ok(self
            .inner
            .write()
            .entries
            .get_mut(token.identity())
            .and_then(|entries| entries.remove(key_name))
            .is_some())
    }

    async fn delete_all(&self, token: &AccessToken) -> Result<usize, BackupStorageError> {
        self.enter(BackupOp::Delete, token).await?;
        Ok(self
            .inner
            .write()
            .entries
            .remove(token.identity())
            .map(|entries| entries.len())
            .unwrap_or(0))
    }

    async fn list(&self, token: &AccessToken) -> Result<Vec<String>, BackupStorageError> {
        self.enter(BackupOp::List, token).await?;
        Ok(self
            .inner
            .read()
            .entries
            .get(token.identity())
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}
