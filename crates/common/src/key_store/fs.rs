use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{KeyStore, KeyStoreError};
use crate::crypto::SecretKey;

/// Key store keeping one PEM file per identity in a directory
///
/// File names are the BLAKE3 hash of the identity so arbitrary identity
///  strings map to safe paths. Writes go to a temp file in the same directory
///  and are renamed into place.
#[derive(Debug, Clone)]
pub struct FsKeyStore {
    dir: PathBuf,
}

impl FsKeyStore {
    /// Open (creating if needed) a key store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, KeyStoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, identity: &str) -> PathBuf {
        let name = hex::encode(blake3::hash(identity.as_bytes()).as_bytes());
        self.dir.join(format!("{}.pem", name))
    }
}

#[async_trait]
impl KeyStore for FsKeyStore {
    async fn has(&self, identity: &str) -> Result<bool, KeyStoreError> {
        Ok(tokio::fs::try_exists(self.key_path(identity)).await?)
    }

    async fn load(&self, identity: &str) -> Result<SecretKey, KeyStoreError> {
        let pem = match tokio::fs::read_to_string(self.key_path(identity)).await {
            Ok(pem) => zeroize::Zeroizing::new(pem),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeyStoreError::NotFound(identity.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        SecretKey::from_pem(&pem).map_err(|e| KeyStoreError::Invalid(e.to_string()))
    }

    async fn store(&self, identity: &str, key: &SecretKey) -> Result<(), KeyStoreError> {
        let dir = self.dir.clone();
        let path = self.key_path(identity);
        let pem = key.to_pem();

        tokio::task::spawn_blocking(move || -> Result<(), KeyStoreError> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(pem.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| KeyStoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    async fn delete(&self, identity: &str) -> Result<(), KeyStoreError> {
        match tokio::fs::remove_file(self.key_path(identity)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
