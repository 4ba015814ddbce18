use std::sync::Arc;

use zeroize::Zeroizing;

use super::storage::{BackupEntry, BACKUP_SALT_SIZE, BACKUP_SCHEME_VERSION, DEFAULT_KEY_NAME};
use crate::crypto::{
    CryptoError, KdfParams, Secret, SecretKey, MIN_SALT_SIZE, NONCE_SIZE, TAG_SIZE,
};
use crate::error::SessionError;
use crate::session::Session;

/// Associated data binding a wrapped key to its slot
fn backup_aad(identity: &str, key_name: &str, scheme_version: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(32 + identity.len() + key_name.len());
    aad.extend_from_slice(b"sealkit/backup");
    aad.extend_from_slice(&scheme_version.to_be_bytes());
    aad.extend_from_slice(&(identity.len() as u32).to_be_bytes());
    aad.extend_from_slice(identity.as_bytes());
    aad.extend_from_slice(&(key_name.len() as u32).to_be_bytes());
    aad.extend_from_slice(key_name.as_bytes());
    aad
}

fn check_key_name(key_name: &str) -> Result<(), SessionError> {
    if key_name.trim().is_empty() {
        return Err(SessionError::InvalidArgument("key name must not be empty".into()));
    }
    Ok(())
}

impl Session {
    fn check_password_strength(&self, password: &str) -> Result<(), SessionError> {
        let min = self.inner.config.min_password_length;
        if password.trim().is_empty() {
            return Err(SessionError::WeakPassword("password is blank".into()));
        }
        if password.chars().count() < min {
            return Err(SessionError::WeakPassword(format!(
                "password must be at least {} characters",
                min
            )));
        }
        Ok(())
    }

    /// Run the KDF off the async executor
    async fn derive_wrapping_key(
        &self,
        password: &str,
        salt: Vec<u8>,
        params: KdfParams,
    ) -> Result<Secret, SessionError> {
        let crypto = Arc::clone(&self.inner.crypto);
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let task =
            tokio::task::spawn_blocking(move || crypto.derive_key(&password, &salt, &params));
        let derived = match task.await {
            Ok(derived) => derived,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // runtime shutting down
            Err(_) => return Err(SessionError::Cancelled),
        };
        Ok(derived?)
    }

    async fn wrap_private_key(
        &self,
        key_name: &str,
        secret: &SecretKey,
        password: &str,
    ) -> Result<BackupEntry, SessionError> {
        let crypto = self.crypto();
        let params = self.inner.config.kdf;

        let mut salt = vec![0u8; BACKUP_SALT_SIZE];
        crypto.random_bytes(&mut salt)?;
        let wrapping_key = self
            .derive_wrapping_key(password, salt.clone(), params)
            .await?;

        let mut nonce = [0u8; NONCE_SIZE];
        crypto.random_bytes(&mut nonce)?;
        let aad = backup_aad(&self.inner.identity, key_name, BACKUP_SCHEME_VERSION);
        let ciphertext = crypto.aead_encrypt(&wrapping_key, &nonce, &secret.to_bytes()[..], &aad)?;

        let mut wrapped_key = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        wrapped_key.extend_from_slice(&nonce);
        wrapped_key.extend_from_slice(&ciphertext);

        Ok(BackupEntry {
            identity: self.inner.identity.clone(),
            key_name: key_name.to_string(),
            wrapped_key,
            salt,
            kdf_params: params,
            scheme_version: BACKUP_SCHEME_VERSION,
        })
    }

    /// Authenticate `password` against `entry` by fully decrypting it
    ///
    /// Any authentication failure is `WrongPassword`; no partial plaintext escapes.
    async fn unwrap_private_key(
        &self,
        entry: &BackupEntry,
        password: &str,
    ) -> Result<SecretKey, SessionError> {
        if entry.scheme_version != BACKUP_SCHEME_VERSION {
            return Err(SessionError::InvalidArgument(format!(
                "unsupported backup scheme version {}",
                entry.scheme_version
            )));
        }
        if entry.identity != self.inner.identity {
            return Err(SessionError::WrongPassword);
        }
        if entry.wrapped_key.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SessionError::WrongPassword);
        }
        // the entry's own cost parameters are untrusted input
        if entry.salt.len() < MIN_SALT_SIZE {
            return Err(SessionError::InvalidArgument(format!(
                "backup salt too short: {} bytes",
                entry.salt.len()
            )));
        }
        entry.kdf_params.validate().map_err(|e| {
            SessionError::InvalidArgument(format!("backup kdf parameters rejected: {}", e))
        })?;

        let wrapping_key = self
            .derive_wrapping_key(password, entry.salt.clone(), entry.kdf_params)
            .await?;

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&entry.wrapped_key[..NONCE_SIZE]);
        let aad = backup_aad(&entry.identity, &entry.key_name, entry.scheme_version);

        let plaintext = match self.crypto().aead_decrypt(
            &wrapping_key,
            &nonce,
            &entry.wrapped_key[NONCE_SIZE..],
            &aad,
        ) {
            Ok(plaintext) => Zeroizing::new(plaintext),
            Err(CryptoError::Aead) => return Err(SessionError::WrongPassword),
            Err(e) => return Err(e.into()),
        };

        SecretKey::from_slice(&plaintext).map_err(|_| SessionError::WrongPassword)
    }

    /// Back up the local private key under [`DEFAULT_KEY_NAME`]
    pub async fn backup_private_key(&self, password: &str) -> Result<(), SessionError> {
        self.backup_private_key_named(DEFAULT_KEY_NAME, password)
            .await
    }

    /// Wrap the local private key under `password` and upload it as `key_name`
    ///
    /// # Errors
    ///
    /// * `BackupAlreadyExists` - never overwrites; change the password or reset first
    /// * `WeakPassword` - blank or shorter than `min_password_length`
    pub async fn backup_private_key_named(
        &self,
        key_name: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        check_key_name(key_name)?;
        self.check_password_strength(password)?;
        let _guard = self.begin_mutation()?;

        let secret = self.local_key().await?;
        let token = self.token().await?;

        if self
            .remote("check backup", self.inner.backups.exists(&token, key_name))
            .await?
        {
            return Err(SessionError::BackupAlreadyExists(key_name.to_string()));
        }

        let entry = self.wrap_private_key(key_name, &secret, password).await?;
        self.remote("upload backup", self.inner.backups.create(&token, entry))
            .await?;

        tracing::info!(identity = %self.inner.identity, key_name, "private key backed up");
        Ok(())
    }

    pub async fn restore_private_key(&self, password: &str) -> Result<(), SessionError> {
        self.restore_private_key_named(DEFAULT_KEY_NAME, password)
            .await
    }

    /// Download the `key_name` backup, unwrap it and store the key on this device
    ///
    /// # Errors
    ///
    /// * `LocalKeyAlreadyPresent` - `cleanup` first; an existing key is never replaced
    /// * `BackupNotFound`
    /// * `WrongPassword` - the local key state is left unchanged
    pub async fn restore_private_key_named(
        &self,
        key_name: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        check_key_name(key_name)?;
        if password.is_empty() {
            return Err(SessionError::InvalidArgument("password must not be empty".into()));
        }
        let _guard = self.begin_mutation()?;
        let identity = &self.inner.identity;

        if self.has_local_private_key().await? {
            return Err(SessionError::LocalKeyAlreadyPresent);
        }

        let token = self.token().await?;
        let entry = self
            .remote("download backup", self.inner.backups.fetch(&token, key_name))
            .await?;

        let secret = self.unwrap_private_key(&entry, password).await?;
        self.inner.key_store.store(identity, &secret).await?;

        tracing::info!(identity = %identity, key_name, "private key restored");
        Ok(())
    }

    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), SessionError> {
        self.change_password_named(DEFAULT_KEY_NAME, old_password, new_password)
            .await
    }

    /// Re-wrap the `key_name` backup under `new_password`
    ///
    /// The old password is checked by a full decrypt of the stored entry; the
    ///  same key is then wrapped under a fresh salt and swapped in.
    pub async fn change_password_named(
        &self,
        key_name: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), SessionError> {
        check_key_name(key_name)?;
        if old_password == new_password {
            return Err(SessionError::InvalidArgument(
                "new password must differ from the old one".into(),
            ));
        }
        self.check_password_strength(new_password)?;
        let _guard = self.begin_mutation()?;

        if !self.has_local_private_key().await? {
            return Err(SessionError::MissingPrivateKey);
        }

        let token = self.token().await?;
        let entry = self
            .remote("download backup", self.inner.backups.fetch(&token, key_name))
            .await?;

        let secret = self.unwrap_private_key(&entry, old_password).await?;
        let rewrapped = self.wrap_private_key(key_name, &secret, new_password).await?;
        self.remote("replace backup", self.inner.backups.replace(&token, rewrapped))
            .await?;

        tracing::info!(identity = %self.inner.identity, key_name, "backup password changed");
        Ok(())
    }

    /// Delete every backup entry of this identity
    pub async fn reset_private_key_backup(&self) -> Result<(), SessionError> {
        let _guard = self.begin_mutation()?;
        if !self.has_local_private_key().await? {
            return Err(SessionError::MissingPrivateKey);
        }

        let token = self.token().await?;
        let deleted = self
            .remote("delete backups", self.inner.backups.delete_all(&token))
            .await?;

        tracing::info!(identity = %self.inner.identity, deleted, "private key backups reset");
        Ok(())
    }

    /// Delete the `key_name` backup; deleting a missing entry succeeds
    pub async fn reset_private_key_backup_named(&self, key_name: &str) -> Result<(), SessionError> {
        check_key_name(key_name)?;
        let _guard = self.begin_mutation()?;
        if !self.has_local_private_key().await? {
            return Err(SessionError::MissingPrivateKey);
        }

        let token = self.token().await?;
        let existed = self
            .remote("delete backup", self.inner.backups.delete(&token, key_name))
            .await?;

        tracing::info!(identity = %self.inner.identity, key_name, existed, "private key backup reset");
        Ok(())
    }

    /// Whether a backup exists under `key_name`
    pub async fn has_private_key_backup(&self, key_name: &str) -> Result<bool, SessionError> {
        check_key_name(key_name)?;
        let token = self.token().await?;
        self.remote("check backup", self.inner.backups.exists(&token, key_name))
            .await
    }
}
