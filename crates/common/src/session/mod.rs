//! An identity session and its key lifecycle
//!
//! A [`Session`] is bound to the identity its token provider vouches for. It
//! owns no global state: every collaborator is handed to the
//! [`SessionBuilder`], and cloning a session yields another handle on the same
//! state.
//!
//! # Concurrency
//!
//! Key-mutating operations (register, rotate, restore, cleanup, backup,
//! change password, reset) take the session's mutation guard with `try_lock`
//! and fail with [`SessionError::Busy`] instead of queueing. Read-only
//! operations never take it.
//!
//! Every remote call runs under the configured request timeout and the
//! session's cancellation token.

mod lifecycle;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::backup::{BackupStorage, MemoryBackupStorage};
use crate::config::SessionConfig;
use crate::crypto::{CryptoProvider, DefaultCryptoProvider, SecretKey};
use crate::directory::DirectoryClient;
use crate::error::SessionError;
use crate::key_store::{FsKeyStore, KeyStore, KeyStoreError, MemoryKeyStore};
use crate::token::{AccessToken, TokenProvider};
use crate::users::CardCache;

pub use lifecycle::LocalKeyState;

#[derive(Default)]
pub struct SessionBuilder {
    tokens: Option<Arc<dyn TokenProvider>>,
    directory: Option<Arc<dyn DirectoryClient>>,
    key_store: Option<Arc<dyn KeyStore>>,
    backups: Option<Arc<dyn BackupStorage>>,
    crypto: Option<Arc<dyn CryptoProvider>>,
    config: Option<SessionConfig>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Required. Resolves the session identity and authorizes every remote call.
    pub fn token_provider(mut self, tokens: impl TokenProvider + 'static) -> Self {
        self.tokens = Some(Arc::new(tokens));
        self
    }

    /// Required.
    pub fn directory(mut self, directory: impl DirectoryClient + 'static) -> Self {
        self.directory = Some(Arc::new(directory));
        self
    }

    /// Defaults to a [`FsKeyStore`] at `config.key_store_path` if set, else
    ///  an in-memory store.
    pub fn key_store(mut self, key_store: impl KeyStore + 'static) -> Self {
        self.key_store = Some(Arc::new(key_store));
        self
    }

    /// Defaults to a private in-memory storage, which is only useful for tests.
    pub fn backups(mut self, backups: impl BackupStorage + 'static) -> Self {
        self.backups = Some(Arc::new(backups));
        self
    }

    pub fn crypto(mut self, crypto: impl CryptoProvider + 'static) -> Self {
        self.crypto = Some(Arc::new(crypto));
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Resolve the identity through the token provider and open the session
    ///
    /// Does not create, load or restore any key; check
    ///  [`Session::local_key_state`] to decide between register and restore.
    pub async fn bootstrap(self) -> Result<Session, SessionError> {
        let config = self.config.unwrap_or_default();
        config
            .validate()
            .map_err(|e| SessionError::InvalidArgument(e.to_string()))?;

        let tokens = self
            .tokens
            .ok_or_else(|| SessionError::InvalidArgument("token provider is required".into()))?;
        let directory = self
            .directory
            .ok_or_else(|| SessionError::InvalidArgument("directory is required".into()))?;

        let token = fetch_token(tokens.as_ref()).await?;
        let identity = token.identity().to_string();

        let key_store: Arc<dyn KeyStore> = match (self.key_store, &config.key_store_path) {
            (Some(key_store), _) => key_store,
            (None, Some(path)) => Arc::new(FsKeyStore::open(path)?),
            (None, None) => Arc::new(MemoryKeyStore::new()),
        };
        let backups: Arc<dyn BackupStorage> = match self.backups {
            Some(backups) => backups,
            None => Arc::new(MemoryBackupStorage::new()),
        };
        let crypto: Arc<dyn CryptoProvider> = match self.crypto {
            Some(crypto) => crypto,
            None => Arc::new(DefaultCryptoProvider),
        };

        let has_local_key = key_store.has(&identity).await?;
        tracing::info!(identity = %identity, has_local_key, "session bootstrapped");

        Ok(Session {
            inner: Arc::new(SessionInner {
                cards: CardCache::new(config.card_cache_ttl()),
                identity,
                tokens,
                directory,
                key_store,
                backups,
                crypto,
                config,
                mutation: Mutex::new(()),
            }),
            cancel: CancellationToken::new(),
        })
    }
}

pub(crate) struct SessionInner {
    pub(crate) identity: String,
    pub(crate) tokens: Arc<dyn TokenProvider>,
    pub(crate) directory: Arc<dyn DirectoryClient>,
    pub(crate) key_store: Arc<dyn KeyStore>,
    pub(crate) backups: Arc<dyn BackupStorage>,
    pub(crate) crypto: Arc<dyn CryptoProvider>,
    pub(crate) config: SessionConfig,
    pub(crate) cards: CardCache,
    /// Held for the whole of a key-mutating operation
    mutation: Mutex<()>,
}

/// A handle on one identity's keys, cards and backups
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.inner.identity)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

async fn fetch_token(tokens: &dyn TokenProvider) -> Result<AccessToken, SessionError> {
    let token = tokens
        .access_token()
        .await
        .map_err(|e| SessionError::NotAuthenticated(format!("token provider failed: {}", e)))?;
    if token.is_empty() {
        return Err(SessionError::InvalidArgument(
            "token provider returned an empty token".into(),
        ));
    }
    Ok(token)
}

impl Session {
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// A handle on the same session whose remote calls observe `token`
    pub fn with_cancellation(&self, token: CancellationToken) -> Session {
        Session {
            inner: self.inner.clone(),
            cancel: token,
        }
    }

    /// Cancel every in-flight and future remote call made through this handle
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fetch a fresh token for one operation
    pub(crate) async fn token(&self) -> Result<AccessToken, SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        let token = fetch_token(self.inner.tokens.as_ref()).await?;
        if token.identity() != self.inner.identity {
            return Err(SessionError::NotAuthenticated(format!(
                "token was issued to {}, session is bound to {}",
                token.identity(),
                self.inner.identity
            )));
        }
        Ok(token)
    }

    /// Run a remote call under the request timeout and the cancellation token
    pub(crate) async fn remote<T, E, F>(&self, what: &str, call: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, E>>,
        SessionError: From<E>,
    {
        let timeout = self.inner.config.request_timeout();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!(what, "remote call cancelled");
                Err(SessionError::Cancelled)
            }
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(result) => result.map_err(SessionError::from),
                Err(_) => Err(SessionError::Timeout(format!("{} exceeded {:?}", what, timeout))),
            },
        }
    }

    /// Claim the mutation guard or fail fast
    pub(crate) fn begin_mutation(&self) -> Result<MutexGuard<'_, ()>, SessionError> {
        self.inner.mutation.try_lock().map_err(|_| SessionError::Busy)
    }

    pub(crate) async fn local_key(&self) -> Result<SecretKey, SessionError> {
        match self.inner.key_store.load(&self.inner.identity).await {
            Ok(key) => Ok(key),
            Err(KeyStoreError::NotFound(_)) => Err(SessionError::MissingPrivateKey),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn crypto(&self) -> &dyn CryptoProvider {
        self.inner.crypto.as_ref()
    }
}
