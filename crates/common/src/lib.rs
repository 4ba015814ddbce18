/**
 * Password-protected private key backups.
 *  Entry format, backup storage trait and an
 *  in-memory storage for tests.
 */
pub mod backup;
/**
 * Cards: the signed, published binding of an
 *  identity to its current public key, linked
 *  to the cards it superseded.
 */
pub mod card;
/**
 * Session configuration, loadable from TOML.
 */
pub mod config;
/**
 * Cryptographic types and operations.
 *  - Public and Private key implementations
 *  - Key-to-key key sharing
 *  - Password based key derivation
 *  - The pluggable crypto provider
 */
pub mod crypto;
/**
 * The card directory client trait and an
 *  in-memory directory.
 */
pub mod directory;
/**
 * Envelope encryption between identities,
 *  in memory and as chunked streams.
 */
pub mod encryption;
pub mod error;
/**
 * Where a device keeps its private key.
 */
pub mod key_store;
/**
 * The per-identity session: bootstrap, key
 *  lifecycle and the concurrency guard every
 *  key-mutating operation goes through.
 */
pub mod session;
/**
 * In-process harness for multi-device tests.
 */
pub mod testkit;
pub mod token;
/**
 * Looking up other identities and caching
 *  their cards.
 */
pub mod users;

pub mod prelude {
    pub use crate::backup::{BackupStorage, MemoryBackupStorage, DEFAULT_KEY_NAME};
    pub use crate::card::Card;
    pub use crate::config::SessionConfig;
    pub use crate::crypto::{KeyPair, PublicKey, SecretKey};
    pub use crate::directory::{DirectoryClient, MemoryDirectory};
    pub use crate::error::SessionError;
    pub use crate::key_store::{FsKeyStore, KeyStore, MemoryKeyStore};
    pub use crate::session::{LocalKeyState, Session, SessionBuilder};
    pub use crate::token::{AccessToken, TokenProvider};
    pub use crate::users::FindUsersReport;
}
