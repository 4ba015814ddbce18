//! Password-protected private key backups
//!
//! The vault operations live on [`Session`](crate::session::Session); this
//! module holds the entry format and the storage the entries go to.

mod memory;
mod storage;
mod vault;

pub use crate::crypto::{derive_passwords, DerivedPasswords};
pub use memory::{BackupOp, MemoryBackupStorage};
pub use storage::{
    BackupEntry, BackupStorage, BackupStorageError, BACKUP_SALT_SIZE, BACKUP_SCHEME_VERSION,
    DEFAULT_KEY_NAME,
};
