//! Password-based key derivation using Argon2id
//!
//! Backups store the [`KdfParams`] they were wrapped under, so raising the
//! default cost never breaks restore of entries written with older settings.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::provider::CryptoError;
use super::secret::{Secret, SECRET_SIZE};

/// Minimum salt length accepted by Argon2
pub const MIN_SALT_SIZE: usize = 8;

/// Upper bounds on accepted cost parameters. Stored backups carry their own
///  parameters, so these keep a tampered entry from pinning memory or CPU.
pub const MAX_KDF_MEMORY_KIB: u32 = 1024 * 1024;
pub const MAX_KDF_ITERATIONS: u32 = 64;
pub const MAX_KDF_PARALLELISM: u32 = 16;

const BACKUP_PASSWORD_LABEL: &[u8] = b"sealkit/derive-passwords/backup/v1";
const LOGIN_PASSWORD_LABEL: &[u8] = b"sealkit/derive-passwords/login/v1";

// Fixed so that `derive_passwords` is a pure function of the password across
//  releases; changing these changes every derived password.
const DERIVE_PASSWORDS_MEMORY_KIB: u32 = 4096;
const DERIVE_PASSWORDS_ITERATIONS: u32 = 3;
const DERIVE_PASSWORDS_PARALLELISM: u32 = 1;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes over memory
    pub iterations: u32,
    /// Degree of parallelism (lanes)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP baseline for Argon2id
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    fn to_argon2(self) -> Result<Params, CryptoError> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(SECRET_SIZE),
        )
        .map_err(|e| CryptoError::Kdf(format!("invalid argon2 parameters: {}", e)))
    }

    /// Check that Argon2 accepts these parameters and that they are within
    ///  the `MAX_KDF_*` bounds
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.memory_kib > MAX_KDF_MEMORY_KIB {
            return Err(CryptoError::Kdf(format!(
                "memory cost {} KiB exceeds the maximum of {} KiB",
                self.memory_kib, MAX_KDF_MEMORY_KIB
            )));
        }
        if self.iterations > MAX_KDF_ITERATIONS {
            return Err(CryptoError::Kdf(format!(
                "iteration count {} exceeds the maximum of {}",
                self.iterations, MAX_KDF_ITERATIONS
            )));
        }
        if self.parallelism > MAX_KDF_PARALLELISM {
            return Err(CryptoError::Kdf(format!(
                "parallelism {} exceeds the maximum of {}",
                self.parallelism, MAX_KDF_PARALLELISM
            )));
        }
        self.to_argon2().map(|_| ())
    }
}

/// Derive a 256-bit wrapping key from `password` and `salt`
///
/// # Errors
///
/// Returns [`CryptoError::Kdf`] if the parameters fail [`KdfParams::validate`]
/// or the salt is shorter than [`MIN_SALT_SIZE`].
pub fn derive_key(password: &[u8], salt: &[u8], params: &KdfParams) -> Result<Secret, CryptoError> {
    if salt.len() < MIN_SALT_SIZE {
        return Err(CryptoError::Kdf(format!(
            "salt too short, expected at least {} bytes, got {}",
            MIN_SALT_SIZE,
            salt.len()
        )));
    }

    params.validate()?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
    let mut out = Zeroizing::new([0u8; SECRET_SIZE]);
    argon2
        .hash_password_into(password, salt, &mut out[..])
        .map_err(|e| CryptoError::Kdf(format!("argon2 error: {}", e)))?;

    Ok(Secret::from(*out))
}

/// Two independent passwords derived from one user password
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedPasswords {
    /// Used to wrap private key backups
    pub backup_password: Zeroizing<String>,
    /// Handed to the application's login flow
    pub login_password: Zeroizing<String>,
}

impl std::fmt::Debug for DerivedPasswords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedPasswords").finish_non_exhaustive()
    }
}

/// Derive a backup password and a login password from a single user password
///
/// One Argon2id run per domain-separation label; the salt of each run is the
/// SHA-256 of its label. The outputs are hex-encoded.
pub fn derive_passwords(password: &str) -> Result<DerivedPasswords, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::Kdf("password must not be empty".into()));
    }

    let params = KdfParams {
        memory_kib: DERIVE_PASSWORDS_MEMORY_KIB,
        iterations: DERIVE_PASSWORDS_ITERATIONS,
        parallelism: DERIVE_PASSWORDS_PARALLELISM,
    };

    let derive = |label: &[u8]| -> Result<Zeroizing<String>, CryptoError> {
        let salt = Sha256::digest(label);
        let key = derive_key(password.as_bytes(), &salt, &params)?;
        Ok(Zeroizing::new(hex::encode(key.bytes())))
    };

    Ok(DerivedPasswords {
        backup_password: derive(BACKUP_PASSWORD_LABEL)?,
        login_password: derive(LOGIN_PASSWORD_LABEL)?,
    })
}
