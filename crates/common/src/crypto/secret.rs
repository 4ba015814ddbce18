//! Content encryption using ChaCha20-Poly1305
//!
//! A [`Secret`] is a 256-bit symmetric key. It is used as:
//! - **Content key**: one fresh secret per envelope, wrapped for every recipient
//! - **Wrapping key**: the password-derived key that seals a private key backup
//!
//! All encryption is authenticated; associated data binds the ciphertext to the
//! context it was produced for (an envelope preamble, a backup slot).

use std::ops::Deref;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of ChaCha20-Poly1305 key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;
/// Size of the Poly1305 authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
    /// The ciphertext failed authentication: wrong key, wrong
    ///  associated data, or the bytes were tampered with
    #[error("authentication failed")]
    Authentication,
}

/// A 256-bit symmetric encryption key
///
/// The self-contained format produced by [`Secret::encrypt`] is:
/// `nonce (12 bytes) || ciphertext || auth_tag (16 bytes)`.
///
/// # Examples
///
/// ```ignore
/// let secret = Secret::generate()?;
///
/// let ciphertext = secret.encrypt(b"sensitive data", b"context")?;
/// let recovered = secret.decrypt(&ciphertext, b"context")?;
/// ```
#[derive(Debug, PartialEq, Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; SECRET_SIZE]);

impl Deref for Secret {
    type Target = [u8; SECRET_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    /// Generate a new random secret using a cryptographically secure RNG
    pub fn generate() -> Result<Self, SecretError> {
        let mut buff = [0; SECRET_SIZE];
        getrandom::getrandom(&mut buff)
            .map_err(|e| anyhow::anyhow!("failed to generate random bytes: {}", e))?;
        Ok(Self(buff))
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(anyhow::anyhow!(
                "invalid secret size, expected {}, got {}",
                SECRET_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    /// Get a reference to the secret key bytes
    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub(crate) fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.bytes()))
    }

    /// Encrypt `data` under an explicit nonce, authenticating `aad` alongside it.
    ///
    /// Returns `ciphertext || auth_tag`. The caller owns nonce uniqueness.
    pub fn seal(
        &self,
        nonce: &[u8; NONCE_SIZE],
        data: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, SecretError> {
        self.cipher()
            .encrypt(Nonce::from_slice(nonce), Payload { msg: data, aad })
            .map_err(|_| anyhow::anyhow!("encrypt error").into())
    }

    /// Reverse of [`Secret::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::Authentication`] if the tag does not verify.
    pub fn open(
        &self,
        nonce: &[u8; NONCE_SIZE],
        data: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, SecretError> {
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), Payload { msg: data, aad })
            .map_err(|_| SecretError::Authentication)
    }

    /// Encrypt data using ChaCha20-Poly1305 AEAD under a fresh random nonce
    ///
    /// The output format is: `nonce (12 bytes) || ciphertext || auth_tag (16 bytes)`.
    pub fn encrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, SecretError> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce)
            .map_err(|e| anyhow::anyhow!("failed to generate nonce: {}", e))?;

        let ciphertext = self.seal(&nonce, data, aad)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt data produced by [`Secret::encrypt`]
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Data is too short to contain a nonce and a tag
    /// - Authentication tag verification fails (data was tampered with, wrong key or wrong `aad`)
    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, SecretError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(anyhow::anyhow!("data too short for nonce and tag").into());
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&data[..NONCE_SIZE]);
        self.open(&nonce, &data[NONCE_SIZE..], aad)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_secret_encrypt_decrypt() {
        let secret = Secret::generate().unwrap();
        let data = b"hello world, this is a test message for encryption";

        let encrypted = secret.encrypt(data, b"ctx").unwrap();
        let decrypted = secret.decrypt(&encrypted, b"ctx").unwrap();

        assert_eq!(data.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_secret_size_validation() {
        let too_short = [1u8; 16];
        let too_long = [1u8; 64];

        assert!(Secret::from_slice(&too_short).is_err());
        assert!(Secret::from_slice(&too_long).is_err());

        let just_right = [1u8; SECRET_SIZE];
        assert!(Secret::from_slice(&just_right).is_ok());
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let secret = Secret::generate().unwrap();
        let mut encrypted = secret.encrypt(b"test data for integrity check", b"").unwrap();

        encrypted[NONCE_SIZE + 3] ^= 0xFF;

        assert!(matches!(
            secret.decrypt(&encrypted, b""),
            Err(SecretError::Authentication)
        ));
    }

    #[test]
    fn test_wrong_associated_data_fails() {
        let secret = Secret::generate().unwrap();
        let encrypted = secret.encrypt(b"payload", b"alice/default").unwrap();

        assert!(matches!(
            secret.decrypt(&encrypted, b"alice/other"),
            Err(SecretError::Authentication)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = Secret::generate().unwrap().encrypt(b"payload", b"").unwrap();
        let other = Secret::generate().unwrap();
        assert!(other.decrypt(&encrypted, b"").is_err());
    }

    #[test]
    fn test_empty_data_encryption() {
        let secret = Secret::generate().unwrap();

        let encrypted = secret.encrypt(b"", b"").unwrap();
        assert_eq!(encrypted.len(), NONCE_SIZE + TAG_SIZE);

        let decrypted = secret.decrypt(&encrypted, b"").unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_truncated_input_rejected() {
        let secret = Secret::generate().unwrap();
        assert!(secret.decrypt(&[0u8; NONCE_SIZE], b"").is_err());
    }
}
