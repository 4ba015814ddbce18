use ed25519_dalek::Signature;

use super::kdf::{self, KdfParams};
use super::keys::{KeyError, KeyPair, PublicKey, SecretKey};
use super::secret::{Secret, SecretError, NONCE_SIZE};
use super::secret_share::SecretShareError;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("share error: {0}")]
    Share(#[from] SecretShareError),
    #[error("kdf error: {0}")]
    Kdf(String),
    #[error("rng error: {0}")]
    Rng(String),
    /// Authenticated decryption failed. Deliberately carries no detail.
    #[error("aead authentication failed")]
    Aead,
}

/// The primitive cryptography a session is built on
///
/// Sessions never touch a cipher or curve directly for these operations; swapping
///  the provider swaps the primitives. Every method is synchronous: they are
///  compute-bound and run to completion.
pub trait CryptoProvider: Send + Sync + std::fmt::Debug {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError>;

    fn sign(&self, secret: &SecretKey, msg: &[u8]) -> Signature;

    fn verify(&self, public: &PublicKey, msg: &[u8], signature: &Signature) -> bool;

    /// Returns `ciphertext || tag`
    fn aead_encrypt(
        &self,
        key: &Secret,
        nonce: &[u8; NONCE_SIZE],
        data: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Must fail with [`CryptoError::Aead`] on any authentication failure
    fn aead_decrypt(
        &self,
        key: &Secret,
        nonce: &[u8; NONCE_SIZE],
        data: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    fn derive_key(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<Secret, CryptoError>;

    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), CryptoError>;
}

/// Ed25519 / ChaCha20-Poly1305 / Argon2id
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCryptoProvider;

impl CryptoProvider for DefaultCryptoProvider {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError> {
        Ok(KeyPair::from(SecretKey::generate()?))
    }

    fn sign(&self, secret: &SecretKey, msg: &[u8]) -> Signature {
        secret.sign(msg)
    }

    fn verify(&self, public: &PublicKey, msg: &[u8], signature: &Signature) -> bool {
        public.verify(msg, signature).is_ok()
    }

    fn aead_encrypt(
        &self,
        key: &Secret,
        nonce: &[u8; NONCE_SIZE],
        data: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Ok(key.seal(nonce, data, aad)?)
    }

    fn aead_decrypt(
        &self,
        key: &Secret,
        nonce: &[u8; NONCE_SIZE],
        data: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        key.open(nonce, data, aad).map_err(|_| CryptoError::Aead)
    }

    fn derive_key(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<Secret, CryptoError> {
        kdf::derive_key(password, salt, params)
    }

    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        getrandom::getrandom(buf).map_err(|e| CryptoError::Rng(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_provider_sign_verify() {
        let provider = DefaultCryptoProvider;
        let pair = provider.generate_key_pair().unwrap();
        let sig = provider.sign(&pair.secret, b"card snapshot");

        assert!(provider.verify(&pair.public, b"card snapshot", &sig));
        assert!(!provider.verify(&pair.public, b"card snapshot!", &sig));
    }

    #[test]
    fn test_default_provider_aead() {
        let provider = DefaultCryptoProvider;
        let key = Secret::generate().unwrap();
        let mut nonce = [0u8; NONCE_SIZE];
        provider.random_bytes(&mut nonce).unwrap();

        let ct = provider.aead_encrypt(&key, &nonce, b"data", b"aad").unwrap();
        assert_eq!(
            provider.aead_decrypt(&key, &nonce, &ct, b"aad").unwrap(),
            b"data"
        );
        assert!(matches!(
            provider.aead_decrypt(&key, &nonce, &ct, b"other"),
            Err(CryptoError::Aead)
        ));
    }
}
