//! Per-recipient key wrapping using ECDH + AES Key Wrap
//!
//! An envelope is encrypted once under a fresh content [`Secret`]; that secret is
//! then wrapped separately for every recipient, so adding a recipient costs one
//! share rather than one more pass over the payload.
//!
//! # Protocol Overview
//!
//! To wrap a secret for a recipient:
//! 1. **Generate ephemeral keypair**: Create a temporary Ed25519 keypair
//! 2. **Perform ECDH**: Convert keys to X25519 and compute shared secret
//! 3. **Wrap key**: Use AES-KW to encrypt the content secret with the shared secret
//! 4. **Package**: Create a share containing the ephemeral public key and wrapped secret
//!
//! The recipient recovers the secret by repeating the ECDH with their private key
//! and unwrapping. AES-KW carries an integrity check, so a share addressed to
//! someone else fails to unwrap rather than yielding a wrong key.

use std::convert::TryFrom;

use aes_kw::KekAes256 as Kek;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::keys::{KeyError, PublicKey, SecretKey, PUBLIC_KEY_SIZE};
use super::secret::{Secret, SecretError, SECRET_SIZE};

/// Size of AES Key Wrap integrity block in bytes
pub const KW_NONCE_SIZE: usize = 8;
/// Total size of a share in bytes
///
/// Layout: ephemeral_pubkey (32) || wrapped_secret (40) = 72 bytes
pub const SECRET_SHARE_SIZE: usize = PUBLIC_KEY_SIZE + SECRET_SIZE + KW_NONCE_SIZE;

/// Errors that can occur during share creation or recovery
#[derive(Debug, thiserror::Error)]
pub enum SecretShareError {
    #[error("share error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}

/// A content secret wrapped for exactly one recipient
///
/// # Wire Format
///
/// ```text
/// [ ephemeral_pubkey: 32 bytes ][ wrapped_secret: 40 bytes ]
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SecretShare(pub(crate) [u8; SECRET_SHARE_SIZE]);

impl Serialize for SecretShare {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecretShare {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{Error, Visitor};
        use std::fmt;

        struct ShareVisitor;

        impl<'de> Visitor<'de> for ShareVisitor {
            type Value = SecretShare;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte array or sequence of SECRET_SHARE_SIZE")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: Error,
            {
                SecretShare::try_from(v).map_err(|_| {
                    E::invalid_length(
                        v.len(),
                        &format!("expected {} bytes", SECRET_SHARE_SIZE).as_str(),
                    )
                })
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut bytes = Vec::with_capacity(SECRET_SHARE_SIZE);
                while let Some(byte) = seq.next_element::<u8>()? {
                    bytes.push(byte);
                }
                SecretShare::try_from(bytes.as_slice()).map_err(|_| {
                    A::Error::invalid_length(
                        bytes.len(),
                        &format!("expected {} bytes", SECRET_SHARE_SIZE).as_str(),
                    )
                })
            }
        }

        // Try bytes first (for bincode), fallback to seq (for JSON)
        deserializer.deserialize_byte_buf(ShareVisitor)
    }
}

impl Default for SecretShare {
    fn default() -> Self {
        SecretShare([0; SECRET_SHARE_SIZE])
    }
}

impl TryFrom<&[u8]> for SecretShare {
    type Error = SecretShareError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != SECRET_SHARE_SIZE {
            return Err(anyhow::anyhow!(
                "invalid share size, expected {}, got {}",
                SECRET_SHARE_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut share = SecretShare::default();
        share.0.copy_from_slice(bytes);
        Ok(share)
    }
}

impl SecretShare {
    /// Wrap `secret` so that only the holder of `recipient`'s private key can recover it
    ///
    /// # Errors
    ///
    /// Returns an error if key conversion or wrapping fails.
    pub fn new(secret: &Secret, recipient: &PublicKey) -> Result<Self, SecretShareError> {
        let ephemeral_private = SecretKey::generate()?;
        let ephemeral_public = ephemeral_private.public();

        let ephemeral_x25519_private = ephemeral_private.to_x25519();
        let recipient_x25519_public = recipient.to_x25519()?;

        let shared_secret = ephemeral_x25519_private.diffie_hellman(&recipient_x25519_public);

        let kek = Kek::from(*shared_secret.as_bytes());
        let wrapped = kek
            .wrap_vec(secret.bytes())
            .map_err(|_| anyhow::anyhow!("AES-KW wrap error"))?;

        let ephemeral_bytes = ephemeral_public.to_bytes();
        if ephemeral_bytes.len() + wrapped.len() != SECRET_SHARE_SIZE {
            return Err(anyhow::anyhow!("expected share size is incorrect").into());
        };

        let mut share = SecretShare::default();
        share.0[..PUBLIC_KEY_SIZE].copy_from_slice(&ephemeral_bytes);
        share.0[PUBLIC_KEY_SIZE..].copy_from_slice(&wrapped);

        Ok(share)
    }

    /// Recover the wrapped secret using the recipient's private key
    ///
    /// # Errors
    ///
    /// Returns an error if the share was created for a different recipient,
    /// or the bytes were corrupted or tampered with.
    pub fn recover(&self, recipient_secret: &SecretKey) -> Result<Secret, SecretShareError> {
        let ephemeral_public = PublicKey::try_from(&self.0[..PUBLIC_KEY_SIZE])?;

        let recipient_x25519_private = recipient_secret.to_x25519();
        let ephemeral_x25519_public = ephemeral_public.to_x25519()?;

        let shared_secret = recipient_x25519_private.diffie_hellman(&ephemeral_x25519_public);

        let kek = Kek::from(*shared_secret.as_bytes());
        let unwrapped = Zeroizing::new(
            kek.unwrap_vec(&self.0[PUBLIC_KEY_SIZE..])
                .map_err(|_| anyhow::anyhow!("AES-KW unwrap error"))?,
        );

        Ok(Secret::from_slice(&unwrapped)?)
    }

    /// Get a reference to the raw share bytes
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_share_secret() {
        let secret = Secret::from_slice(&[42u8; SECRET_SIZE]).unwrap();
        let private_key = SecretKey::generate().unwrap();
        let share = SecretShare::new(&secret, &private_key.public()).unwrap();
        let recovered_secret = share.recover(&private_key).unwrap();
        assert_eq!(secret, recovered_secret);
    }

    #[test]
    fn test_share_different_keys() {
        let secret = Secret::generate().unwrap();
        let alice_private = SecretKey::generate().unwrap();
        let bob_private = SecretKey::generate().unwrap();

        let share = SecretShare::new(&secret, &alice_private.public()).unwrap();
        assert_eq!(secret, share.recover(&alice_private).unwrap());

        // Bob cannot recover a share addressed to Alice
        assert!(share.recover(&bob_private).is_err());
    }

    #[test]
    fn test_share_serde_bincode_roundtrip() {
        let secret = Secret::generate().unwrap();
        let private_key = SecretKey::generate().unwrap();
        let share = SecretShare::new(&secret, &private_key.public()).unwrap();

        let binary = bincode::serialize(&share).unwrap();
        let recovered_share: SecretShare = bincode::deserialize(&binary).unwrap();

        assert_eq!(share, recovered_share);
        assert_eq!(secret, recovered_share.recover(&private_key).unwrap());
    }

    #[test]
    fn test_share_serde_json_roundtrip() {
        let secret = Secret::generate().unwrap();
        let private_key = SecretKey::generate().unwrap();
        let share = SecretShare::new(&secret, &private_key.public()).unwrap();

        let json = serde_json::to_string(&share).unwrap();
        let recovered_share: SecretShare = serde_json::from_str(&json).unwrap();

        assert_eq!(share, recovered_share);
    }

    #[test]
    fn test_share_deserialize_invalid_length() {
        let short_data = vec![0u8; SECRET_SHARE_SIZE - 1];
        let result: Result<SecretShare, _> =
            bincode::deserialize(&bincode::serialize(&short_data).unwrap());
        assert!(result.is_err());

        let long_data = vec![0u8; SECRET_SHARE_SIZE + 1];
        let result: Result<SecretShare, _> =
            bincode::deserialize(&bincode::serialize(&long_data).unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_tampered_share_fails() {
        let secret = Secret::generate().unwrap();
        let private_key = SecretKey::generate().unwrap();
        let mut share = SecretShare::new(&secret, &private_key.public()).unwrap();
        share.0[SECRET_SHARE_SIZE - 1] ^= 0x01;
        assert!(share.recover(&private_key).is_err());
    }
}
