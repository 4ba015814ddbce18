//! Cryptographic primitives for sealkit
//!
//! - **Identity & Authentication**: Ed25519 keypairs bound to an identity by a card
//! - **Encryption**: ChaCha20-Poly1305 with a fresh content `Secret` per message
//! - **Key Sharing**: ECDH-based wrapping of the content secret per recipient
//! - **Password Wrapping**: Argon2id derives the key that seals a private key backup
//!
//! # Security Model
//!
//! ## Identity
//! Each identity owns one Ed25519 keypair (`SecretKey`/`PublicKey`). The public half
//! is published on a card; the same keypair signs messages and receives shares.
//!
//! ## Key Sharing Protocol
//! To address a message to a recipient:
//! 1. Generate ephemeral Ed25519 keypair
//! 2. Convert both keys to X25519 (Montgomery curve)
//! 3. Perform ECDH to derive shared secret
//! 4. Use AES-KW (key wrap) to encrypt the content secret with shared secret
//! 5. Package as a `SecretShare` (ephemeral_pubkey || wrapped_secret)
//!
//! Everything a session does with these primitives goes through a
//! [`CryptoProvider`], so the suite can be swapped out as a unit.

mod kdf;
mod keys;
mod provider;
mod secret;
mod secret_share;

pub use ed25519_dalek::Signature;
pub use kdf::{
    derive_key, derive_passwords, DerivedPasswords, KdfParams, MAX_KDF_ITERATIONS,
    MAX_KDF_MEMORY_KIB, MAX_KDF_PARALLELISM, MIN_SALT_SIZE,
};
pub use keys::{KeyError, KeyPair, PublicKey, SecretKey, KEY_ID_SIZE, PUBLIC_KEY_SIZE};
pub use provider::{CryptoError, CryptoProvider, DefaultCryptoProvider};
pub use secret::{Secret, SecretError, NONCE_SIZE, SECRET_SIZE, TAG_SIZE};
pub use secret_share::{SecretShare, SecretShareError, SECRET_SHARE_SIZE};

/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = ed25519_dalek::SIGNATURE_LENGTH;
