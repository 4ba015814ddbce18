//! Envelope wire format
//!
//! ```text
//! [ magic "SLBX" ][ version u8 ][ mode u8 ][ framing u8 ][ header_len u32 BE ][ header ]  <- preamble
//! [ body ]
//! ```
//!
//! The header is bincode `{ recipients: [{ key_id, share }], nonce }`. One content
//! key encrypts the body; each recipient gets that key wrapped in a share. The
//! whole preamble is authenticated as associated data, so recipients, mode and
//! framing cannot be altered without failing decryption.
//!
//! Signed envelopes carry an Ed25519 signature inside the encrypted payload,
//! over `SIGN_CONTEXT || blake3(preamble || plaintext)`.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use zeroize::Zeroizing;

use crate::crypto::{
    CryptoError, CryptoProvider, PublicKey, Secret, SecretKey, SecretShare, Signature,
    KEY_ID_SIZE, NONCE_SIZE, SECRET_SIZE, SIGNATURE_SIZE, TAG_SIZE,
};
use crate::error::SessionError;

pub(crate) const MAGIC: &[u8; 4] = b"SLBX";
pub(crate) const ENVELOPE_VERSION: u8 = 1;
/// magic + version + mode + framing + header_len
pub(crate) const FIXED_PREAMBLE_SIZE: usize = 4 + 1 + 1 + 1 + 4;
const MAX_HEADER_SIZE: usize = 1024 * 1024;
const SIGN_CONTEXT: &[u8] = b"sealkit/envelope-signature/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Unsigned = 0,
    Signed = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    Whole = 0,
    Stream = 1,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Recipient {
    key_id: [u8; KEY_ID_SIZE],
    share: SecretShare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    recipients: Vec<Recipient>,
    nonce: Vec<u8>,
}

/// A parsed (or freshly built) envelope preamble
#[derive(Debug)]
pub(crate) struct Preamble {
    pub(crate) mode: Mode,
    pub(crate) framing: Framing,
    header: Header,
    /// The raw preamble, used as associated data
    bytes: Vec<u8>,
}

fn malformed(what: &str) -> SessionError {
    tracing::debug!(what, "malformed envelope");
    SessionError::DecryptionFailed
}

impl Preamble {
    /// Wrap `content_key` for every recipient and lay out the preamble
    pub(crate) fn build(
        content_key: &Secret,
        recipients: &[PublicKey],
        mode: Mode,
        framing: Framing,
        nonce: Vec<u8>,
    ) -> Result<Self, SessionError> {
        let mut wrapped = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let key_id = recipient.key_id();
            if wrapped.iter().any(|r: &Recipient| r.key_id == key_id) {
                continue;
            }
            let share = SecretShare::new(content_key, recipient).map_err(CryptoError::from)?;
            wrapped.push(Recipient { key_id, share });
        }

        let header = Header {
            recipients: wrapped,
            nonce,
        };
        let header_bytes = bincode::serialize(&header)
            .map_err(|e| SessionError::InvalidArgument(format!("envelope header: {}", e)))?;

        let mut bytes = Vec::with_capacity(FIXED_PREAMBLE_SIZE + header_bytes.len());
        bytes.extend_from_slice(MAGIC);
        bytes.push(ENVELOPE_VERSION);
        bytes.push(mode as u8);
        bytes.push(framing as u8);
        bytes.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&header_bytes);

        Ok(Self {
            mode,
            framing,
            header,
            bytes,
        })
    }

    /// Parse the fixed part, returning mode, framing and header length
    fn parse_fixed(fixed: &[u8]) -> Result<(Mode, Framing, usize), SessionError> {
        if fixed.len() < FIXED_PREAMBLE_SIZE || &fixed[..4] != MAGIC {
            return Err(malformed("bad magic"));
        }
        if fixed[4] != ENVELOPE_VERSION {
            return Err(malformed("unsupported version"));
        }
        let mode = match fixed[5] {
            0 => Mode::Unsigned,
            1 => Mode::Signed,
            _ => return Err(malformed("unknown mode")),
        };
        let framing = match fixed[6] {
            0 => Framing::Whole,
            1 => Framing::Stream,
            _ => return Err(malformed("unknown framing")),
        };
        let mut len = [0u8; 4];
        len.copy_from_slice(&fixed[7..FIXED_PREAMBLE_SIZE]);
        let header_len = u32::from_be_bytes(len) as usize;
        if header_len > MAX_HEADER_SIZE {
            return Err(malformed("header too large"));
        }
        Ok((mode, framing, header_len))
    }

    fn from_parts(
        mode: Mode,
        framing: Framing,
        fixed: &[u8],
        header_bytes: &[u8],
    ) -> Result<Self, SessionError> {
        let header: Header =
            bincode::deserialize(header_bytes).map_err(|_| malformed("bad header"))?;
        let expected_nonce = match framing {
            Framing::Whole => NONCE_SIZE,
            Framing::Stream => super::stream::STREAM_NONCE_SIZE,
        };
        if header.nonce.len() != expected_nonce {
            return Err(malformed("bad nonce size"));
        }

        let mut bytes = Vec::with_capacity(fixed.len() + header_bytes.len());
        bytes.extend_from_slice(fixed);
        bytes.extend_from_slice(header_bytes);
        Ok(Self {
            mode,
            framing,
            header,
            bytes,
        })
    }

    /// Parse a preamble from the front of `data`, returning it and the body
    pub(crate) fn parse(data: &[u8]) -> Result<(Self, &[u8]), SessionError> {
        let (mode, framing, header_len) = Self::parse_fixed(data)?;
        let end = FIXED_PREAMBLE_SIZE + header_len;
        if data.len() < end {
            return Err(malformed("truncated header"));
        }
        let preamble = Self::from_parts(
            mode,
            framing,
            &data[..FIXED_PREAMBLE_SIZE],
            &data[FIXED_PREAMBLE_SIZE..end],
        )?;
        Ok((preamble, &data[end..]))
    }

    /// Read a preamble off the front of a stream
    pub(crate) async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, SessionError> {
        let mut fixed = [0u8; FIXED_PREAMBLE_SIZE];
        read_exact_or_malformed(reader, &mut fixed).await?;
        let (mode, framing, header_len) = Self::parse_fixed(&fixed)?;
        let mut header_bytes = vec![0u8; header_len];
        read_exact_or_malformed(reader, &mut header_bytes).await?;
        Self::from_parts(mode, framing, &fixed, &header_bytes)
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn nonce(&self) -> &[u8] {
        &self.header.nonce
    }

    pub(crate) fn recipient_count(&self) -> usize {
        self.header.recipients.len()
    }

    /// Recover the content key with `me`; not being a recipient is `DecryptionFailed`
    pub(crate) fn content_key(&self, me: &SecretKey) -> Result<Secret, SessionError> {
        let key_id = me.public().key_id();
        let recipient = self
            .header
            .recipients
            .iter()
            .find(|r| r.key_id == key_id)
            .ok_or_else(|| malformed("not a recipient"))?;
        recipient
            .share
            .recover(me)
            .map_err(|_| SessionError::DecryptionFailed)
    }

    /// Reject envelopes whose mode does not match what the caller asked for
    pub(crate) fn check_mode(&self, expect_signed: bool) -> Result<(), SessionError> {
        match (self.mode, expect_signed) {
            (Mode::Signed, false) => Err(SessionError::InvalidArgument(
                "envelope is signed; decrypt it with auth_decrypt".into(),
            )),
            (Mode::Unsigned, true) => Err(SessionError::VerificationFailed),
            _ => Ok(()),
        }
    }
}

async fn read_exact_or_malformed<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), SessionError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(malformed("truncated")),
        Err(e) => Err(e.into()),
    }
}

/// Running digest of preamble and plaintext for envelope signatures
pub(crate) struct SignatureDigest(blake3::Hasher);

impl SignatureDigest {
    pub(crate) fn new(preamble: &Preamble) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(preamble.bytes());
        Self(hasher)
    }

    pub(crate) fn update(&mut self, plaintext: &[u8]) {
        self.0.update(plaintext);
    }

    fn message(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(SIGN_CONTEXT.len() + 32);
        message.extend_from_slice(SIGN_CONTEXT);
        message.extend_from_slice(self.0.finalize().as_bytes());
        message
    }

    pub(crate) fn sign(&self, crypto: &dyn CryptoProvider, signer: &SecretKey) -> Signature {
        crypto.sign(signer, &self.message())
    }

    /// Check a signature carried in the payload; anything wrong is `VerificationFailed`
    pub(crate) fn verify(
        &self,
        crypto: &dyn CryptoProvider,
        sender: &PublicKey,
        signature: &[u8],
    ) -> Result<(), SessionError> {
        let signature =
            Signature::from_slice(signature).map_err(|_| SessionError::VerificationFailed)?;
        if crypto.verify(sender, &self.message(), &signature) {
            Ok(())
        } else {
            Err(SessionError::VerificationFailed)
        }
    }
}

/// A fresh random content key
pub(crate) fn content_key(crypto: &dyn CryptoProvider) -> Result<Secret, SessionError> {
    let mut bytes = Zeroizing::new([0u8; SECRET_SIZE]);
    crypto.random_bytes(&mut bytes[..])?;
    Ok(Secret::from(*bytes))
}

/// Encrypt `plaintext` for `recipients` as one AEAD message, signing it if `signer` is set
pub(crate) fn seal(
    crypto: &dyn CryptoProvider,
    plaintext: &[u8],
    recipients: &[PublicKey],
    signer: Option<&SecretKey>,
) -> Result<Vec<u8>, SessionError> {
    let key = content_key(crypto)?;
    let mut nonce = [0u8; NONCE_SIZE];
    crypto.random_bytes(&mut nonce)?;

    let mode = if signer.is_some() {
        Mode::Signed
    } else {
        Mode::Unsigned
    };
    let preamble = Preamble::build(&key, recipients, mode, Framing::Whole, nonce.to_vec())?;

    let payload = match signer {
        Some(signer) => {
            let mut digest = SignatureDigest::new(&preamble);
            digest.update(plaintext);
            let signature = digest.sign(crypto, signer);

            let mut payload = Zeroizing::new(Vec::with_capacity(SIGNATURE_SIZE + plaintext.len()));
            payload.extend_from_slice(&signature.to_bytes());
            payload.extend_from_slice(plaintext);
            payload
        }
        None => Zeroizing::new(plaintext.to_vec()),
    };

    let body = crypto.aead_encrypt(&key, &nonce, &payload, preamble.bytes())?;

    let mut out = Vec::with_capacity(preamble.bytes().len() + body.len());
    out.extend_from_slice(preamble.bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decrypt an envelope made by [`seal`]
///
/// With `sender` set the envelope must be signed by that key; without it the
///  envelope must be unsigned.
pub(crate) fn open(
    crypto: &dyn CryptoProvider,
    envelope: &[u8],
    me: &SecretKey,
    sender: Option<&PublicKey>,
) -> Result<Vec<u8>, SessionError> {
    let (preamble, body) = Preamble::parse(envelope)?;
    if preamble.framing != Framing::Whole {
        return Err(SessionError::InvalidArgument(
            "envelope is a stream; decrypt it with decrypt_stream".into(),
        ));
    }
    preamble.check_mode(sender.is_some())?;
    if body.len() < TAG_SIZE {
        return Err(malformed("truncated body"));
    }

    let key = preamble.content_key(me)?;
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(preamble.nonce());

    let payload = match crypto.aead_decrypt(&key, &nonce, body, preamble.bytes()) {
        Ok(payload) => payload,
        Err(CryptoError::Aead) => return Err(SessionError::DecryptionFailed),
        Err(e) => return Err(e.into()),
    };

    match sender {
        None => Ok(payload),
        Some(sender) => {
            if payload.len() < SIGNATURE_SIZE {
                return Err(SessionError::VerificationFailed);
            }
            let (signature, plaintext) = payload.split_at(SIGNATURE_SIZE);
            let mut digest = SignatureDigest::new(&preamble);
            digest.update(plaintext);
            digest.verify(crypto, sender, signature)?;
            Ok(plaintext.to_vec())
        }
    }
}
