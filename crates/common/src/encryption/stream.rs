//! Chunked envelopes for payloads that should not be held in memory
//!
//! The body of a stream envelope is a sequence of frames:
//!
//! ```text
//! [ flag u8 (0 = more, 1 = last) ][ len u32 BE ][ ciphertext ]
//! ```
//!
//! Chunks are sealed with the STREAM construction (big-endian 32-bit counter,
//! last-chunk flag folded into the nonce), so reordering, dropping or
//! truncating chunks fails authentication. For signed streams the signature
//! rides at the end of the last chunk and the last chunk's plaintext is only
//! written once it verifies.
//!
//! Earlier chunks are authenticated per frame and written as they arrive, before
//! the signature has been checked. A writer that saw `VerificationFailed` holds
//! plaintext from an unverified sender and must be discarded, not consumed.

use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::stream::{DecryptorBE32, EncryptorBE32};
use chacha20poly1305::aead::Payload;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::envelope::{content_key, Framing, Mode, Preamble, SignatureDigest};
use crate::config::MAX_STREAM_CHUNK_SIZE;
use crate::crypto::{CryptoError, CryptoProvider, PublicKey, SecretKey, SIGNATURE_SIZE, TAG_SIZE};
use crate::error::SessionError;

/// STREAM nonce prefix: 12 byte AEAD nonce minus the 5 byte counter/flag suffix
pub(crate) const STREAM_NONCE_SIZE: usize = 7;

const FLAG_MORE: u8 = 0;
const FLAG_LAST: u8 = 1;
const MAX_FRAME_SIZE: usize = MAX_STREAM_CHUNK_SIZE + TAG_SIZE + SIGNATURE_SIZE;

/// Fill `buf` from `reader`, stopping early only at end of input
async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize, SessionError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    flag: u8,
    ciphertext: &[u8],
) -> Result<(), SessionError> {
    writer.write_u8(flag).await?;
    writer.write_u32(ciphertext.len() as u32).await?;
    writer.write_all(ciphertext).await?;
    Ok(())
}

/// Per-chunk associated data: a digest of the preamble
fn chunk_aad(preamble: &Preamble) -> [u8; 32] {
    *blake3::hash(preamble.bytes()).as_bytes()
}

/// Encrypt everything `reader` yields into `writer`
///
/// Returns the number of plaintext bytes consumed.
pub(crate) async fn seal_stream<R, W>(
    crypto: &dyn CryptoProvider,
    reader: &mut R,
    writer: &mut W,
    recipients: &[PublicKey],
    signer: Option<&SecretKey>,
    chunk_size: usize,
) -> Result<u64, SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if chunk_size == 0 || chunk_size > MAX_STREAM_CHUNK_SIZE {
        return Err(SessionError::InvalidArgument(format!(
            "chunk size must be between 1 and {}",
            MAX_STREAM_CHUNK_SIZE
        )));
    }

    let key = content_key(crypto)?;
    let mut nonce = [0u8; STREAM_NONCE_SIZE];
    crypto.random_bytes(&mut nonce)?;

    let mode = if signer.is_some() {
        Mode::Signed
    } else {
        Mode::Unsigned
    };
    let preamble = Preamble::build(&key, recipients, mode, Framing::Stream, nonce.to_vec())?;
    let aad = chunk_aad(&preamble);
    let mut digest = SignatureDigest::new(&preamble);

    writer.write_all(preamble.bytes()).await?;

    let mut encryptor = EncryptorBE32::from_aead(key.cipher(), GenericArray::from_slice(&nonce));
    let mut current = vec![0u8; chunk_size];
    let mut next = vec![0u8; chunk_size];
    let mut current_len = read_chunk(reader, &mut current).await?;
    let mut total = 0u64;

    loop {
        let next_len = read_chunk(reader, &mut next).await?;
        let chunk = &current[..current_len];
        digest.update(chunk);
        total += current_len as u64;

        if next_len == 0 {
            let mut last = chunk.to_vec();
            if let Some(signer) = signer {
                last.extend_from_slice(&digest.sign(crypto, signer).to_bytes());
            }
            let ciphertext = encryptor
                .encrypt_last(Payload {
                    msg: &last,
                    aad: &aad,
                })
                .map_err(|_| SessionError::Crypto(CryptoError::Aead))?;
            write_frame(writer, FLAG_LAST, &ciphertext).await?;
            break;
        }

        let ciphertext = encryptor
            .encrypt_next(Payload {
                msg: chunk,
                aad: &aad,
            })
            .map_err(|_| SessionError::Crypto(CryptoError::Aead))?;
        write_frame(writer, FLAG_MORE, &ciphertext).await?;

        std::mem::swap(&mut current, &mut next);
        current_len = next_len;
    }

    writer.flush().await?;
    tracing::debug!(bytes = total, recipients = preamble.recipient_count(), "stream sealed");
    Ok(total)
}

/// Read one frame header; end of input here means the stream was cut short
async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<u8, SessionError> {
    let mut head = [0u8; 5];
    if read_chunk(reader, &mut head).await? != head.len() {
        return Err(SessionError::DecryptionFailed);
    }
    let flag = head[0];
    if flag != FLAG_MORE && flag != FLAG_LAST {
        return Err(SessionError::DecryptionFailed);
    }
    let len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize;
    if !(TAG_SIZE..=MAX_FRAME_SIZE).contains(&len) {
        return Err(SessionError::DecryptionFailed);
    }
    buf.resize(len, 0);
    if read_chunk(reader, buf).await? != len {
        return Err(SessionError::DecryptionFailed);
    }
    Ok(flag)
}

/// Decrypt a stream envelope from `reader` into `writer`
///
/// Returns the number of plaintext bytes written. On error the writer may
///  hold a prefix of the plaintext and must be discarded.
pub(crate) async fn open_stream<R, W>(
    crypto: &dyn CryptoProvider,
    reader: &mut R,
    writer: &mut W,
    me: &SecretKey,
    sender: Option<&PublicKey>,
) -> Result<u64, SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let preamble = Preamble::read(reader).await?;
    if preamble.framing != Framing::Stream {
        return Err(SessionError::InvalidArgument(
            "envelope is not a stream; decrypt it in memory".into(),
        ));
    }
    preamble.check_mode(sender.is_some())?;

    let key = preamble.content_key(me)?;
    let aad = chunk_aad(&preamble);
    let mut digest = SignatureDigest::new(&preamble);
    let mut decryptor = DecryptorBE32::from_aead(key.cipher(), GenericArray::from_slice(preamble.nonce()));

    let mut frame = Vec::new();
    let mut total = 0u64;

    loop {
        let flag = read_frame(reader, &mut frame).await?;

        if flag == FLAG_MORE {
            let plaintext = decryptor
                .decrypt_next(Payload {
                    msg: &frame,
                    aad: &aad,
                })
                .map_err(|_| SessionError::DecryptionFailed)?;
            digest.update(&plaintext);
            writer.write_all(&plaintext).await?;
            total += plaintext.len() as u64;
            continue;
        }

        let mut plaintext = decryptor
            .decrypt_last(Payload {
                msg: &frame,
                aad: &aad,
            })
            .map_err(|_| SessionError::DecryptionFailed)?;

        if let Some(sender) = sender {
            if plaintext.len() < SIGNATURE_SIZE {
                return Err(SessionError::VerificationFailed);
            }
            let signature = plaintext.split_off(plaintext.len() - SIGNATURE_SIZE);
            digest.update(&plaintext);
            digest.verify(crypto, sender, &signature)?;
        }

        // nothing may follow the last frame
        let mut probe = [0u8; 1];
        if reader.read(&mut probe).await? != 0 {
            return Err(SessionError::DecryptionFailed);
        }

        writer.write_all(&plaintext).await?;
        total += plaintext.len() as u64;
        break;
    }

    writer.flush().await?;
    Ok(total)
}
