//! Encryption between identities
//!
//! Every envelope is addressed to the session's own key in addition to the
//! given recipients, so a sender can always read what it sent. Plain
//! envelopes go through [`Session::encrypt`] / [`Session::decrypt`]; envelopes
//! whose sender must be proven go through the `auth_*` variants, which fail
//! closed with [`SessionError::VerificationFailed`].

mod envelope;
mod stream;

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};

use crate::card::Card;
use crate::crypto::{PublicKey, SecretKey};
use crate::error::SessionError;
use crate::session::Session;

impl Session {
    /// The local key plus everyone it should be addressed to, own key first
    async fn sender_and_recipients(
        &self,
        recipients: impl Iterator<Item = PublicKey>,
    ) -> Result<(SecretKey, Vec<PublicKey>), SessionError> {
        let me = self.local_key().await?;
        let mut all = vec![me.public()];
        all.extend(recipients);
        Ok((me, all))
    }

    /// Resolve which key the sender signs with; `None` is this identity
    async fn sender_key(&self, sender: Option<&Card>) -> Result<PublicKey, SessionError> {
        match sender {
            Some(card) => Ok(*card.public_key()),
            None => Ok(self.local_key().await?.public()),
        }
    }

    /// Encrypt for `recipients` and this identity; an empty list encrypts to self
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        recipients: &[PublicKey],
    ) -> Result<Vec<u8>, SessionError> {
        let (_, recipients) = self
            .sender_and_recipients(recipients.iter().copied())
            .await?;
        envelope::seal(self.crypto(), plaintext, &recipients, None)
    }

    /// Decrypt an unsigned envelope addressed to this identity
    pub async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let me = self.local_key().await?;
        envelope::open(self.crypto(), ciphertext, &me, None)
    }

    /// Sign with the local key and encrypt for the holders of `recipients`
    pub async fn auth_encrypt(
        &self,
        plaintext: &[u8],
        recipients: &[Card],
    ) -> Result<Vec<u8>, SessionError> {
        let (me, recipients) = self
            .sender_and_recipients(recipients.iter().map(|card| *card.public_key()))
            .await?;
        envelope::seal(self.crypto(), plaintext, &recipients, Some(&me))
    }

    /// Decrypt and verify the signature against `sender`'s card
    ///
    /// `None` expects a message this identity signed itself.
    pub async fn auth_decrypt(
        &self,
        ciphertext: &[u8],
        sender: Option<&Card>,
    ) -> Result<Vec<u8>, SessionError> {
        let me = self.local_key().await?;
        let sender = self.sender_key(sender).await?;
        envelope::open(self.crypto(), ciphertext, &me, Some(&sender))
    }

    /// Like [`Session::auth_decrypt`], verifying against the key `sender` held at `date`
    ///
    /// Walks the card's history, so messages signed before a key rotation still
    ///  verify. `sender` must come from a lookup that linked its history.
    pub async fn auth_decrypt_at(
        &self,
        ciphertext: &[u8],
        sender: &Card,
        date: DateTime<Utc>,
    ) -> Result<Vec<u8>, SessionError> {
        let card = sender.card_at(date).ok_or(SessionError::VerificationFailed)?;
        self.auth_decrypt(ciphertext, Some(card)).await
    }

    /// [`Session::encrypt`] with base64 output
    pub async fn encrypt_text(
        &self,
        text: &str,
        recipients: &[PublicKey],
    ) -> Result<String, SessionError> {
        Ok(STANDARD.encode(self.encrypt(text.as_bytes(), recipients).await?))
    }

    pub async fn decrypt_text(&self, text: &str) -> Result<String, SessionError> {
        let plaintext = self.decrypt(&decode_text(text)?).await?;
        String::from_utf8(plaintext)
            .map_err(|_| SessionError::InvalidArgument("decrypted data is not utf-8".into()))
    }

    pub async fn auth_encrypt_text(
        &self,
        text: &str,
        recipients: &[Card],
    ) -> Result<String, SessionError> {
        Ok(STANDARD.encode(self.auth_encrypt(text.as_bytes(), recipients).await?))
    }

    pub async fn auth_decrypt_text(
        &self,
        text: &str,
        sender: Option<&Card>,
    ) -> Result<String, SessionError> {
        let plaintext = self.auth_decrypt(&decode_text(text)?, sender).await?;
        String::from_utf8(plaintext)
            .map_err(|_| SessionError::InvalidArgument("decrypted data is not utf-8".into()))
    }

    /// Encrypt from `reader` to `writer` in chunks of `stream_chunk_size`
    ///
    /// Returns the number of plaintext bytes read.
    pub async fn encrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        recipients: &[PublicKey],
    ) -> Result<u64, SessionError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let (_, recipients) = self
            .sender_and_recipients(recipients.iter().copied())
            .await?;
        stream::seal_stream(
            self.crypto(),
            reader,
            writer,
            &recipients,
            None,
            self.inner.config.stream_chunk_size,
        )
        .await
    }

    /// Decrypt an unsigned stream envelope
    ///
    /// On error `writer` may already hold part of the plaintext; discard it.
    pub async fn decrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<u64, SessionError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let me = self.local_key().await?;
        stream::open_stream(self.crypto(), reader, writer, &me, None).await
    }

    pub async fn auth_encrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        recipients: &[Card],
    ) -> Result<u64, SessionError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let (me, recipients) = self
            .sender_and_recipients(recipients.iter().map(|card| *card.public_key()))
            .await?;
        stream::seal_stream(
            self.crypto(),
            reader,
            writer,
            &recipients,
            Some(&me),
            self.inner.config.stream_chunk_size,
        )
        .await
    }

    /// Decrypt a signed stream envelope
    ///
    /// The final chunk is only written after the signature verifies. Earlier
    ///  chunks are authenticated but written before that, so on
    ///  `VerificationFailed` the writer must be discarded.
    pub async fn auth_decrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        sender: Option<&Card>,
    ) -> Result<u64, SessionError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let me = self.local_key().await?;
        let sender = self.sender_key(sender).await?;
        stream::open_stream(self.crypto(), reader, writer, &me, Some(&sender)).await
    }

    /// Stream-encrypt the file at `input` into `output`
    ///
    /// A partially written `output` is removed on failure.
    pub async fn encrypt_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        recipients: &[PublicKey],
    ) -> Result<u64, SessionError> {
        let output = output.as_ref();
        let mut reader = BufReader::new(tokio::fs::File::open(input.as_ref()).await?);
        let mut writer = BufWriter::new(tokio::fs::File::create(output).await?);

        let result = self.encrypt_stream(&mut reader, &mut writer, recipients).await;
        finish_file(result, writer, output).await
    }

    /// Decrypt a file produced by [`Session::encrypt_file`]
    ///
    /// A partially written `output` is removed on failure.
    pub async fn decrypt_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<u64, SessionError> {
        let output = output.as_ref();
        let mut reader = BufReader::new(tokio::fs::File::open(input.as_ref()).await?);
        let mut writer = BufWriter::new(tokio::fs::File::create(output).await?);

        let result = self.decrypt_stream(&mut reader, &mut writer).await;
        finish_file(result, writer, output).await
    }

    pub async fn auth_encrypt_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        recipients: &[Card],
    ) -> Result<u64, SessionError> {
        let output = output.as_ref();
        let mut reader = BufReader::new(tokio::fs::File::open(input.as_ref()).await?);
        let mut writer = BufWriter::new(tokio::fs::File::create(output).await?);

        let result = self
            .auth_encrypt_stream(&mut reader, &mut writer, recipients)
            .await;
        finish_file(result, writer, output).await
    }

    pub async fn auth_decrypt_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        sender: Option<&Card>,
    ) -> Result<u64, SessionError> {
        let output = output.as_ref();
        let mut reader = BufReader::new(tokio::fs::File::open(input.as_ref()).await?);
        let mut writer = BufWriter::new(tokio::fs::File::create(output).await?);

        let result = self
            .auth_decrypt_stream(&mut reader, &mut writer, sender)
            .await;
        finish_file(result, writer, output).await
    }
}

fn decode_text(text: &str) -> Result<Vec<u8>, SessionError> {
    STANDARD
        .decode(text.trim())
        .map_err(|_| SessionError::InvalidArgument("ciphertext is not valid base64".into()))
}

/// Close the output file, removing it if the operation failed
async fn finish_file(
    result: Result<u64, SessionError>,
    writer: BufWriter<tokio::fs::File>,
    output: &Path,
) -> Result<u64, SessionError> {
    drop(writer);
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(output).await {
            tracing::warn!(path = %output.display(), error = %e, "failed to remove partial output");
        }
    }
    result
}
