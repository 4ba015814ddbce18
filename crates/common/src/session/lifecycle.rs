use super::Session;
use crate::card::{link_history, Card};
use crate::crypto::KeyPair;
use crate::error::SessionError;
use crate::token::AccessToken;

/// Whether this device holds the identity's private key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKeyState {
    Absent,
    Present,
}

impl Session {
    /// Local query, never touches the network
    pub async fn has_local_private_key(&self) -> Result<bool, SessionError> {
        Ok(self.inner.key_store.has(&self.inner.identity).await?)
    }

    pub async fn local_key_state(&self) -> Result<LocalKeyState, SessionError> {
        Ok(if self.has_local_private_key().await? {
            LocalKeyState::Present
        } else {
            LocalKeyState::Absent
        })
    }

    /// Generate a key pair, keep the private half on this device and publish a card
    ///
    /// # Errors
    ///
    /// * `AlreadyRegistered` - the identity already has a current card
    /// * `LocalKeyAlreadyPresent` - no card is published but this device holds a key
    /// * `CardPublishFailed` - publishing failed; the local key was removed again
    pub async fn register(&self) -> Result<Card, SessionError> {
        self.register_inner(None).await
    }

    /// [`Session::register`] with a caller-supplied key pair
    pub async fn register_with_key_pair(&self, key_pair: KeyPair) -> Result<Card, SessionError> {
        self.register_inner(Some(key_pair)).await
    }

    async fn register_inner(&self, key_pair: Option<KeyPair>) -> Result<Card, SessionError> {
        let _guard = self.begin_mutation()?;
        let identity = &self.inner.identity;

        let token = self.token().await?;
        let current = self.current_cards(&token).await?;
        if !current.is_empty() {
            return Err(SessionError::AlreadyRegistered(identity.clone()));
        }

        if self.has_local_private_key().await? {
            return Err(SessionError::LocalKeyAlreadyPresent);
        }

        let key_pair = match key_pair {
            Some(key_pair) => key_pair,
            None => self.crypto().generate_key_pair()?,
        };
        let card = Card::new(identity.as_str(), &key_pair.secret, None, self.crypto());

        self.store_and_publish(&token, &key_pair, card).await
    }

    /// Replace the identity's key after the old private key was lost
    ///
    /// Publishes a card superseding the current one. Anything encrypted for the
    ///  old key can no longer be decrypted.
    ///
    /// # Errors
    ///
    /// * `LocalKeyAlreadyPresent` - a key is still stored here; use it, or `cleanup` first
    /// * `UserNotFound` / `DuplicateCards` - there is not exactly one current card
    pub async fn rotate_private_key(&self) -> Result<Card, SessionError> {
        let _guard = self.begin_mutation()?;
        let identity = &self.inner.identity;

        if self.has_local_private_key().await? {
            return Err(SessionError::LocalKeyAlreadyPresent);
        }

        let token = self.token().await?;
        let previous = self.single_current_card(&token).await?;

        let key_pair = self.crypto().generate_key_pair()?;
        let card = Card::new(
            identity.as_str(),
            &key_pair.secret,
            Some(&previous),
            self.crypto(),
        );

        let card = self.store_and_publish(&token, &key_pair, card).await?;
        tracing::info!(
            identity = %identity,
            previous_card_id = previous.card_id(),
            card_id = card.card_id(),
            "private key rotated"
        );
        Ok(card)
    }

    /// Revoke the identity's card and delete the local key
    ///
    /// Backups are left alone. Other devices keep whatever keys they hold.
    pub async fn unregister(&self) -> Result<(), SessionError> {
        let _guard = self.begin_mutation()?;
        let identity = &self.inner.identity;

        let token = self.token().await?;
        let card = self.single_current_card(&token).await?;

        self.remote("revoke card", self.inner.directory.revoke(&token, card.card_id()))
            .await?;
        self.inner.key_store.delete(identity).await?;
        self.inner.cards.remove(identity);

        tracing::info!(identity = %identity, card_id = card.card_id(), "identity unregistered");
        Ok(())
    }

    /// Delete the local private key only; cards and backups are untouched
    pub async fn cleanup(&self) -> Result<(), SessionError> {
        let _guard = self.begin_mutation()?;
        let identity = &self.inner.identity;

        if !self.has_local_private_key().await? {
            return Err(SessionError::MissingPrivateKey);
        }
        self.inner.key_store.delete(identity).await?;

        tracing::info!(identity = %identity, "local private key removed");
        Ok(())
    }

    /// Persist the private key, then publish; undo the persist if publish fails
    async fn store_and_publish(
        &self,
        token: &AccessToken,
        key_pair: &KeyPair,
        card: Card,
    ) -> Result<Card, SessionError> {
        let identity = &self.inner.identity;
        self.inner.key_store.store(identity, &key_pair.secret).await?;

        match self
            .remote("publish card", self.inner.directory.publish(token, card.clone()))
            .await
        {
            Ok(card_id) => {
                tracing::info!(identity = %identity, card_id = %card_id, "card published");
                self.inner.cards.insert(card.clone());
                Ok(card)
            }
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "publish failed, rolling back local key");
                if let Err(rollback) = self.inner.key_store.delete(identity).await {
                    tracing::error!(identity = %identity, error = %rollback, "failed to roll back local key");
                }
                Err(match e {
                    SessionError::Cancelled | SessionError::Timeout(_) => e,
                    other => SessionError::CardPublishFailed(other.to_string()),
                })
            }
        }
    }

    /// The identity's own current cards, verified and history-linked
    async fn current_cards(&self, token: &AccessToken) -> Result<Vec<Card>, SessionError> {
        let identity = &self.inner.identity;
        let cards = self
            .remote("search cards", self.inner.directory.search(token, identity))
            .await?;
        let crypto = self.crypto();
        Ok(link_history(
            cards
                .into_iter()
                .filter(|card| {
                    card.identity() == identity.as_str() && card.verify_self_signature(crypto)
                })
                .collect(),
        ))
    }

    async fn single_current_card(&self, token: &AccessToken) -> Result<Card, SessionError> {
        let identity = &self.inner.identity;
        let mut current = self.current_cards(token).await?;
        match current.len() {
            0 => Err(SessionError::UserNotFound(identity.clone())),
            1 => Ok(current.remove(0)),
            n => {
                tracing::warn!(identity = %identity, cards = n, "duplicate current cards");
                Err(SessionError::DuplicateCards(identity.clone()))
            }
        }
    }
}
