use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::provider::{DirectoryClient, DirectoryError, MAX_SEARCH_IDENTITIES};
use crate::card::Card;
use crate::crypto::DefaultCryptoProvider;
use crate::token::AccessToken;

/// Directory operations that can have a failure injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryOp {
    Publish,
    Search,
    Revoke,
}

/// In-memory directory
///
/// Clones share state, so one instance can serve many sessions as a
///  stand-in for the hosted service. Latency and one-shot failures can be
///  injected to exercise timeout, transport and rollback paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<RwLock<MemoryDirectoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryDirectoryInner {
    /// Every card ever published, in publish order
    cards: Vec<Card>,
    /// Ids of revoked cards
    revoked: HashSet<String>,
    /// Failures returned by the next call of an operation
    faults: HashMap<DirectoryOp, DirectoryError>,
    latency: Option<Duration>,
    search_calls: usize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner.write().latency = latency;
    }

    /// Fail the next call of `op` with `error`
    pub fn fail_next(&self, op: DirectoryOp, error: DirectoryError) {
        self.inner.write().faults.insert(op, error);
    }

    /// Number of search requests served (a batch counts once)
    pub fn search_calls(&self) -> usize {
        self.inner.read().search_calls
    }

    /// Insert a card as-is, bypassing ownership and supersession checks
    ///
    /// Lets tests build conflict states a well-behaved client never produces.
    pub fn insert_unchecked(&self, card: Card) {
        self.inner.write().cards.push(card);
    }

    async fn enter(&self, op: DirectoryOp) -> Result<(), DirectoryError> {
        let latency = self.inner.read().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut inner = self.inner.write();
        if op == DirectoryOp::Search {
            inner.search_calls += 1;
        }
        match inner.faults.remove(&op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn check_token(token: &AccessToken) -> Result<(), DirectoryError> {
    if token.is_empty() {
        return Err(DirectoryError::Unauthorized("empty access token".into()));
    }
    Ok(())
}

impl MemoryDirectoryInner {
    fn live_cards(&self, identity: &str) -> Vec<Card> {
        let live: Vec<&Card> = self
            .cards
            .iter()
            .filter(|card| card.identity() == identity && !self.revoked.contains(card.card_id()))
            .collect();
        let superseded: HashSet<&str> = live
            .iter()
            .filter_map(|card| card.previous_card_id())
            .collect();

        let (current, older): (Vec<&Card>, Vec<&Card>) = live
            .into_iter()
            .partition(|card| !superseded.contains(card.card_id()));
        current.into_iter().chain(older).cloned().collect()
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn publish(&self, token: &AccessToken, card: Card) -> Result<String, DirectoryError> {
        self.enter(DirectoryOp::Publish).await?;
        check_token(token)?;

        if token.identity() != card.identity() {
            return Err(DirectoryError::Unauthorized(format!(
                "token for {} cannot publish a card for {}",
                token.identity(),
                card.identity()
            )));
        }
        if !card.verify_self_signature(&DefaultCryptoProvider) {
            return Err(DirectoryError::Invalid("card self-signature does not verify".into()));
        }

        let mut inner = self.inner.write();

        if inner.cards.iter().any(|c| c.card_id() == card.card_id()) {
            return Err(DirectoryError::Conflict(format!(
                "card {} already exists",
                card.card_id()
            )));
        }

        if let Some(previous_id) = card.previous_card_id() {
            let previous = inner
                .cards
                .iter()
                .find(|c| c.card_id() == previous_id)
                .ok_or_else(|| {
                    DirectoryError::Conflict(format!("previous card {} is unknown", previous_id))
                })?;
            if previous.identity() != card.identity() || inner.revoked.contains(previous_id) {
                return Err(DirectoryError::Conflict(format!(
                    "previous card {} cannot be superseded",
                    previous_id
                )));
            }
            if inner
                .cards
                .iter()
                .any(|c| c.previous_card_id() == Some(previous_id))
            {
                return Err(DirectoryError::Conflict(format!(
                    "previous card {} is already superseded",
                    previous_id
                )));
            }
        }

        let card_id = card.card_id().to_string();
        tracing::debug!(identity = card.identity(), card_id = %card_id, "card published");
        inner.cards.push(card);
        Ok(card_id)
    }

    async fn search(
        &self,
        token: &AccessToken,
        identity: &str,
    ) -> Result<Vec<Card>, DirectoryError> {
        self.enter(DirectoryOp::Search).await?;
        check_token(token)?;
        Ok(self.inner.read().live_cards(identity))
    }

    async fn search_many(
        &self,
        token: &AccessToken,
        identities: &[String],
    ) -> Result<HashMap<String, Vec<Card>>, DirectoryError> {
        self.enter(DirectoryOp::Search).await?;
        check_token(token)?;
        if identities.len() > MAX_SEARCH_IDENTITIES {
            return Err(DirectoryError::Invalid(format!(
                "at most {} identities per search, got {}",
                MAX_SEARCH_IDENTITIES,
                identities.len()
            )));
        }

        let inner = self.inner.read();
        Ok(identities
            .iter()
            .map(|identity| (identity.clone(), inner.live_cards(identity)))
            .collect())
    }

    async fn revoke(&self, token: &AccessToken, card_id: &str) -> Result<(), DirectoryError> {
        self.enter(DirectoryOp::Revoke).await?;
        check_token(token)?;

        let mut inner = self.inner.write();
        let card = inner
            .cards
            .iter()
            .find(|c| c.card_id() == card_id && !inner.revoked.contains(c.card_id()))
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(card_id.to_string()))?;

        if card.identity() != token.identity() {
            return Err(DirectoryError::Unauthorized(format!(
                "token for {} cannot revoke a card of {}",
                token.identity(),
                card.identity()
            )));
        }

        let mut next = Some(card.card_id().to_string());
        while let Some(id) = next.take() {
            if !inner.revoked.insert(id.clone()) {
                break;
            }
            next = inner
                .cards
                .iter()
                .find(|c| c.card_id() == id)
                .and_then(|c| c.previous_card_id().map(str::to_string));
        }

        tracing::debug!(identity = card.identity(), card_id, "card revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;

    fn token(identity: &str) -> AccessToken {
        AccessToken::new(identity, "token")
    }

    fn card(identity: &str, previous: Option<&Card>) -> Card {
        let secret = SecretKey::generate().unwrap();
        Card::new(identity, &secret, previous, &DefaultCryptoProvider)
    }

    #[tokio::test]
    async fn test_publish_and_search() {
        let directory = MemoryDirectory::new();
        let alice = card("alice", None);

        let id = directory.publish(&token("alice"), alice.clone()).await.unwrap();
        assert_eq!(id, alice.card_id());

        let found = directory.search(&token("bob"), "alice").await.unwrap();
        assert_eq!(found, vec![alice]);

        assert!(directory.search(&token("bob"), "carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_for_other_identity_unauthorized() {
        let directory = MemoryDirectory::new();
        let result = directory.publish(&token("mallory"), card("alice", None)).await;
        assert!(matches!(result, Err(DirectoryError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_publish_same_card_twice_conflicts() {
        let directory = MemoryDirectory::new();
        let alice = card("alice", None);
        directory.publish(&token("alice"), alice.clone()).await.unwrap();
        assert!(matches!(
            directory.publish(&token("alice"), alice).await,
            Err(DirectoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_supersede_orders_current_first() {
        let directory = MemoryDirectory::new();
        let first = card("alice", None);
        let second = card("alice", Some(&first));

        directory.publish(&token("alice"), first.clone()).await.unwrap();
        directory.publish(&token("alice"), second.clone()).await.unwrap();

        let found = directory.search(&token("alice"), "alice").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].card_id(), second.card_id());
        assert_eq!(found[1].card_id(), first.card_id());
    }

    #[tokio::test]
    async fn test_supersede_twice_conflicts() {
        let directory = MemoryDirectory::new();
        let first = card("alice", None);
        directory.publish(&token("alice"), first.clone()).await.unwrap();
        directory
            .publish(&token("alice"), card("alice", Some(&first)))
            .await
            .unwrap();

        assert!(matches!(
            directory
                .publish(&token("alice"), card("alice", Some(&first)))
                .await,
            Err(DirectoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_retires_history() {
        let directory = MemoryDirectory::new();
        let first = card("alice", None);
        let second = card("alice", Some(&first));
        directory.publish(&token("alice"), first).await.unwrap();
        directory.publish(&token("alice"), second.clone()).await.unwrap();

        assert!(matches!(
            directory.revoke(&token("bob"), second.card_id()).await,
            Err(DirectoryError::Unauthorized(_))
        ));

        directory.revoke(&token("alice"), second.card_id()).await.unwrap();
        assert!(directory.search(&token("alice"), "alice").await.unwrap().is_empty());

        assert!(matches!(
            directory.revoke(&token("alice"), second.card_id()).await,
            Err(DirectoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_search_many_limits_batch_size() {
        let directory = MemoryDirectory::new();
        let identities: Vec<String> = (0..=MAX_SEARCH_IDENTITIES).map(|i| format!("u{i}")).collect();
        assert!(matches!(
            directory.search_many(&token("alice"), &identities).await,
            Err(DirectoryError::Invalid(_))
        ));

        let found = directory
            .search_many(&token("alice"), &identities[..3])
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
        assert!(found.values().all(|cards| cards.is_empty()));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let directory = MemoryDirectory::new();
        directory.fail_next(DirectoryOp::Search, DirectoryError::Network("reset".into()));

        assert!(matches!(
            directory.search(&token("alice"), "alice").await,
            Err(DirectoryError::Network(_))
        ));
        assert!(directory.search(&token("alice"), "alice").await.is_ok());
        assert_eq!(directory.search_calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let directory = MemoryDirectory::new();
        assert!(matches!(
            directory.search(&AccessToken::new("alice", ""), "alice").await,
            Err(DirectoryError::Unauthorized(_))
        ));
    }
}
