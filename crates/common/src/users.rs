//! Looking up other identities' cards
//!
//! Every card coming back from the directory is checked before use: its
//! self-signature must verify and it must name the identity that was asked
//! for. Cards failing either check are dropped. What remains is reduced to the
//! current cards; anything other than exactly one is an error for that
//! identity.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use parking_lot::RwLock;

use crate::card::{link_history, Card};
use crate::crypto::PublicKey;
use crate::directory::MAX_SEARCH_IDENTITIES;
use crate::error::SessionError;
use crate::session::Session;

struct CachedCard {
    card: Card,
    fetched_at: Instant,
}

/// Short-lived cache of resolved cards, keyed by identity
pub(crate) struct CardCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedCard>>,
}

impl CardCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A cached card younger than the ttl
    fn fresh(&self, identity: &str) -> Option<Card> {
        self.entries
            .read()
            .get(identity)
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| cached.card.clone())
    }

    /// A cached card of any age
    fn any(&self, identity: &str) -> Option<Card> {
        self.entries
            .read()
            .get(identity)
            .map(|cached| cached.card.clone())
    }

    pub(crate) fn insert(&self, card: Card) {
        self.entries.write().insert(
            card.identity().to_string(),
            CachedCard {
                card,
                fetched_at: Instant::now(),
            },
        );
    }

    pub(crate) fn remove(&self, identity: &str) {
        self.entries.write().remove(identity);
    }

    fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.entries.read().keys().cloned().collect();
        identities.sort();
        identities
    }
}

/// Outcome of a batch lookup that tolerates per-identity failures
///
/// Every requested identity lands in exactly one of the two maps.
#[derive(Debug, Default)]
pub struct FindUsersReport {
    pub found: HashMap<String, Card>,
    pub failed: HashMap<String, SessionError>,
}

fn dedup_identities(identities: &[impl AsRef<str>]) -> Result<Vec<String>, SessionError> {
    if identities.is_empty() {
        return Err(SessionError::InvalidArgument("no identities given".into()));
    }
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(identities.len());
    for identity in identities {
        let identity = identity.as_ref();
        if identity.trim().is_empty() {
            return Err(SessionError::InvalidArgument("identity must not be empty".into()));
        }
        if seen.insert(identity) {
            unique.push(identity.to_string());
        }
    }
    Ok(unique)
}

impl Session {
    /// Reduce what the directory returned for `identity` to its single current card
    fn resolve_cards(&self, identity: &str, cards: Vec<Card>) -> Result<Card, SessionError> {
        let crypto = self.crypto();
        let total = cards.len();
        let valid: Vec<Card> = cards
            .into_iter()
            .filter(|card| card.identity() == identity && card.verify_self_signature(crypto))
            .collect();
        if valid.len() != total {
            tracing::warn!(identity, dropped = total - valid.len(), "dropped cards failing verification");
        }

        let mut current = link_history(valid);
        match current.len() {
            0 => Err(SessionError::UserNotFound(identity.to_string())),
            1 => Ok(current.remove(0)),
            n => {
                tracing::warn!(identity, cards = n, "duplicate current cards");
                Err(SessionError::DuplicateCards(identity.to_string()))
            }
        }
    }

    /// Look up the current card of `identity`
    ///
    /// Served from cache unless `force_reload` is set or the entry expired.
    pub async fn find_user(&self, identity: &str, force_reload: bool) -> Result<Card, SessionError> {
        let mut found = self.find_users(&[identity], force_reload).await?;
        found
            .remove(identity)
            .ok_or_else(|| SessionError::UserNotFound(identity.to_string()))
    }

    /// Look up the current cards of several identities, all or nothing
    ///
    /// Fails on the first identity (in sorted order) that has no card or has
    ///  duplicate cards; use [`Session::find_users_partial`] to get the rest anyway.
    pub async fn find_users<S: AsRef<str>>(
        &self,
        identities: &[S],
        force_reload: bool,
    ) -> Result<HashMap<String, Card>, SessionError> {
        let report = self.find_users_partial(identities, force_reload).await?;
        if let Some(identity) = report.failed.keys().min().cloned() {
            let mut failed = report.failed;
            if let Some(error) = failed.remove(&identity) {
                return Err(error);
            }
        }
        Ok(report.found)
    }

    /// Look up several identities, reporting per-identity failures separately
    ///
    /// Batches of up to [`MAX_SEARCH_IDENTITIES`] are searched concurrently.
    ///  Only failures that affect the whole batch (transport, auth, timeout,
    ///  cancellation, invalid input) are returned as `Err`.
    pub async fn find_users_partial<S: AsRef<str>>(
        &self,
        identities: &[S],
        force_reload: bool,
    ) -> Result<FindUsersReport, SessionError> {
        let identities = dedup_identities(identities)?;
        let mut report = FindUsersReport::default();

        let mut missing = Vec::new();
        for identity in identities {
            match self.inner.cards.fresh(&identity).filter(|_| !force_reload) {
                Some(card) => {
                    tracing::debug!(identity = %identity, "card cache hit");
                    report.found.insert(identity, card);
                }
                None => missing.push(identity),
            }
        }
        if missing.is_empty() {
            return Ok(report);
        }

        let token = self.token().await?;
        let searches = missing.chunks(MAX_SEARCH_IDENTITIES).map(|chunk| {
            self.remote("search cards", self.inner.directory.search_many(&token, chunk))
        });
        let batches = try_join_all(searches).await?;

        for (chunk, mut results) in missing.chunks(MAX_SEARCH_IDENTITIES).zip(batches) {
            for identity in chunk {
                let cards = results.remove(identity).unwrap_or_default();
                match self.resolve_cards(identity, cards) {
                    Ok(card) => {
                        self.inner.cards.insert(card.clone());
                        report.found.insert(identity.clone(), card);
                    }
                    Err(e) => {
                        report.failed.insert(identity.clone(), e);
                    }
                }
            }
        }

        tracing::debug!(
            found = report.found.len(),
            failed = report.failed.len(),
            "users looked up"
        );
        Ok(report)
    }

    /// A card previously looked up, without touching the network
    pub fn find_cached_user(&self, identity: &str) -> Result<Card, SessionError> {
        self.inner
            .cards
            .any(identity)
            .ok_or_else(|| SessionError::UserNotFound(identity.to_string()))
    }

    pub fn find_cached_users<S: AsRef<str>>(
        &self,
        identities: &[S],
    ) -> Result<HashMap<String, Card>, SessionError> {
        dedup_identities(identities)?
            .into_iter()
            .map(|identity| {
                let card = self.find_cached_user(&identity)?;
                Ok((identity, card))
            })
            .collect()
    }

    /// Current public keys of `identities`, always fetched from the directory
    pub async fn lookup_public_keys<S: AsRef<str>>(
        &self,
        identities: &[S],
    ) -> Result<HashMap<String, PublicKey>, SessionError> {
        Ok(self
            .find_users(identities, true)
            .await?
            .into_iter()
            .map(|(identity, card)| (identity, *card.public_key()))
            .collect())
    }

    /// Re-fetch every cached identity, returning how many cards changed
    ///
    /// Identities that no longer resolve to exactly one card are evicted.
    pub async fn refresh_cached_users(&self) -> Result<usize, SessionError> {
        let identities = self.inner.cards.identities();
        if identities.is_empty() {
            return Ok(0);
        }

        let before: HashMap<String, String> = identities
            .iter()
            .filter_map(|identity| {
                self.inner
                    .cards
                    .any(identity)
                    .map(|card| (identity.clone(), card.card_id().to_string()))
            })
            .collect();

        let report = self.find_users_partial(&identities, true).await?;

        let mut changed = 0;
        for (identity, card) in &report.found {
            if before.get(identity).map(String::as_str) != Some(card.card_id()) {
                tracing::info!(identity = %identity, card_id = card.card_id(), "card changed");
                changed += 1;
            }
        }
        for (identity, error) in &report.failed {
            tracing::warn!(identity = %identity, error = %error, "evicting cached card");
            self.inner.cards.remove(identity);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_identities() {
        let unique = dedup_identities(&["bob", "alice", "bob"]).unwrap();
        assert_eq!(unique, vec!["bob", "alice"]);

        let empty: [&str; 0] = [];
        assert!(matches!(
            dedup_identities(&empty),
            Err(SessionError::InvalidArgument(_))
        ));
        assert!(matches!(
            dedup_identities(&["alice", ""]),
            Err(SessionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_cache_ttl() {
        use crate::crypto::{DefaultCryptoProvider, SecretKey};

        let card = Card::new(
            "alice",
            &SecretKey::generate().unwrap(),
            None,
            &DefaultCryptoProvider,
        );

        let expired = CardCache::new(Duration::ZERO);
        expired.insert(card.clone());
        assert!(expired.fresh("alice").is_none());
        assert_eq!(expired.any("alice"), Some(card.clone()));

        let cache = CardCache::new(Duration::from_secs(60));
        cache.insert(card.clone());
        assert_eq!(cache.fresh("alice"), Some(card));
        cache.remove("alice");
        assert!(cache.any("alice").is_none());
    }
}
