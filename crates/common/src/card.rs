use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{CryptoProvider, PublicKey, SecretKey, Signature};

/// Signer name of the signature every card carries over its own snapshot
pub const SELF_SIGNER: &str = "self";

/// A signature over a card snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSignature {
    pub signer: String,
    pub signature: Signature,
}

/// The exact bytes a card's id and self-signature are computed over
#[derive(Serialize)]
struct CardSnapshot<'a> {
    identity: &'a str,
    public_key: [u8; 32],
    previous_card_id: Option<&'a str>,
    created_at_ms: i64,
}

/// A signed binding of an identity to a public key
///
/// Cards form a singly-linked history per identity through `previous_card_id`.
///  A card that some other card points back to is superseded; a card nothing
///  points to is current. An identity should have exactly one current card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    identity: String,
    public_key: PublicKey,
    card_id: String,
    previous_card_id: Option<String>,
    created_at: DateTime<Utc>,
    signatures: Vec<CardSignature>,
    /// Attached by [`link_history`], never on the wire
    #[serde(skip)]
    previous_card: Option<Box<Card>>,
    #[serde(skip)]
    is_outdated: bool,
}

impl Card {
    /// Create and self-sign a card binding `identity` to `secret`'s public key
    ///
    /// Pass the card being replaced as `previous` to supersede it.
    pub fn new(
        identity: impl Into<String>,
        secret: &SecretKey,
        previous: Option<&Card>,
        crypto: &dyn CryptoProvider,
    ) -> Self {
        let identity = identity.into();
        let public_key = secret.public();
        let previous_card_id = previous.map(|card| card.card_id.clone());
        let created_at = Utc::now();

        let snapshot = snapshot_bytes(
            &identity,
            &public_key,
            previous_card_id.as_deref(),
            &created_at,
        );
        let card_id = hex::encode(blake3::hash(&snapshot).as_bytes());
        let signature = crypto.sign(secret, &snapshot);

        Self {
            identity,
            public_key,
            card_id,
            previous_card_id,
            created_at,
            signatures: vec![CardSignature {
                signer: SELF_SIGNER.to_string(),
                signature,
            }],
            previous_card: None,
            is_outdated: false,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn card_id(&self) -> &str {
        &self.card_id
    }

    pub fn previous_card_id(&self) -> Option<&str> {
        self.previous_card_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn signatures(&self) -> &[CardSignature] {
        &self.signatures
    }

    /// The card this one superseded, if history was linked
    pub fn previous_card(&self) -> Option<&Card> {
        self.previous_card.as_deref()
    }

    /// Whether a newer card has superseded this one
    pub fn is_outdated(&self) -> bool {
        self.is_outdated
    }

    /// Check the card id and the self-signature against the card contents
    pub fn verify_self_signature(&self, crypto: &dyn CryptoProvider) -> bool {
        let snapshot = snapshot_bytes(
            &self.identity,
            &self.public_key,
            self.previous_card_id.as_deref(),
            &self.created_at,
        );
        if hex::encode(blake3::hash(&snapshot).as_bytes()) != self.card_id {
            return false;
        }
        self.signatures
            .iter()
            .find(|s| s.signer == SELF_SIGNER)
            .map(|s| crypto.verify(&self.public_key, &snapshot, &s.signature))
            .unwrap_or(false)
    }

    /// Walk back through linked history to the card that was current at `date`
    ///
    /// Returns `None` if `date` predates the oldest linked card.
    pub fn card_at(&self, date: DateTime<Utc>) -> Option<&Card> {
        let mut card = Some(self);
        while let Some(current) = card {
            if current.created_at <= date {
                return Some(current);
            }
            card = current.previous_card();
        }
        None
    }
}

fn snapshot_bytes(
    identity: &str,
    public_key: &PublicKey,
    previous_card_id: Option<&str>,
    created_at: &DateTime<Utc>,
) -> Vec<u8> {
    let snapshot = CardSnapshot {
        identity,
        public_key: public_key.to_bytes(),
        previous_card_id,
        created_at_ms: created_at.timestamp_millis(),
    };
    // bincode cannot fail on a struct of plain fields
    bincode::serialize(&snapshot).unwrap_or_default()
}

/// Reduce one identity's cards to its current cards, each with its history attached
///
/// A card is current when no other card in `cards` names it as previous.
///  More than one current card is a conflict the caller has to surface.
pub fn link_history(cards: Vec<Card>) -> Vec<Card> {
    let superseded: HashSet<String> = cards
        .iter()
        .filter_map(|card| card.previous_card_id.clone())
        .collect();
    let by_id: HashMap<String, Card> = cards
        .iter()
        .map(|card| (card.card_id.clone(), card.clone()))
        .collect();

    cards
        .into_iter()
        .filter(|card| !superseded.contains(&card.card_id))
        .map(|mut current| {
            let mut seen = HashSet::from([current.card_id.clone()]);
            current.is_outdated = false;
            current.previous_card =
                chain(current.previous_card_id.as_deref(), &by_id, &mut seen);
            current
        })
        .collect()
}

fn chain(
    id: Option<&str>,
    by_id: &HashMap<String, Card>,
    seen: &mut HashSet<String>,
) -> Option<Box<Card>> {
    let id = id?;
    if !seen.insert(id.to_string()) {
        return None;
    }
    let mut card = by_id.get(id)?.clone();
    card.is_outdated = true;
    card.previous_card = chain(card.previous_card_id.as_deref(), by_id, seen);
    Some(Box::new(card))
}
