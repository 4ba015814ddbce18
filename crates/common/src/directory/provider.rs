use std::collections::HashMap;

use async_trait::async_trait;

use crate::card::Card;
use crate::token::AccessToken;

/// Most identities a single `search_many` call may carry
pub const MAX_SEARCH_IDENTITIES: usize = 50;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The addressed card does not exist
    #[error("card not found: {0}")]
    NotFound(String),
    /// A publish collides with existing state, i.e. the card id
    ///  is taken or its previous card is unknown or already superseded
    #[error("conflict: {0}")]
    Conflict(String),
    /// The token does not authorize the operation
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Transport failure; the call may or may not have been applied
    #[error("network error: {0}")]
    Network(String),
    #[error("directory timed out: {0}")]
    Timeout(String),
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// A service binding identities to published cards
///
/// Implementations must keep "not found" and transport failures distinct:
///  a search for an unknown identity succeeds with no cards.
#[async_trait]
pub trait DirectoryClient: Send + Sync + std::fmt::Debug {
    /// Publish a card and return its id
    ///
    /// Should fail with:
    /// * `Err(DirectoryError::Unauthorized)` - the token's identity does not own the card
    /// * `Err(DirectoryError::Conflict)` - the card id exists, or the card supersedes
    ///   a card that is unknown or already superseded
    async fn publish(&self, token: &AccessToken, card: Card) -> Result<String, DirectoryError>;

    /// All live cards of `identity`, current cards first, superseded cards last
    async fn search(&self, token: &AccessToken, identity: &str)
        -> Result<Vec<Card>, DirectoryError>;

    /// Batch form of [`DirectoryClient::search`]
    ///
    /// Identities without cards map to an empty list. Callers send at most
    ///  [`MAX_SEARCH_IDENTITIES`] per call.
    async fn search_many(
        &self,
        token: &AccessToken,
        identities: &[String],
    ) -> Result<HashMap<String, Vec<Card>>, DirectoryError> {
        let mut found = HashMap::with_capacity(identities.len());
        for identity in identities {
            let cards = self.search(token, identity).await?;
            found.insert(identity.clone(), cards);
        }
        Ok(found)
    }

    /// Retire a card together with every card it superseded
    async fn revoke(&self, token: &AccessToken, card_id: &str) -> Result<(), DirectoryError>;
}
