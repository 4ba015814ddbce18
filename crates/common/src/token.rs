use async_trait::async_trait;

/// A short-lived credential naming the identity it was issued to
///
/// Fetched once per operation and never cached beyond it.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    identity: String,
    value: String,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("identity", &self.identity)
            .field("value", &"<redacted>")
            .finish()
    }
}

impl AccessToken {
    pub fn new(identity: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            value: value.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// A token with an empty identity or value is never sent anywhere
    pub fn is_empty(&self) -> bool {
        self.identity.trim().is_empty() || self.value.trim().is_empty()
    }
}

/// The application's token exchange
///
/// Any `Fn() -> anyhow::Result<AccessToken>` closure is a provider.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> anyhow::Result<AccessToken>;
}

#[async_trait]
impl<F> TokenProvider for F
where
    F: Fn() -> anyhow::Result<AccessToken> + Send + Sync,
{
    async fn access_token(&self) -> anyhow::Result<AccessToken> {
        (self)()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_closure_is_a_provider() {
        let provider =
            || -> anyhow::Result<AccessToken> { Ok(AccessToken::new("alice", "t0k3n")) };
        let token = provider.access_token().await.unwrap();
        assert_eq!(token.identity(), "alice");
        assert!(!token.is_empty());
    }

    #[test]
    fn test_empty_token() {
        assert!(AccessToken::new("alice", "").is_empty());
        assert!(AccessToken::new(" ", "value").is_empty());
    }

    #[test]
    fn test_debug_redacts_value() {
        let debug = format!("{:?}", AccessToken::new("alice", "super-secret"));
        assert!(!debug.contains("super-secret"));
    }
}
