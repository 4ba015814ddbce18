//! Integration tests for user lookup and the card cache

mod common;

use ::common::card::Card;
use ::common::crypto::{DefaultCryptoProvider, SecretKey};
use ::common::directory::{DirectoryError, DirectoryOp, MAX_SEARCH_IDENTITIES};
use ::common::error::SessionError;
use ::common::key_store::MemoryKeyStore;
use ::common::testkit::fast_config;

#[tokio::test]
async fn test_find_user_uses_cache() {
    let (cloud, _alice, card) = common::setup_registered("alice").await;
    let bob = cloud.device("bob").await.unwrap();

    let before = cloud.directory.search_calls();
    let first = bob.find_user("alice", false).await.unwrap();
    let second = bob.find_user("alice", false).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.card_id(), card.card_id());
    assert_eq!(cloud.directory.search_calls(), before + 1);

    bob.find_user("alice", true).await.unwrap();
    assert_eq!(cloud.directory.search_calls(), before + 2);

    assert_eq!(bob.find_cached_user("alice").unwrap(), first);
}

#[tokio::test]
async fn test_expired_cache_is_refetched() {
    let (cloud, _alice, _card) = common::setup_registered("alice").await;
    let config = ::common::config::SessionConfig {
        card_cache_ttl_secs: 0,
        ..fast_config()
    };
    let bob = cloud
        .device_with_config("bob", MemoryKeyStore::new(), config)
        .await
        .unwrap();

    let before = cloud.directory.search_calls();
    bob.find_user("alice", false).await.unwrap();
    bob.find_user("alice", false).await.unwrap();
    assert_eq!(cloud.directory.search_calls(), before + 2);

    // stale entries are still served offline
    bob.find_cached_user("alice").unwrap();
}

#[tokio::test]
async fn test_find_cached_user_never_fetches() {
    let (cloud, _alice, _card) = common::setup_registered("alice").await;
    let bob = cloud.device("bob").await.unwrap();

    let before = cloud.directory.search_calls();
    assert!(matches!(
        bob.find_cached_user("alice"),
        Err(SessionError::UserNotFound(_))
    ));
    assert!(bob.find_cached_users(&["alice"]).is_err());
    assert_eq!(cloud.directory.search_calls(), before);

    bob.find_users(&["alice"], false).await.unwrap();
    assert_eq!(bob.find_cached_users(&["alice"]).unwrap().len(), 1);
}

#[tokio::test]
async fn test_find_users_all_or_nothing() {
    let (cloud, _alice, _card) = common::setup_registered("alice").await;
    common::register_device(&cloud, "carol").await;
    let bob = cloud.device("bob").await.unwrap();

    let found = bob
        .find_users(&["alice", "carol", "alice"], false)
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found["carol"].identity(), "carol");

    assert!(matches!(
        bob.find_users(&["alice", "zed", "dave"], true).await,
        Err(SessionError::UserNotFound(identity)) if identity == "dave"
    ));
}

#[tokio::test]
async fn test_find_users_partial() {
    let (cloud, _alice, _card) = common::setup_registered("alice").await;
    let bob = cloud.device("bob").await.unwrap();

    let report = bob
        .find_users_partial(&["alice", "nobody"], false)
        .await
        .unwrap();
    assert_eq!(report.found.len(), 1);
    assert!(report.found.contains_key("alice"));
    assert!(matches!(
        report.failed.get("nobody"),
        Some(SessionError::UserNotFound(_))
    ));
}

#[tokio::test]
async fn test_large_lookups_are_batched() {
    let (cloud, _alice, _card) = common::setup_registered("alice").await;
    let bob = cloud.device("bob").await.unwrap();

    let mut identities: Vec<String> = (0..2 * MAX_SEARCH_IDENTITIES + 20)
        .map(|i| format!("user-{:03}", i))
        .collect();
    identities.push("alice".to_string());

    let before = cloud.directory.search_calls();
    let report = bob.find_users_partial(&identities, false).await.unwrap();
    assert_eq!(cloud.directory.search_calls(), before + 3);
    assert_eq!(report.found.len(), 1);
    assert_eq!(report.failed.len(), identities.len() - 1);
}

#[tokio::test]
async fn test_empty_lookup_is_invalid() {
    let (cloud, _alice, _card) = common::setup_registered("alice").await;
    let bob = cloud.device("bob").await.unwrap();
    let none: [&str; 0] = [];
    assert!(matches!(
        bob.find_users(&none, false).await,
        Err(SessionError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_tampered_cards_are_dropped() {
    let (cloud, _alice, card) = common::setup_registered("alice").await;

    // backdate a copy; its id and signature no longer match its contents
    let mut json = serde_json::to_value(&card).unwrap();
    json["created_at"] = serde_json::json!("2020-01-01T00:00:00Z");
    let tampered: Card = serde_json::from_value(json).unwrap();
    cloud.directory.insert_unchecked(tampered);

    // a card for someone else is never returned for alice either
    let mallory = SecretKey::generate().unwrap();
    cloud
        .directory
        .insert_unchecked(Card::new("mallory", &mallory, None, &DefaultCryptoProvider));

    let bob = cloud.device("bob").await.unwrap();
    let found = bob.find_user("alice", true).await.unwrap();
    assert_eq!(found.card_id(), card.card_id());
}

#[tokio::test]
async fn test_lookup_public_keys_bypasses_cache() {
    let (cloud, alice, card) = common::setup_registered("alice").await;
    let bob = cloud.device("bob").await.unwrap();

    let keys = bob.lookup_public_keys(&["alice"]).await.unwrap();
    assert_eq!(&keys["alice"], card.public_key());

    alice.cleanup().await.unwrap();
    let rotated = alice.rotate_private_key().await.unwrap();
    let keys = bob.lookup_public_keys(&["alice"]).await.unwrap();
    assert_eq!(&keys["alice"], rotated.public_key());
}

#[tokio::test]
async fn test_refresh_cached_users() {
    let (cloud, alice, _card) = common::setup_registered("alice").await;
    let (carol, _) = common::register_device(&cloud, "carol").await;
    let bob = cloud.device("bob").await.unwrap();
    bob.find_users(&["alice", "carol"], false).await.unwrap();

    assert_eq!(bob.refresh_cached_users().await.unwrap(), 0);

    alice.cleanup().await.unwrap();
    let rotated = alice.rotate_private_key().await.unwrap();
    carol.unregister().await.unwrap();

    assert_eq!(bob.refresh_cached_users().await.unwrap(), 1);
    assert_eq!(
        bob.find_cached_user("alice").unwrap().card_id(),
        rotated.card_id()
    );
    assert!(bob.find_cached_user("carol").is_err());
}

#[tokio::test]
async fn test_directory_errors_fail_the_batch() {
    let (cloud, _alice, _card) = common::setup_registered("alice").await;
    let bob = cloud.device("bob").await.unwrap();

    cloud.directory.fail_next(
        DirectoryOp::Search,
        DirectoryError::Network("connection refused".into()),
    );
    assert!(matches!(
        bob.find_users_partial(&["alice"], false).await,
        Err(SessionError::Network(_))
    ));
    bob.find_user("alice", false).await.unwrap();
}
