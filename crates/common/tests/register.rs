//! Integration tests for registration, rotation and unregistration

mod common;

use ::common::card::Card;
use ::common::crypto::{DefaultCryptoProvider, SecretKey};
use ::common::directory::{DirectoryError, DirectoryOp};
use ::common::error::SessionError;
use ::common::key_store::{KeyStore, MemoryKeyStore};
use ::common::session::LocalKeyState;
use ::common::testkit::TestCloud;

#[tokio::test]
async fn test_register_publishes_card_and_stores_key() {
    let (cloud, alice, card) = common::setup_registered("alice").await;

    assert_eq!(card.identity(), "alice");
    assert!(card.previous_card_id().is_none());
    assert_eq!(alice.local_key_state().await.unwrap(), LocalKeyState::Present);

    let bob = cloud.device("bob").await.unwrap();
    let found = bob.find_user("alice", false).await.unwrap();
    assert_eq!(found.card_id(), card.card_id());
    assert_eq!(found.public_key(), card.public_key());
}

#[tokio::test]
async fn test_register_twice_fails() {
    let (cloud, alice, card) = common::setup_registered("alice").await;

    // the published card wins over the key this device holds
    assert!(matches!(
        alice.register().await,
        Err(SessionError::AlreadyRegistered(identity)) if identity == "alice"
    ));
    assert!(alice.has_local_private_key().await.unwrap());
    let found = alice.find_user("alice", true).await.unwrap();
    assert_eq!(found.card_id(), card.card_id());

    // a second device sees the published card
    let other = cloud.device("alice").await.unwrap();
    assert!(matches!(
        other.register().await,
        Err(SessionError::AlreadyRegistered(identity)) if identity == "alice"
    ));
    assert!(!other.has_local_private_key().await.unwrap());
}

#[tokio::test]
async fn test_register_with_stale_local_key_fails() {
    let cloud = TestCloud::new();
    let store = MemoryKeyStore::new();
    store
        .store("alice", &SecretKey::generate().unwrap())
        .await
        .unwrap();
    let alice = cloud.device_with_store("alice", store).await.unwrap();

    assert!(matches!(
        alice.register().await,
        Err(SessionError::LocalKeyAlreadyPresent)
    ));
    assert!(matches!(
        alice.find_user("alice", true).await,
        Err(SessionError::UserNotFound(_))
    ));
}

#[tokio::test]
async fn test_failed_publish_rolls_back_local_key() {
    common::init_tracing();
    let cloud = TestCloud::new();
    let alice = cloud.device("alice").await.unwrap();

    cloud.directory.fail_next(
        DirectoryOp::Publish,
        DirectoryError::Network("connection reset".into()),
    );
    assert!(matches!(
        alice.register().await,
        Err(SessionError::CardPublishFailed(_))
    ));
    assert_eq!(alice.local_key_state().await.unwrap(), LocalKeyState::Absent);

    // nothing was left behind, so a retry goes through
    let card = alice.register().await.unwrap();
    assert_eq!(card.identity(), "alice");
}

#[tokio::test]
async fn test_session_survives_restart() {
    common::init_tracing();
    let cloud = TestCloud::new();
    let store = MemoryKeyStore::new();

    let first = cloud.device_with_store("alice", store.clone()).await.unwrap();
    let card = first.register().await.unwrap();
    drop(first);

    let restarted = cloud.device_with_store("alice", store).await.unwrap();
    assert_eq!(
        restarted.local_key_state().await.unwrap(),
        LocalKeyState::Present
    );
    let ciphertext = restarted.encrypt(b"still mine", &[]).await.unwrap();
    assert_eq!(restarted.decrypt(&ciphertext).await.unwrap(), b"still mine");
    assert_eq!(
        restarted.find_user("alice", true).await.unwrap().card_id(),
        card.card_id()
    );
}

#[tokio::test]
async fn test_rotate_requires_missing_key() {
    let (_cloud, alice, _card) = common::setup_registered("alice").await;
    assert!(matches!(
        alice.rotate_private_key().await,
        Err(SessionError::LocalKeyAlreadyPresent)
    ));
}

#[tokio::test]
async fn test_rotate_supersedes_current_card() {
    let (cloud, alice, first) = common::setup_registered("alice").await;

    alice.cleanup().await.unwrap();
    assert!(matches!(
        alice.cleanup().await,
        Err(SessionError::MissingPrivateKey)
    ));

    let second = alice.rotate_private_key().await.unwrap();
    assert_eq!(second.previous_card_id(), Some(first.card_id()));
    assert_ne!(second.public_key(), first.public_key());

    let bob = cloud.device("bob").await.unwrap();
    let found = bob.find_user("alice", false).await.unwrap();
    assert_eq!(found.card_id(), second.card_id());
    let previous = found.previous_card().unwrap();
    assert_eq!(previous.card_id(), first.card_id());
    assert!(previous.is_outdated());
}

#[tokio::test]
async fn test_rotate_unregistered_identity() {
    common::init_tracing();
    let cloud = TestCloud::new();
    let alice = cloud.device("alice").await.unwrap();
    assert!(matches!(
        alice.rotate_private_key().await,
        Err(SessionError::UserNotFound(_))
    ));
    assert!(!alice.has_local_private_key().await.unwrap());
}

#[tokio::test]
async fn test_unregister_revokes_card() {
    let (cloud, alice, _card) = common::setup_registered("alice").await;
    let bob = cloud.device("bob").await.unwrap();
    bob.find_user("alice", false).await.unwrap();

    alice.unregister().await.unwrap();
    assert!(!alice.has_local_private_key().await.unwrap());

    assert!(matches!(
        bob.find_user("alice", true).await,
        Err(SessionError::UserNotFound(_))
    ));

    // the identity can start over
    alice.register().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_cards_are_reported() {
    let (cloud, alice, _card) = common::setup_registered("alice").await;

    // a second current card published behind the session's back
    let rogue = cloud.device("alice").await.unwrap();
    let key = SecretKey::generate().unwrap();
    cloud
        .directory
        .insert_unchecked(Card::new("alice", &key, None, &DefaultCryptoProvider));

    let bob = cloud.device("bob").await.unwrap();
    assert!(matches!(
        bob.find_user("alice", true).await,
        Err(SessionError::DuplicateCards(identity)) if identity == "alice"
    ));
    assert!(matches!(
        rogue.register().await,
        Err(SessionError::AlreadyRegistered(_))
    ));
    assert!(matches!(
        alice.unregister().await,
        Err(SessionError::DuplicateCards(_))
    ));
}
