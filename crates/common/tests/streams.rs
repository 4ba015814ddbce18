//! Integration tests for chunked stream and file encryption

mod common;

use ::common::error::SessionError;
use tempfile::TempDir;

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

#[tokio::test]
async fn test_multi_chunk_stream() {
    let (cloud, alice, _card) = common::setup_registered("alice").await;
    let (bob, bob_card) = common::register_device(&cloud, "bob").await;

    // a few chunks plus a partial one at the default chunk size
    let data = payload(3 * alice.config().stream_chunk_size + 1234);

    let mut sealed = Vec::new();
    let read = alice
        .encrypt_stream(&mut data.as_slice(), &mut sealed, &[*bob_card.public_key()])
        .await
        .unwrap();
    assert_eq!(read, data.len() as u64);

    let mut opened = Vec::new();
    let written = bob
        .decrypt_stream(&mut sealed.as_slice(), &mut opened)
        .await
        .unwrap();
    assert_eq!(written, data.len() as u64);
    assert_eq!(opened, data);
}

#[tokio::test]
async fn test_signed_stream() {
    let (cloud, alice, alice_card) = common::setup_registered("alice").await;
    let (bob, bob_card) = common::register_device(&cloud, "bob").await;
    let (_carol, carol_card) = common::register_device(&cloud, "carol").await;

    let data = payload(200_000);
    let mut sealed = Vec::new();
    alice
        .auth_encrypt_stream(&mut data.as_slice(), &mut sealed, &[bob_card])
        .await
        .unwrap();

    let mut opened = Vec::new();
    bob.auth_decrypt_stream(&mut sealed.as_slice(), &mut opened, Some(&alice_card))
        .await
        .unwrap();
    assert_eq!(opened, data);

    let mut discarded = Vec::new();
    assert!(matches!(
        bob.auth_decrypt_stream(&mut sealed.as_slice(), &mut discarded, Some(&carol_card))
            .await,
        Err(SessionError::VerificationFailed)
    ));
    // the last chunk is withheld until the signature verifies
    assert!(discarded.len() < data.len());
}

#[tokio::test]
async fn test_stream_and_memory_envelopes_are_distinct() {
    let (_cloud, alice, _card) = common::setup_registered("alice").await;

    let in_memory = alice.encrypt(b"small", &[]).await.unwrap();
    let mut out = Vec::new();
    assert!(matches!(
        alice.decrypt_stream(&mut in_memory.as_slice(), &mut out).await,
        Err(SessionError::InvalidArgument(_))
    ));

    let mut streamed = Vec::new();
    alice
        .encrypt_stream(&mut &b"small"[..], &mut streamed, &[])
        .await
        .unwrap();
    assert!(matches!(
        alice.decrypt(&streamed).await,
        Err(SessionError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_file_helpers() {
    let (cloud, alice, alice_card) = common::setup_registered("alice").await;
    let (bob, bob_card) = common::register_device(&cloud, "bob").await;
    let dir = TempDir::new().unwrap();

    let plain = dir.path().join("report.bin");
    let sealed = dir.path().join("report.bin.sealed");
    let opened = dir.path().join("report.out");
    let data = payload(150_000);
    tokio::fs::write(&plain, &data).await.unwrap();

    alice
        .auth_encrypt_file(&plain, &sealed, &[bob_card])
        .await
        .unwrap();
    bob.auth_decrypt_file(&sealed, &opened, Some(&alice_card))
        .await
        .unwrap();
    assert_eq!(tokio::fs::read(&opened).await.unwrap(), data);

    let unsigned = dir.path().join("report.unsigned");
    alice.encrypt_file(&plain, &unsigned, &[]).await.unwrap();
    alice.decrypt_file(&unsigned, &opened).await.unwrap();
    assert_eq!(tokio::fs::read(&opened).await.unwrap(), data);
}

#[tokio::test]
async fn test_failed_file_decrypt_removes_output() {
    let (cloud, alice, _card) = common::setup_registered("alice").await;
    let (bob, _) = common::register_device(&cloud, "bob").await;
    let dir = TempDir::new().unwrap();

    let plain = dir.path().join("secret.txt");
    let sealed = dir.path().join("secret.sealed");
    let opened = dir.path().join("secret.out");
    tokio::fs::write(&plain, payload(100_000)).await.unwrap();

    // encrypted to alice only
    alice.encrypt_file(&plain, &sealed, &[]).await.unwrap();
    assert!(matches!(
        bob.decrypt_file(&sealed, &opened).await,
        Err(SessionError::DecryptionFailed)
    ));
    assert!(!opened.exists());

    // truncated on disk
    let mut bytes = tokio::fs::read(&sealed).await.unwrap();
    bytes.truncate(bytes.len() - 10);
    tokio::fs::write(&sealed, &bytes).await.unwrap();
    assert!(matches!(
        alice.decrypt_file(&sealed, &opened).await,
        Err(SessionError::DecryptionFailed)
    ));
    assert!(!opened.exists());
}
