//! Shared test utilities for session integration tests
#![allow(dead_code)]

use std::sync::Once;

use common::card::Card;
use common::session::Session;
use common::testkit::TestCloud;

pub const PASSWORD: &str = "correct horse battery";

static TRACING: Once = Once::new();

/// Route tracing output to the test harness, filtered by RUST_LOG
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A cloud with a fresh device for `identity`, registered
pub async fn setup_registered(identity: &str) -> (TestCloud, Session, Card) {
    init_tracing();
    let cloud = TestCloud::new();
    let (session, card) = register_device(&cloud, identity).await;
    (cloud, session, card)
}

/// Register `identity` on a new device in `cloud`
pub async fn register_device(cloud: &TestCloud, identity: &str) -> (Session, Card) {
    let session = cloud.device(identity).await.unwrap();
    let card = session.register().await.unwrap();
    (session, card)
}
