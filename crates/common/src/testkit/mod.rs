//! In-process harness for multi-device integration tests
//!
//! A [`TestCloud`] is one shared directory and one shared backup storage.
//! Every device it hands out is a separate [`Session`](crate::session::Session) with its own key store,
//! so two devices of the same identity behave like two phones of the same user.
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testkit::TestCloud;
//!
//! #[tokio::test]
//! async fn test_second_device() -> anyhow::Result<()> {
//!     let cloud = TestCloud::new();
//!
//!     let phone = cloud.device("alice").await?;
//!     phone.register().await?;
//!     phone.backup_private_key("correct horse").await?;
//!
//!     let laptop = cloud.device("alice").await?;
//!     laptop.restore_private_key("correct horse").await?;
//!     Ok(())
//! }
//! ```
mod cloud;

pub use cloud::{fast_config, TestCloud};
