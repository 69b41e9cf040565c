//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestClient, TestServer, TEST_TOKEN, TEST_USER_ID};
//!
//! #[tokio::test]
//! async fn test_login_connects() {
//!     let server = TestServer::spawn().await;
//!     let client = TestClient::new(&server);
//!
//!     client.login(TEST_USER_ID, TEST_TOKEN).await;
//!     client.wait_connected(true).await;
//! }
//! ```

#![allow(dead_code)]

mod client;
mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
pub use client::{wait_until, RecordingDispatcher, TestClient};
pub use constants::*;
pub use fixtures::{fast_connection_settings, minutes, notification, push_payload};
pub use server::TestServer;
