//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.

// ============================================================================
// Test Identities
// ============================================================================

/// Primary test user
pub const TEST_USER_ID: &str = "alice";

/// Bearer token accepted for the primary test user
pub const TEST_TOKEN: &str = "token-alice";

/// Second user, for identity switches
pub const OTHER_USER_ID: &str = "bob";

/// Bearer token accepted for the second user
pub const OTHER_TOKEN: &str = "token-bob";

/// Token the mock server does not know
pub const BAD_TOKEN: &str = "token-mallory";

// ============================================================================
// Timing
// ============================================================================

/// Heartbeat interval of the mock push endpoint
pub const SERVER_HEARTBEAT_MS: u64 = 100;

/// Client heartbeat interval used by the tests
pub const CLIENT_HEARTBEAT_MS: u64 = 150;

/// Upper bound for any condition a test waits on
pub const WAIT_TIMEOUT_MS: u64 = 5000;

/// Polling step while waiting on a condition
pub const POLL_INTERVAL_MS: u64 = 10;
