//! Shared constants for end-to-end tests

#![allow(dead_code)]

/// Fixed clock used by tick-level tests.
pub const NOW: i64 = 1_700_000_000;

/// Retry settings the tests assume. They match the shipped defaults.
pub const MAX_RETRIES: u32 = 3;
pub const BACKOFF_SECS: i64 = 300;
pub const LEASE_SECS: i64 = 120;

pub const URL_A: &str = "http://example.test/a";
pub const URL_B: &str = "http://example.test/b";
pub const URL_C: &str = "http://example.test/c";
