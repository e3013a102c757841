//! # verse_core
//!
//! Core domain logic for Verse: credential verification across the legacy and
//! managed schemes, identity resolution, and online identity migration.

pub mod auth;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod migrate;
pub mod migration;
pub mod models;
pub mod provider;
pub mod store;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
