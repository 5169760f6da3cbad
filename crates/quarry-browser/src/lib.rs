//! Chromium-backed implementation of the pool's client traits.
//!
//! One [`ChromiumClient`] wraps a running Chrome process launched through
//! chromiumoxide; pages and incognito contexts are minted over CDP. The
//! [`ChromiumFactory`] plugs into `quarry_pool::BrowserPool` so the rest of
//! the system never touches chromiumoxide directly.

pub mod client;
pub mod error;
pub mod fingerprint;

pub use client::{ChromiumClient, ChromiumFactory};
pub use error::{BrowserError, Result};
pub use fingerprint::FingerprintProfile;
