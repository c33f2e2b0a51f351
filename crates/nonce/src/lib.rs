//! RelayNet Nonce Manager
//!
//! Hands out transaction nonces per (account, chain) without ever issuing
//! the same nonce twice.
//!
//! ## Design
//!
//! - The base nonce is the account's ledger transaction count, fetched once
//!   on first use. A per-key creation lock ensures concurrent first callers
//!   share a single fetch.
//! - Issuing prefers the smallest reclaimed nonce, otherwise extends the
//!   high-water mark (`base + next_offset`).
//! - A nonce whose submission failed can be reclaimed and is re-issued
//!   before any new one. Nonces that were never issued cannot be reclaimed.

mod error;
mod manager;

pub use error::{NonceError, Result};
pub use manager::NonceManager;
