//! RelayNet Core Types
//!
//! This crate defines the fundamental data structures shared by every
//! RelayNet component: addresses and EVM words, relayer state snapshots,
//! mempool transactions, and the keccak/ABI helpers the allocator contract
//! uses to derive its randomness and state commitments.

pub mod abi;
mod error;
mod snapshot;
mod types;

pub use error::*;
pub use snapshot::*;
pub use types::*;

pub use primitive_types::{H160, H256};
