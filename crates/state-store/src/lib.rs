//! RelayNet Relayer State Store
//!
//! Maps state commitments (content hashes) to the relayer snapshots they
//! commit to. Populated from a genesis seed and from the ledger's
//! `NewRelayerState` events via [`StateTracker`], optionally persisted as JSON.

mod error;
mod store;
mod tracker;

pub use error::{Result, StateStoreError};
pub use store::RelayerStateStore;
pub use tracker::{replay_history, StateTracker};
