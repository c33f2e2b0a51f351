//! RelayNet Relayer Agent
//!
//! Off-chain relayer that reproduces the allocator's selection locally and
//! submits its share of the mempool when selected.
//!
//! ## Lifecycle
//!
//! 1. Fund the relayer account from a funder if its balance is short
//! 2. Bond stake and register against the latest relayer state
//! 3. On each window boundary: check selection, allocate, submit a batch
//! 4. Claim protocol rewards with a configurable per-block probability

mod agent;
mod participation;
mod report;

pub use agent::{AgentConfig, AgentState, AgentStats, RelayerAgent, WindowOutcome};
pub use participation::WindowParticipationRecord;
pub use report::{NetworkReport, RelayerReport};
pub use relaynet_settings::FailurePolicy;

use relaynet_core::{Address, WindowIndex};
use relaynet_ledger::LedgerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Relayer {relayer:?} failed in window {window} during {operation}: {reason}")]
    Fatal {
        relayer: Address,
        window: WindowIndex,
        operation: &'static str,
        reason: String,
    },

    #[error("Relayers per window mismatch: engine uses {engine}, ledger uses {ledger}")]
    ConfigMismatch { engine: usize, ledger: usize },

    #[error("Ledger reports zero blocks per window")]
    ZeroBlocksPerWindow,

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl RelayError {
    /// Relayer and window of a fatal error
    pub fn context(&self) -> Option<(Address, WindowIndex, &'static str)> {
        match self {
            RelayError::Fatal {
                relayer,
                window,
                operation,
                ..
            } => Some((*relayer, *window, *operation)),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
