use relaynet_core::{CoreError, Hash};
use relaynet_ledger::LedgerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("Relayer state not found: {0:?}")]
    StateNotFound(Hash),

    #[error("State hash mismatch: expected {expected:?}, computed {actual:?}")]
    HashMismatch { expected: Hash, actual: Hash },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(#[from] CoreError),

    #[error("Invalid state key: {0}")]
    InvalidKey(String),

    #[error("Failed to access state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse state file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, StateStoreError>;
