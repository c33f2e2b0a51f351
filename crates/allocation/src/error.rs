use relaynet_core::{CoreError, WindowIndex};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("Relayer snapshot is empty")]
    EmptySnapshot,

    #[error("Total stake is zero")]
    ZeroTotalStake,

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(#[from] CoreError),

    #[error("Relayers per window must be positive")]
    ZeroRelayersPerWindow,

    #[error("Selection for window {window} exhausted after {iterations} iterations ({selected}/{target} selected)")]
    SelectionExhausted {
        window: WindowIndex,
        iterations: u64,
        selected: usize,
        target: usize,
    },

    #[error("Window {window} needs {required} relayers but only {eligible} hold stake")]
    InsufficientEligibleRelayers {
        window: WindowIndex,
        eligible: usize,
        required: usize,
    },

    #[error("Generation iteration {0} does not fit in a 256-bit bitmap")]
    IterationOutOfRange(u64),

    #[error("Invalid selection proof: {0}")]
    InvalidProof(String),
}

pub type Result<T> = std::result::Result<T, AllocationError>;
