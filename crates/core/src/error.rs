use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Snapshot length mismatch: {relayers} relayers, {cdf} cdf entries")]
    SnapshotLengthMismatch { relayers: usize, cdf: usize },

    #[error("Snapshot cdf decreases at index {0}")]
    DecreasingCdf(usize),

    #[error("Duplicate relayer in snapshot: {0}")]
    DuplicateRelayer(String),

    #[error("Stake overflow while building cdf")]
    StakeOverflow,

    #[error("Invalid hex: {0}")]
    InvalidHex(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
