use relaynet_allocation::AllocationError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("{operation} reverted: {reason}")]
    Reverted { operation: &'static str, reason: String },

    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: String, available: String },

    #[error("Relayer not registered: {0}")]
    NotRegistered(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),
}

impl LedgerError {
    pub(crate) fn reverted(operation: &'static str, reason: impl Into<String>) -> Self {
        LedgerError::Reverted {
            operation,
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
