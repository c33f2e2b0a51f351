use relaynet_core::{Address, ChainId};
use relaynet_ledger::LedgerError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NonceError {
    #[error("Nonce state for {account:?} on chain {chain} not initialized")]
    NotInitialized { account: Address, chain: ChainId },

    #[error("Nonce space for {account:?} on chain {chain} exhausted")]
    Exhausted { account: Address, chain: ChainId },

    #[error("Nonce {0} was never issued")]
    NotIssued(u64),

    #[error("Nonce {0} already reclaimed")]
    AlreadyReclaimed(u64),

    #[error("No ledger registered for chain {0}")]
    UnknownChain(ChainId),

    #[error("Failed to fetch base nonce: {0}")]
    BaseNonceFetch(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, NonceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_issued() {
        assert_eq!(NonceError::NotIssued(7).to_string(), "Nonce 7 was never issued");
    }

    #[test]
    fn test_error_display_unknown_chain() {
        assert_eq!(NonceError::UnknownChain(5).to_string(), "No ledger registered for chain 5");
    }
}
