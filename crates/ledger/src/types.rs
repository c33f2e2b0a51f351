use relaynet_core::{Address, BlockNumber, Hash, RelayerStateSnapshot, Transaction, U256};
use serde::{Deserialize, Serialize};

/// Active and latest relayer state commitments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHashes {
    /// State used for selection in the current window
    pub active: Hash,
    /// State that becomes active at the next window boundary
    pub latest: Hash,
}

/// Receipt of a mined ledger transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub hash: Hash,
    pub block: BlockNumber,
}

/// Arguments of the allocator's `register` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Current latest state, verified against its on-chain hash
    pub latest_state: RelayerStateSnapshot,
    pub stake: U256,
    pub accounts: Vec<Address>,
    pub endpoint: String,
    pub delegator_premium: U256,
}

/// Arguments of the allocator's `execute` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteBatch {
    pub transactions: Vec<Transaction>,
    /// Index of the submitting relayer in `active_state`
    pub relayer_index: usize,
    /// Bit `k` set for each selection iteration that drew the relayer
    pub generation_iteration_bitmap: U256,
    pub active_state: RelayerStateSnapshot,
    pub latest_state: RelayerStateSnapshot,
    pub active_to_latest_map: Vec<usize>,
    pub nonce: u64,
}

impl ExecuteBatch {
    /// Native value forwarded by the whole batch
    pub fn total_value(&self) -> U256 {
        self.transactions
            .iter()
            .fold(U256::zero(), |acc, tx| acc.saturating_add(tx.value))
    }
}
