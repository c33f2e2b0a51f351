//! Partitioning of pending transactions among selected relayers

use std::fmt::Debug;
use std::sync::Arc;

use relaynet_core::abi::{hash_to_u256, keccak256};
use relaynet_core::{Transaction, U256};
use serde::{Deserialize, Serialize};

/// Assigns each pending transaction to one slot of the selected relayer list.
///
/// Implementations must be pure: the same inputs always give the same slot,
/// and the slot is always `< selected_count`.
pub trait PartitionStrategy: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn slot(&self, position: usize, tx: &Transaction, selected_count: usize) -> usize;

    /// True when the slot depends on the transaction alone, so the ledger can
    /// check the owner of every submitted transaction.
    fn is_position_independent(&self) -> bool;
}

/// `slot = position mod selected_count`
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl PartitionStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn slot(&self, position: usize, _tx: &Transaction, selected_count: usize) -> usize {
        position % selected_count
    }

    fn is_position_independent(&self) -> bool {
        false
    }
}

/// `slot = uint256(keccak256(tx.data)) mod selected_count`
#[derive(Debug, Clone, Copy, Default)]
pub struct CalldataHash;

impl PartitionStrategy for CalldataHash {
    fn name(&self) -> &'static str {
        "calldata_hash"
    }

    fn slot(&self, _position: usize, tx: &Transaction, selected_count: usize) -> usize {
        let word = hash_to_u256(&keccak256(&tx.data)) % U256::from(selected_count);
        word.low_u64() as usize
    }

    fn is_position_independent(&self) -> bool {
        true
    }
}

/// Configurable choice of strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    #[default]
    RoundRobin,
    CalldataHash,
}

impl PartitionKind {
    pub fn strategy(&self) -> Arc<dyn PartitionStrategy> {
        match self {
            PartitionKind::RoundRobin => Arc::new(RoundRobin),
            PartitionKind::CalldataHash => Arc::new(CalldataHash),
        }
    }
}

impl std::str::FromStr for PartitionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(PartitionKind::RoundRobin),
            "calldata_hash" => Ok(PartitionKind::CalldataHash),
            other => Err(format!("unknown partition strategy: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txs(n: u8) -> Vec<Transaction> {
        (0..n).map(|i| Transaction::call(vec![i, i.wrapping_mul(7)])).collect()
    }

    #[test]
    fn test_round_robin_slots() {
        let tx = Transaction::call(vec![]);
        let slots: Vec<usize> = (0..6).map(|p| RoundRobin.slot(p, &tx, 3)).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_calldata_hash_ignores_position() {
        for tx in txs(20) {
            let slot = CalldataHash.slot(0, &tx, 4);
            assert!(slot < 4);
            assert_eq!(CalldataHash.slot(17, &tx, 4), slot);
        }
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("round-robin".parse::<PartitionKind>().unwrap(), PartitionKind::RoundRobin);
        assert_eq!("calldata_hash".parse::<PartitionKind>().unwrap(), PartitionKind::CalldataHash);
        assert!("random".parse::<PartitionKind>().is_err());
        assert_eq!(PartitionKind::default(), PartitionKind::RoundRobin);
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&PartitionKind::CalldataHash).unwrap();
        assert_eq!(json, "\"calldata_hash\"");
    }

    #[test]
    fn test_strategy_flags() {
        assert!(!PartitionKind::RoundRobin.strategy().is_position_independent());
        assert!(PartitionKind::CalldataHash.strategy().is_position_independent());
    }
}
