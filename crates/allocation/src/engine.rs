//! Allocation engine: memoized selection plus transaction partitioning

use std::sync::Arc;

use parking_lot::RwLock;
use relaynet_core::{Address, Hash, RelayerStateSnapshot, Transaction, WindowIndex, U256};
use tracing::debug;

use crate::cache::{WindowCache, DEFAULT_MAX_WINDOWS};
use crate::partition::{PartitionKind, PartitionStrategy};
use crate::proof::{generate_proof, SelectionProof};
use crate::selection::{select_relayers, SelectionResult};
use crate::{AllocationError, Result};

/// Upper bound on draws per window before selection gives up
pub const DEFAULT_MAX_ITERATIONS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub relayers_per_window: usize,
    pub max_iterations: u64,
    /// Number of windows whose selection stays memoized
    pub cache_windows: usize,
}

impl EngineConfig {
    pub fn new(relayers_per_window: usize) -> Self {
        Self {
            relayers_per_window,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            cache_windows: DEFAULT_MAX_WINDOWS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_cache_windows(mut self, cache_windows: usize) -> Self {
        self.cache_windows = cache_windows;
        self
    }
}

/// Transactions assigned to one relayer for one window
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllocationResult {
    pub transactions: Vec<Transaction>,
    /// Iterations at which the relayer was drawn
    pub generation_iterations: Vec<u64>,
    /// Index of the relayer in the snapshot, if present
    pub relayer_cdf_index: Option<usize>,
}

impl AllocationResult {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Bitmask with bit `k` set for every generation iteration `k`
    pub fn iteration_bitmap(&self) -> Result<U256> {
        let mut bitmap = U256::zero();
        for &iteration in &self.generation_iterations {
            if iteration >= 256 {
                return Err(AllocationError::IterationOutOfRange(iteration));
            }
            bitmap |= U256::one() << iteration as usize;
        }
        Ok(bitmap)
    }
}

#[derive(Debug, Clone)]
struct CachedSelection {
    snapshot_hash: Hash,
    result: Arc<SelectionResult>,
}

/// Selection and partitioning for one allocator deployment.
///
/// Selections are memoized per window together with the hash of the
/// snapshot they were computed from; a different snapshot for the same
/// window recomputes. Concurrent callers may both compute a missing entry,
/// the results are identical.
pub struct AllocationEngine {
    config: EngineConfig,
    strategy: Arc<dyn PartitionStrategy>,
    selections: RwLock<WindowCache<CachedSelection>>,
}

impl AllocationEngine {
    pub fn new(config: EngineConfig, partition: PartitionKind) -> Self {
        Self::with_strategy(config, partition.strategy())
    }

    pub fn with_strategy(config: EngineConfig, strategy: Arc<dyn PartitionStrategy>) -> Self {
        Self {
            selections: RwLock::new(WindowCache::with_capacity(config.cache_windows)),
            config,
            strategy,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn strategy(&self) -> &Arc<dyn PartitionStrategy> {
        &self.strategy
    }

    pub fn select_relayers(&self, window: WindowIndex, snapshot: &RelayerStateSnapshot) -> Result<Arc<SelectionResult>> {
        let snapshot_hash = snapshot.hash();
        if let Some(cached) = self.selections.read().get(window) {
            if cached.snapshot_hash == snapshot_hash {
                return Ok(cached.result);
            }
        }

        let result = Arc::new(select_relayers(
            window,
            snapshot,
            self.config.relayers_per_window,
            self.config.max_iterations,
        )?);
        debug!(
            window,
            selected = result.selected_relayers.len(),
            iterations = result.iteration_log.len(),
            "Computed relayer selection"
        );
        self.selections.write().insert(
            window,
            CachedSelection {
                snapshot_hash,
                result: result.clone(),
            },
        );
        Ok(result)
    }

    pub fn is_selected(&self, relayer: &Address, snapshot: &RelayerStateSnapshot, window: WindowIndex) -> Result<bool> {
        Ok(self.select_relayers(window, snapshot)?.is_selected(relayer))
    }

    pub fn selection_proof(
        &self,
        relayer: &Address,
        snapshot: &RelayerStateSnapshot,
        window: WindowIndex,
    ) -> Result<Option<SelectionProof>> {
        let selection = self.select_relayers(window, snapshot)?;
        Ok(generate_proof(&selection, relayer, self.config.relayers_per_window))
    }

    /// Selected relayer owning the transaction at `position`
    pub fn owner_of(&self, selection: &SelectionResult, position: usize, tx: &Transaction) -> Option<Address> {
        let count = selection.selected_relayers.len();
        if count == 0 {
            return None;
        }
        let slot = self.strategy.slot(position, tx, count);
        selection.selected_relayers.get(slot).copied()
    }

    /// Transactions from `pending` that `relayer` must submit in `window`.
    ///
    /// A relayer outside the selected set gets an empty result.
    pub fn allocate_transactions(
        &self,
        relayer: &Address,
        pending: &[Transaction],
        snapshot: &RelayerStateSnapshot,
        window: WindowIndex,
    ) -> Result<AllocationResult> {
        let selection = self.select_relayers(window, snapshot)?;
        let relayer_cdf_index = snapshot.index_of(relayer);

        let Some(my_slot) = selection.position_of(relayer) else {
            return Ok(AllocationResult {
                relayer_cdf_index,
                ..Default::default()
            });
        };

        let count = selection.selected_relayers.len();
        let transactions = pending
            .iter()
            .enumerate()
            .filter(|(position, tx)| self.strategy.slot(*position, tx, count) == my_slot)
            .map(|(_, tx)| tx.clone())
            .collect();

        Ok(AllocationResult {
            transactions,
            generation_iterations: selection.iterations_of(relayer),
            relayer_cdf_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaynet_core::ether;

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn snapshot() -> RelayerStateSnapshot {
        RelayerStateSnapshot::from_stakes(&[(addr(1), ether(1)), (addr(2), ether(2)), (addr(3), ether(2))]).unwrap()
    }

    fn pending(n: u8) -> Vec<Transaction> {
        (0..n).map(|i| Transaction::call(vec![0xaa, i])).collect()
    }

    #[test]
    fn test_selection_memoized_per_window() {
        let engine = AllocationEngine::new(EngineConfig::new(2), PartitionKind::RoundRobin);
        let snapshot = snapshot();
        let a = engine.select_relayers(12, &snapshot).unwrap();
        let b = engine.select_relayers(12, &snapshot).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_changed_snapshot_recomputes() {
        let engine = AllocationEngine::new(EngineConfig::new(1), PartitionKind::RoundRobin);
        let first = engine.select_relayers(3, &snapshot()).unwrap();
        let other = RelayerStateSnapshot::from_stakes(&[(addr(9), ether(1))]).unwrap();
        let second = engine.select_relayers(3, &other).unwrap();
        assert_eq!(second.selected_relayers, vec![addr(9)]);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    fn assert_partition(kind: PartitionKind) {
        let engine = AllocationEngine::new(EngineConfig::new(2), kind);
        let snapshot = snapshot();
        let txs = pending(25);
        for window in 0..10 {
            let selection = engine.select_relayers(window, &snapshot).unwrap();
            let mut assigned = Vec::new();
            for relayer in snapshot.relayers() {
                let result = engine.allocate_transactions(relayer, &txs, &snapshot, window).unwrap();
                if !selection.is_selected(relayer) {
                    assert!(result.is_empty());
                    assert!(result.generation_iterations.is_empty());
                }
                assigned.extend(result.transactions);
            }
            assert_eq!(assigned.len(), txs.len());
            for tx in &txs {
                assert_eq!(assigned.iter().filter(|t| *t == tx).count(), 1);
            }
        }
    }

    #[test]
    fn test_round_robin_partitions_exactly() {
        assert_partition(PartitionKind::RoundRobin);
    }

    #[test]
    fn test_calldata_hash_partitions_exactly() {
        assert_partition(PartitionKind::CalldataHash);
    }

    #[test]
    fn test_owner_matches_allocation() {
        let engine = AllocationEngine::new(EngineConfig::new(2), PartitionKind::CalldataHash);
        let snapshot = snapshot();
        let txs = pending(10);
        let selection = engine.select_relayers(5, &snapshot).unwrap();
        for relayer in &selection.selected_relayers {
            let result = engine.allocate_transactions(relayer, &txs, &snapshot, 5).unwrap();
            for tx in &result.transactions {
                assert_eq!(engine.owner_of(&selection, 0, tx), Some(*relayer));
            }
        }
    }

    #[test]
    fn test_allocation_carries_indices() {
        let engine = AllocationEngine::new(EngineConfig::new(2), PartitionKind::RoundRobin);
        let snapshot = snapshot();
        let selection = engine.select_relayers(12, &snapshot).unwrap();
        let relayer = selection.selected_relayers[0];
        let result = engine.allocate_transactions(&relayer, &pending(3), &snapshot, 12).unwrap();
        assert_eq!(result.relayer_cdf_index, snapshot.index_of(&relayer));
        assert_eq!(result.generation_iterations, selection.iterations_of(&relayer));
        assert_eq!(result.generation_iterations[0], 0);
    }

    #[test]
    fn test_unknown_relayer_has_no_index() {
        let engine = AllocationEngine::new(EngineConfig::new(2), PartitionKind::RoundRobin);
        let result = engine.allocate_transactions(&addr(42), &pending(3), &snapshot(), 1).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.relayer_cdf_index, None);
    }

    #[test]
    fn test_iteration_bitmap() {
        let result = AllocationResult {
            generation_iterations: vec![0, 3, 255],
            ..Default::default()
        };
        let bitmap = result.iteration_bitmap().unwrap();
        assert!(bitmap.bit(0));
        assert!(bitmap.bit(3));
        assert!(bitmap.bit(255));
        assert!(!bitmap.bit(1));

        let overflow = AllocationResult {
            generation_iterations: vec![256],
            ..Default::default()
        };
        assert_eq!(overflow.iteration_bitmap(), Err(AllocationError::IterationOutOfRange(256)));
    }
}
