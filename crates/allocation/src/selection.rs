//! Stake-weighted relayer selection
//!
//! For window `w` the contract derives `base_seed = keccak256(uint256 w)` and,
//! for iteration `k = 0, 1, ...`, a draw seed `keccak256(base_seed ‖ uint256 k)`.
//! The draw seed modulo the total stake lands in exactly one relayer's CDF
//! interval. Draws repeat until the target number of distinct relayers has
//! been seen. Repeated draws stay in the iteration log since eligibility
//! proofs refer to them.

use std::collections::HashSet;

use relaynet_core::abi::{encode_u256, hash_to_u256, keccak256, keccak256_words};
use relaynet_core::{Address, Hash, RelayerStateSnapshot, WindowIndex, U256};
use serde::{Deserialize, Serialize};

use crate::{AllocationError, Result};

/// One iteration of the selection loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    pub relayer: Address,
    pub cdf_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub window: WindowIndex,
    /// Distinct relayers in order of first draw
    pub selected_relayers: Vec<Address>,
    /// Snapshot index of each selected relayer
    pub selected_cdf_indices: Vec<usize>,
    /// Every draw, duplicates included
    pub iteration_log: Vec<Draw>,
}

impl SelectionResult {
    pub fn cdf_index_per_iteration(&self) -> Vec<usize> {
        self.iteration_log.iter().map(|d| d.cdf_index).collect()
    }

    pub fn is_selected(&self, relayer: &Address) -> bool {
        self.selected_relayers.contains(relayer)
    }

    /// Position of the relayer in the distinct selected list
    pub fn position_of(&self, relayer: &Address) -> Option<usize> {
        self.selected_relayers.iter().position(|r| r == relayer)
    }

    /// Iterations at which the relayer was drawn
    pub fn iterations_of(&self, relayer: &Address) -> Vec<u64> {
        self.iteration_log
            .iter()
            .enumerate()
            .filter(|(_, d)| d.relayer == *relayer)
            .map(|(i, _)| i as u64)
            .collect()
    }

    pub fn first_iteration_of(&self, relayer: &Address) -> Option<u64> {
        self.iteration_log
            .iter()
            .position(|d| d.relayer == *relayer)
            .map(|i| i as u64)
    }
}

/// `keccak256(abi.encode(uint256 window))`
pub fn base_seed(window: WindowIndex) -> Hash {
    keccak256(encode_u256(U256::from(window)))
}

/// Resolve a single draw against a snapshot
pub fn draw(base_seed: &Hash, iteration: u64, snapshot: &RelayerStateSnapshot) -> Result<Draw> {
    let total = validate(snapshot)?;
    Ok(draw_unchecked(base_seed, iteration, snapshot, total))
}

fn draw_unchecked(base_seed: &Hash, iteration: u64, snapshot: &RelayerStateSnapshot, total: U256) -> Draw {
    let seed = keccak256_words([base_seed.to_fixed_bytes(), encode_u256(U256::from(iteration))]);
    let random_stake = hash_to_u256(&seed) % total;
    let cdf = snapshot.cdf();
    // Smallest index with cdf[i] >= random_stake. random_stake < total = cdf[last]
    // so the search never runs past the end.
    let cdf_index = cdf.partition_point(|v| *v < random_stake);
    Draw {
        relayer: snapshot.relayers()[cdf_index],
        cdf_index,
    }
}

fn validate(snapshot: &RelayerStateSnapshot) -> Result<U256> {
    if snapshot.is_empty() {
        return Err(AllocationError::EmptySnapshot);
    }
    let total = snapshot.total_stake();
    if total.is_zero() {
        return Err(AllocationError::ZeroTotalStake);
    }
    Ok(total)
}

/// Number of relayers any draw can land on.
///
/// Relayer `i` owns the values `lo..=hi` with `lo = cdf[i-1] + 1` (0 for the
/// first relayer) and `hi = min(cdf[i], total - 1)`. Zero-stake relayers and a
/// last relayer holding a single unit own nothing.
pub fn eligible_count(snapshot: &RelayerStateSnapshot) -> usize {
    let total = snapshot.total_stake();
    if total.is_zero() {
        return 0;
    }
    let cdf = snapshot.cdf();
    let max_value = total - U256::one();
    (0..cdf.len())
        .filter(|&i| {
            let lo = if i == 0 { U256::zero() } else { cdf[i - 1] + U256::one() };
            let hi = cdf[i].min(max_value);
            lo <= hi
        })
        .count()
}

/// Run the selection loop for a window.
///
/// Exactly `relayers_per_window` distinct relayers are drawn, or every
/// relayer when the snapshot is smaller than that. Fails with
/// [`AllocationError::InsufficientEligibleRelayers`] when fewer relayers can
/// be drawn than required. `max_iterations` bounds the rejection sampling.
pub fn select_relayers(
    window: WindowIndex,
    snapshot: &RelayerStateSnapshot,
    relayers_per_window: usize,
    max_iterations: u64,
) -> Result<SelectionResult> {
    if relayers_per_window == 0 {
        return Err(AllocationError::ZeroRelayersPerWindow);
    }
    let total = validate(snapshot)?;
    let target = relayers_per_window.min(snapshot.len());
    let eligible = eligible_count(snapshot);
    if eligible < target {
        return Err(AllocationError::InsufficientEligibleRelayers {
            window,
            eligible,
            required: target,
        });
    }
    let seed = base_seed(window);

    let mut seen = HashSet::with_capacity(target);
    let mut selected_relayers = Vec::with_capacity(target);
    let mut selected_cdf_indices = Vec::with_capacity(target);
    let mut iteration_log = Vec::new();

    let mut iteration = 0u64;
    while selected_relayers.len() < target {
        if iteration >= max_iterations {
            return Err(AllocationError::SelectionExhausted {
                window,
                iterations: iteration,
                selected: selected_relayers.len(),
                target,
            });
        }
        let d = draw_unchecked(&seed, iteration, snapshot, total);
        if seen.insert(d.relayer) {
            selected_relayers.push(d.relayer);
            selected_cdf_indices.push(d.cdf_index);
        }
        iteration_log.push(d);
        iteration += 1;
    }

    tracing::trace!(
        window,
        iterations = iteration_log.len(),
        selected = selected_relayers.len(),
        "Relayer selection complete"
    );

    Ok(SelectionResult {
        window,
        selected_relayers,
        selected_cdf_indices,
        iteration_log,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaynet_core::ether;

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn three_relayers() -> RelayerStateSnapshot {
        RelayerStateSnapshot::from_stakes(&[(addr(1), ether(1)), (addr(2), ether(2)), (addr(3), ether(2))]).unwrap()
    }

    #[test]
    fn test_selection_is_deterministic() {
        let snapshot = three_relayers();
        let a = select_relayers(12, &snapshot, 2, 10_000).unwrap();
        let b = select_relayers(12, &snapshot, 2, 10_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_selection_distinct_and_bounded() {
        let snapshot = three_relayers();
        for window in 0..50 {
            let result = select_relayers(window, &snapshot, 2, 10_000).unwrap();
            assert_eq!(result.selected_relayers.len(), 2);
            let distinct: HashSet<_> = result.selected_relayers.iter().collect();
            assert_eq!(distinct.len(), 2);
            assert!(result.iteration_log.len() >= 2);
        }
    }

    #[test]
    fn test_log_matches_individual_draws() {
        let snapshot = three_relayers();
        let result = select_relayers(7, &snapshot, 3, 10_000).unwrap();
        let seed = base_seed(7);
        for (i, logged) in result.iteration_log.iter().enumerate() {
            assert_eq!(draw(&seed, i as u64, &snapshot).unwrap(), *logged);
        }
        for (relayer, index) in result.selected_relayers.iter().zip(&result.selected_cdf_indices) {
            assert_eq!(snapshot.relayers()[*index], *relayer);
        }
    }

    #[test]
    fn test_last_draw_introduces_new_relayer() {
        let snapshot = three_relayers();
        let result = select_relayers(3, &snapshot, 3, 10_000).unwrap();
        let last = result.iteration_log.last().unwrap();
        assert_eq!(result.first_iteration_of(&last.relayer), Some(result.iteration_log.len() as u64 - 1));
    }

    #[test]
    fn test_target_capped_at_snapshot_size() {
        let snapshot = RelayerStateSnapshot::from_stakes(&[(addr(1), ether(1))]).unwrap();
        let result = select_relayers(0, &snapshot, 5, 10_000).unwrap();
        assert_eq!(result.selected_relayers, vec![addr(1)]);
        assert_eq!(result.iteration_log.len(), 1);
    }

    #[test]
    fn test_zero_stake_relayer_never_selected() {
        let snapshot = RelayerStateSnapshot::from_stakes(&[
            (addr(1), ether(1)),
            (addr(2), U256::zero()),
            (addr(3), ether(1)),
        ])
        .unwrap();
        assert_eq!(eligible_count(&snapshot), 2);
        for window in 0..20 {
            let result = select_relayers(window, &snapshot, 2, 10_000).unwrap();
            assert!(!result.is_selected(&addr(2)));
            assert_eq!(result.selected_relayers.len(), 2);
        }
    }

    #[test]
    fn test_too_few_staked_relayers_is_an_error() {
        let snapshot = RelayerStateSnapshot::from_stakes(&[
            (addr(1), ether(1)),
            (addr(2), U256::zero()),
            (addr(3), ether(1)),
        ])
        .unwrap();
        assert_eq!(
            select_relayers(0, &snapshot, 3, 10_000),
            Err(AllocationError::InsufficientEligibleRelayers {
                window: 0,
                eligible: 2,
                required: 3,
            })
        );

        // A small set is capped at its size, but every member must be drawable
        let small = RelayerStateSnapshot::from_stakes(&[(addr(1), ether(1)), (addr(2), U256::zero())]).unwrap();
        assert!(matches!(
            select_relayers(0, &small, 5, 10_000),
            Err(AllocationError::InsufficientEligibleRelayers { required: 2, .. })
        ));
    }

    #[test]
    fn test_eligible_count_last_single_unit() {
        // total = 3: relayer 1 owns 0..=2, relayer 2 owns nothing
        let snapshot = RelayerStateSnapshot::new(vec![addr(1), addr(2)], vec![U256::from(2u64), U256::from(3u64)])
            .unwrap();
        assert_eq!(eligible_count(&snapshot), 1);
    }

    #[test]
    fn test_zero_total_stake_rejected() {
        let snapshot = RelayerStateSnapshot::from_stakes(&[(addr(1), U256::zero())]).unwrap();
        assert_eq!(select_relayers(0, &snapshot, 1, 100), Err(AllocationError::ZeroTotalStake));
    }

    #[test]
    fn test_empty_snapshot_rejected() {
        let snapshot = RelayerStateSnapshot::new(vec![], vec![]).unwrap();
        assert_eq!(select_relayers(0, &snapshot, 1, 100), Err(AllocationError::EmptySnapshot));
    }

    #[test]
    fn test_zero_relayers_per_window_rejected() {
        assert_eq!(
            select_relayers(0, &three_relayers(), 0, 100),
            Err(AllocationError::ZeroRelayersPerWindow)
        );
    }

    #[test]
    fn test_iteration_cap() {
        let result = select_relayers(0, &three_relayers(), 3, 1);
        assert!(matches!(
            result,
            Err(AllocationError::SelectionExhausted { iterations: 1, selected: 1, target: 3, .. })
        ));
    }

    #[test]
    fn test_iterations_of_counts_duplicates() {
        let snapshot = three_relayers();
        let result = select_relayers(1, &snapshot, 3, 10_000).unwrap();
        let total: usize = result
            .selected_relayers
            .iter()
            .map(|r| result.iterations_of(r).len())
            .sum();
        assert_eq!(total, result.iteration_log.len());
    }
}
