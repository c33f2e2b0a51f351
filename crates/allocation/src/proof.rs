//! Selection proofs
//!
//! A relayer first drawn at iteration `i` is selected when its position in
//! the distinct list is below `relayers_per_window`. If `i` itself is below
//! that bound the iteration alone proves it. Otherwise the proof also lists
//! relayers that were drawn more than once before `i`; subtracting their
//! repeats from `i` must bring the position under the bound.

use std::collections::HashSet;

use relaynet_core::{Address, RelayerStateSnapshot, WindowIndex};
use serde::{Deserialize, Serialize};

use crate::selection::{base_seed, draw, SelectionResult};
use crate::{AllocationError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateProof {
    pub relayer: Address,
    /// Iterations (all before the proven one) at which `relayer` was drawn
    pub iterations: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionProof {
    pub relayer_iteration: u64,
    pub duplicates: Vec<DuplicateProof>,
}

/// Build the proof for `relayer`, or `None` if it was not drawn
pub fn generate_proof(
    selection: &SelectionResult,
    relayer: &Address,
    relayers_per_window: usize,
) -> Option<SelectionProof> {
    let first = selection.first_iteration_of(relayer)? as usize;
    let mut proof = SelectionProof {
        relayer_iteration: first as u64,
        duplicates: Vec::new(),
    };
    if first < relayers_per_window {
        return Some(proof);
    }

    let before = &selection.iteration_log[..first];
    let mut absorbed = HashSet::new();
    let mut position = first;
    for scan in (0..first).rev() {
        if position < relayers_per_window {
            break;
        }
        let candidate = before[scan].relayer;
        if absorbed.contains(&candidate) {
            continue;
        }
        let iterations: Vec<u64> = before
            .iter()
            .enumerate()
            .filter(|(_, d)| d.relayer == candidate)
            .map(|(k, _)| k as u64)
            .collect();
        if iterations.len() > 1 {
            absorbed.insert(candidate);
            position -= iterations.len() - 1;
            proof.duplicates.push(DuplicateProof {
                relayer: candidate,
                iterations,
            });
        }
    }
    Some(proof)
}

/// Re-derive every draw a proof references and check its arithmetic
pub fn verify_proof(
    window: WindowIndex,
    snapshot: &RelayerStateSnapshot,
    relayer: &Address,
    relayers_per_window: usize,
    proof: &SelectionProof,
) -> Result<()> {
    let seed = base_seed(window);
    if draw(&seed, proof.relayer_iteration, snapshot)?.relayer != *relayer {
        return Err(AllocationError::InvalidProof(format!(
            "iteration {} did not draw the relayer",
            proof.relayer_iteration
        )));
    }

    let mut seen_relayers = HashSet::new();
    let mut seen_iterations = HashSet::new();
    let mut absorbed = 0u64;
    for duplicate in &proof.duplicates {
        if duplicate.relayer == *relayer || !seen_relayers.insert(duplicate.relayer) {
            return Err(AllocationError::InvalidProof(format!(
                "duplicate entry for {:?} repeated or self-referential",
                duplicate.relayer
            )));
        }
        if duplicate.iterations.len() < 2 {
            return Err(AllocationError::InvalidProof(format!(
                "{:?} listed with fewer than two draws",
                duplicate.relayer
            )));
        }
        for &iteration in &duplicate.iterations {
            if iteration >= proof.relayer_iteration || !seen_iterations.insert(iteration) {
                return Err(AllocationError::InvalidProof(format!(
                    "iteration {} out of order or reused",
                    iteration
                )));
            }
            if draw(&seed, iteration, snapshot)?.relayer != duplicate.relayer {
                return Err(AllocationError::InvalidProof(format!(
                    "iteration {} did not draw {:?}",
                    iteration, duplicate.relayer
                )));
            }
        }
        absorbed += duplicate.iterations.len() as u64 - 1;
    }

    if proof.relayer_iteration - absorbed >= relayers_per_window as u64 {
        return Err(AllocationError::InvalidProof(format!(
            "position {} not within {} relayers per window",
            proof.relayer_iteration - absorbed,
            relayers_per_window
        )));
    }
    Ok(())
}
