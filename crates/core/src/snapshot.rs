//! Relayer state snapshots
//!
//! A snapshot is the immutable pair (relayers, cdf) the allocator contract
//! commits to by hash. `cdf[i]` is the cumulative stake of relayers `0..=i`,
//! so the last entry is the total stake weight.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::abi::{encode_address, encode_u256, keccak256_words};
use crate::{Address, CoreError, Hash, Result, U256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSnapshot")]
pub struct RelayerStateSnapshot {
    relayers: Vec<Address>,
    cdf: Vec<U256>,
}

#[derive(Deserialize)]
struct RawSnapshot {
    relayers: Vec<Address>,
    cdf: Vec<U256>,
}

impl TryFrom<RawSnapshot> for RelayerStateSnapshot {
    type Error = CoreError;

    fn try_from(raw: RawSnapshot) -> Result<Self> {
        Self::new(raw.relayers, raw.cdf)
    }
}

impl RelayerStateSnapshot {
    /// Build a snapshot, rejecting malformed input.
    ///
    /// An empty snapshot is structurally valid; selection rejects it later.
    pub fn new(relayers: Vec<Address>, cdf: Vec<U256>) -> Result<Self> {
        if relayers.len() != cdf.len() {
            return Err(CoreError::SnapshotLengthMismatch {
                relayers: relayers.len(),
                cdf: cdf.len(),
            });
        }
        for i in 1..cdf.len() {
            if cdf[i] < cdf[i - 1] {
                return Err(CoreError::DecreasingCdf(i));
            }
        }
        let mut seen = HashSet::with_capacity(relayers.len());
        for relayer in &relayers {
            if !seen.insert(*relayer) {
                return Err(CoreError::DuplicateRelayer(format!("{:?}", relayer)));
            }
        }
        Ok(Self { relayers, cdf })
    }

    /// Build a snapshot from per-relayer stakes in on-chain order
    pub fn from_stakes(stakes: &[(Address, U256)]) -> Result<Self> {
        let mut relayers = Vec::with_capacity(stakes.len());
        let mut cdf = Vec::with_capacity(stakes.len());
        let mut running = U256::zero();
        for (relayer, stake) in stakes {
            running = running.checked_add(*stake).ok_or(CoreError::StakeOverflow)?;
            relayers.push(*relayer);
            cdf.push(running);
        }
        Self::new(relayers, cdf)
    }

    /// Single-relayer snapshot used to seed a fresh store
    pub fn genesis(relayer: Address, stake: U256) -> Self {
        Self {
            relayers: vec![relayer],
            cdf: vec![stake],
        }
    }

    pub fn relayers(&self) -> &[Address] {
        &self.relayers
    }

    pub fn cdf(&self) -> &[U256] {
        &self.cdf
    }

    pub fn len(&self) -> usize {
        self.relayers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relayers.is_empty()
    }

    /// Total stake weight (last cdf entry, zero when empty)
    pub fn total_stake(&self) -> U256 {
        self.cdf.last().copied().unwrap_or_default()
    }

    pub fn index_of(&self, relayer: &Address) -> Option<usize> {
        self.relayers.iter().position(|r| r == relayer)
    }

    pub fn contains(&self, relayer: &Address) -> bool {
        self.index_of(relayer).is_some()
    }

    /// Stake held by the relayer at `index`
    pub fn stake_at(&self, index: usize) -> Option<U256> {
        let upper = *self.cdf.get(index)?;
        let lower = if index == 0 {
            U256::zero()
        } else {
            self.cdf[index - 1]
        };
        Some(upper - lower)
    }

    pub fn stake_of(&self, relayer: &Address) -> Option<U256> {
        self.index_of(relayer).and_then(|i| self.stake_at(i))
    }

    /// Content hash:
    /// `keccak256(keccak256(packed cdf) ‖ keccak256(packed relayers))`
    pub fn hash(&self) -> Hash {
        let cdf_hash = keccak256_words(self.cdf.iter().map(|v| encode_u256(*v)));
        let relayers_hash = keccak256_words(self.relayers.iter().map(encode_address));
        keccak256_words([cdf_hash.to_fixed_bytes(), relayers_hash.to_fixed_bytes()])
    }
}
