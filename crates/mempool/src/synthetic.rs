//! Synthetic transaction generator
//!
//! Produces `executeMinimalApplication(bytes32)` calls whose argument is
//! `keccak256(uint256 counter)`, so every generated transaction is unique.

use std::sync::Arc;
use std::time::Duration;

use relaynet_core::abi::{encode_call, encode_u256, keccak256};
use relaynet_core::{Transaction, U256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::Mempool;

pub const MINIMAL_APPLICATION_SIGNATURE: &str = "executeMinimalApplication(bytes32)";

/// Call data for the `counter`-th synthetic transaction
pub fn minimal_application_call(counter: u64) -> Transaction {
    let argument = keccak256(encode_u256(U256::from(counter)));
    Transaction::call(encode_call(
        MINIMAL_APPLICATION_SIGNATURE,
        &[argument.to_fixed_bytes()],
    ))
}

pub struct SyntheticGenerator {
    mempool: Arc<Mempool>,
    interval: Duration,
    per_interval: usize,
    counter: u64,
}

impl SyntheticGenerator {
    pub fn new(mempool: Arc<Mempool>, interval: Duration, per_interval: usize) -> Self {
        Self {
            mempool,
            interval,
            per_interval,
            counter: 0,
        }
    }

    /// Number of transactions generated so far
    pub fn generated(&self) -> u64 {
        self.counter
    }

    /// Generate one interval's worth of transactions
    pub fn generate_batch(&mut self) -> usize {
        let start = self.counter;
        self.counter += self.per_interval as u64;
        let added = self
            .mempool
            .add_all((start..self.counter).map(minimal_application_call));
        trace!(start, added, "Generated synthetic transactions");
        added
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.generate_batch();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(generated = self.counter, "Synthetic generator stopped");
                        break;
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
