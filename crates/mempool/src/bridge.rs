//! Bridge mode: feed cross-chain deliveries into the pool
//!
//! Each pending delivery gets its own polling task. The task asks the proof
//! source on a fixed interval until the signed artifact exists, wraps it in a
//! delivery call and inserts it. Fetch errors are logged and retried on the
//! next tick; only shutdown ends a task early.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relaynet_core::abi::{encode_bytes, function_selector};
use relaynet_core::Transaction;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Mempool, Result};

pub const DELIVER_SIGNATURE: &str = "deliver(bytes)";

/// A cross-chain message awaiting its signed delivery proof
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingDelivery {
    /// Source chain id in the bridge's numbering
    pub chain: u16,
    /// Emitter address as 32-byte hex, no prefix
    pub emitter: String,
    pub sequence: u64,
}

impl fmt::Display for PendingDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.chain, self.emitter, self.sequence)
    }
}

impl FromStr for PendingDelivery {
    type Err = String;

    /// Parse `chain/emitter/sequence`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.trim().split('/');
        let (Some(chain), Some(emitter), Some(sequence), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("expected chain/emitter/sequence, got {}", s));
        };
        let emitter = emitter.trim_start_matches("0x").to_ascii_lowercase();
        if emitter.len() != 64 || !emitter.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("emitter must be 32 bytes of hex: {}", emitter));
        }
        Ok(Self {
            chain: chain.parse().map_err(|_| format!("invalid chain id: {}", chain))?,
            emitter,
            sequence: sequence.parse().map_err(|_| format!("invalid sequence: {}", sequence))?,
        })
    }
}

#[async_trait]
pub trait DeliveryProofSource: Send + Sync {
    /// Signed proof bytes, or `None` while not yet available
    async fn fetch_proof(&self, delivery: &PendingDelivery) -> Result<Option<Vec<u8>>>;
}

/// `deliver(bytes proof)` call carrying a signed delivery proof
pub fn delivery_transaction(proof: &[u8]) -> Transaction {
    let mut data = function_selector(DELIVER_SIGNATURE).to_vec();
    data.extend_from_slice(&encode_bytes(proof));
    Transaction::call(data)
}

#[derive(Clone)]
pub struct BridgeFeeder {
    source: Arc<dyn DeliveryProofSource>,
    mempool: Arc<Mempool>,
    poll_interval: Duration,
}

impl BridgeFeeder {
    pub fn new(source: Arc<dyn DeliveryProofSource>, mempool: Arc<Mempool>, poll_interval: Duration) -> Self {
        Self {
            source,
            mempool,
            poll_interval,
        }
    }

    /// Poll until the proof is ready and inserted (`true`) or shutdown (`false`)
    pub async fn feed(&self, delivery: PendingDelivery, mut shutdown: watch::Receiver<bool>) -> bool {
        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut attempts = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    attempts += 1;
                    let fetched = tokio::select! {
                        fetched = self.source.fetch_proof(&delivery) => fetched,
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                debug!(%delivery, attempts, "Delivery polling stopped during fetch");
                                return false;
                            }
                            continue;
                        }
                    };
                    match fetched {
                        Ok(Some(proof)) => {
                            let inserted = self.mempool.add(delivery_transaction(&proof));
                            info!(%delivery, attempts, inserted, "Delivery proof ready");
                            return true;
                        }
                        Ok(None) => {
                            debug!(%delivery, attempts, "Delivery proof not ready");
                        }
                        Err(e) => {
                            warn!(%delivery, attempts, "Delivery proof fetch failed, retrying: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(%delivery, attempts, "Delivery polling stopped");
                        return false;
                    }
                }
            }
        }
    }

    /// Spawn a polling task for one delivery
    pub fn spawn(&self, delivery: PendingDelivery, shutdown: watch::Receiver<bool>) -> JoinHandle<bool> {
        let feeder = self.clone();
        tokio::spawn(async move { feeder.feed(delivery, shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MempoolError;
    use parking_lot::Mutex;

    /// Fails, then reports not ready, then serves the proof
    struct ScriptedSource {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl DeliveryProofSource for ScriptedSource {
        async fn fetch_proof(&self, _delivery: &PendingDelivery) -> Result<Option<Vec<u8>>> {
            let mut calls = self.calls.lock();
            *calls += 1;
            match *calls {
                1 => Err(MempoolError::TransientFetch("connection reset".to_string())),
                2 => Ok(None),
                _ => Ok(Some(vec![0xab; 40])),
            }
        }
    }

    struct NeverReady;

    #[async_trait]
    impl DeliveryProofSource for NeverReady {
        async fn fetch_proof(&self, _delivery: &PendingDelivery) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    struct Hanging;

    #[async_trait]
    impl DeliveryProofSource for Hanging {
        async fn fetch_proof(&self, _delivery: &PendingDelivery) -> Result<Option<Vec<u8>>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
    }

    fn delivery() -> PendingDelivery {
        PendingDelivery {
            chain: 2,
            emitter: "00".repeat(32),
            sequence: 7,
        }
    }

    #[tokio::test]
    async fn test_retries_until_ready() {
        let pool = Arc::new(Mempool::new());
        let source = Arc::new(ScriptedSource { calls: Mutex::new(0) });
        let feeder = BridgeFeeder::new(source.clone(), pool.clone(), Duration::from_millis(5));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        assert!(feeder.feed(delivery(), shutdown_rx).await);
        assert_eq!(*source.calls.lock(), 3);
        assert_eq!(pool.snapshot(), vec![delivery_transaction(&[0xab; 40])]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_polling() {
        let pool = Arc::new(Mempool::new());
        let feeder = BridgeFeeder::new(Arc::new(NeverReady), pool.clone(), Duration::from_millis(5));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = feeder.spawn(delivery(), shutdown_rx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        assert!(!handle.await.unwrap());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_hanging_fetch() {
        let pool = Arc::new(Mempool::new());
        let feeder = BridgeFeeder::new(Arc::new(Hanging), pool.clone(), Duration::from_millis(5));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = feeder.spawn(delivery(), shutdown_rx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("feeder should stop while a fetch is in flight");
        assert!(!stopped.unwrap());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_delivery_transaction_layout() {
        let tx = delivery_transaction(&[1, 2]);
        assert_eq!(&tx.data[..4], &function_selector(DELIVER_SIGNATURE));
        assert_eq!(tx.data.len(), 4 + 96);
    }

    #[test]
    fn test_delivery_display() {
        assert_eq!(delivery().to_string(), format!("2/{}/7", "00".repeat(32)));
    }

    #[test]
    fn test_delivery_parse() {
        let parsed: PendingDelivery = delivery().to_string().parse().unwrap();
        assert_eq!(parsed, delivery());
        assert!("2/abc/7".parse::<PendingDelivery>().is_err());
        assert!(format!("2/{}", "00".repeat(32)).parse::<PendingDelivery>().is_err());
        assert!(format!("x/{}/7", "00".repeat(32)).parse::<PendingDelivery>().is_err());
    }
}
