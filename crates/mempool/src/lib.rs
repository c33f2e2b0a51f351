//! RelayNet Mempool
//!
//! Concurrent pool of pending transactions shared by every relayer task,
//! plus the two ways it gets filled:
//!
//! - Synthetic mode: a periodic generator of minimal application calls
//! - Bridge mode: polling a delivery-proof service for cross-chain messages

mod bridge;
mod error;
mod guardian;
mod pool;
mod synthetic;

pub use bridge::{delivery_transaction, BridgeFeeder, DeliveryProofSource, PendingDelivery, DELIVER_SIGNATURE};
pub use error::{MempoolError, Result};
pub use guardian::GuardianClient;
pub use pool::Mempool;
pub use synthetic::{minimal_application_call, SyntheticGenerator, MINIMAL_APPLICATION_SIGNATURE};
