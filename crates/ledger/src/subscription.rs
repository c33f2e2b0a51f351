//! Cancellable ledger subscriptions

use relaynet_core::{BlockNumber, RelayerStateEvent};
use tokio::sync::broadcast;
use tracing::warn;

/// Ordered stream of items from a broadcast channel.
///
/// A slow consumer that falls behind skips the missed items and keeps
/// receiving; the stream ends when the ledger drops its sender.
pub struct Subscription<T> {
    name: &'static str,
    receiver: broadcast::Receiver<T>,
}

pub type BlockSubscription = Subscription<BlockNumber>;
pub type RelayerStateSubscription = Subscription<RelayerStateEvent>;

impl<T: Clone> Subscription<T> {
    pub fn new(name: &'static str, receiver: broadcast::Receiver<T>) -> Self {
        Self { name, receiver }
    }

    /// Next item, or `None` once the source is gone
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(item) => return Some(item),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(subscription = self.name, skipped, "Subscriber lagged, skipping items");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_items_arrive_in_order() {
        let (tx, rx) = broadcast::channel(16);
        let mut sub = BlockSubscription::new("blocks", rx);
        for block in 1..=3u64 {
            tx.send(block).unwrap();
        }
        assert_eq!(sub.next().await, Some(1));
        assert_eq!(sub.next().await, Some(2));
        assert_eq!(sub.next().await, Some(3));
    }

    #[tokio::test]
    async fn test_lagged_subscriber_continues() {
        let (tx, rx) = broadcast::channel(2);
        let mut sub = BlockSubscription::new("blocks", rx);
        for block in 1..=5u64 {
            tx.send(block).unwrap();
        }
        assert_eq!(sub.next().await, Some(4));
        assert_eq!(sub.next().await, Some(5));
    }

    #[tokio::test]
    async fn test_closed_source_ends_stream() {
        let (tx, rx) = broadcast::channel::<u64>(2);
        let mut sub = BlockSubscription::new("blocks", rx);
        drop(tx);
        assert_eq!(sub.next().await, None);
    }
}
