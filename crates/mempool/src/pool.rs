//! Insertion-ordered transaction pool
//!
//! | Operation  | Complexity   |
//! |------------|--------------|
//! | `add`      | O(log n)     |
//! | `remove`   | O(k log n)   |
//! | `snapshot` | O(n)         |
//!
//! Every operation runs under a single mutex, so concurrent callers observe
//! a linearizable set.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use relaynet_core::{Transaction, TxId};

#[derive(Debug, Default)]
struct PoolInner {
    next_seq: u64,
    index: HashMap<TxId, u64>,
    ordered: BTreeMap<u64, Transaction>,
}

#[derive(Debug, Default)]
pub struct Mempool {
    inner: Mutex<PoolInner>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction; `false` if an identical one is already pending
    pub fn add(&self, tx: Transaction) -> bool {
        let id = tx.id();
        let mut inner = self.inner.lock();
        if inner.index.contains_key(&id) {
            return false;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.index.insert(id, seq);
        inner.ordered.insert(seq, tx);
        true
    }

    /// Insert several transactions atomically, returning how many were new
    pub fn add_all(&self, txs: impl IntoIterator<Item = Transaction>) -> usize {
        let mut inner = self.inner.lock();
        let mut added = 0;
        for tx in txs {
            let id = tx.id();
            if inner.index.contains_key(&id) {
                continue;
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.index.insert(id, seq);
            inner.ordered.insert(seq, tx);
            added += 1;
        }
        added
    }

    /// Remove the given transactions, returning how many were present
    pub fn remove(&self, txs: &[Transaction]) -> usize {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for tx in txs {
            if let Some(seq) = inner.index.remove(&tx.id()) {
                inner.ordered.remove(&seq);
                removed += 1;
            }
        }
        removed
    }

    /// Pending transactions in insertion order
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.inner.lock().ordered.values().cloned().collect()
    }

    pub fn contains(&self, tx: &Transaction) -> bool {
        self.inner.lock().index.contains_key(&tx.id())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().ordered.is_empty()
    }
}
