use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use relaynet_core::{Address, ChainId};
use relaynet_ledger::Ledger;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{NonceError, Result};

type Key = (Address, ChainId);

#[derive(Debug)]
struct NonceState {
    base: u64,
    next_offset: u64,
    reclaimed: BinaryHeap<Reverse<u64>>,
    reclaimed_set: HashSet<u64>,
}

impl NonceState {
    fn new(base: u64) -> Self {
        Self {
            base,
            next_offset: 0,
            reclaimed: BinaryHeap::new(),
            reclaimed_set: HashSet::new(),
        }
    }

    /// First nonce never handed out
    fn high_water(&self) -> Option<u64> {
        self.base.checked_add(self.next_offset)
    }
}

#[derive(Debug)]
struct AccountNonces {
    state: Mutex<NonceState>,
}

pub struct NonceManager {
    ledgers: HashMap<ChainId, Arc<dyn Ledger>>,
    accounts: Mutex<HashMap<Key, Arc<OnceCell<Arc<AccountNonces>>>>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self {
            ledgers: HashMap::new(),
            accounts: Mutex::new(HashMap::new()),
        }
    }

    /// Manager for a single chain
    pub fn for_ledger(chain: ChainId, ledger: Arc<dyn Ledger>) -> Self {
        Self::new().with_chain(chain, ledger)
    }

    pub fn with_chain(mut self, chain: ChainId, ledger: Arc<dyn Ledger>) -> Self {
        self.ledgers.insert(chain, ledger);
        self
    }

    /// Fetch the base nonce for `(account, chain)` if not done yet
    pub async fn initialize(&self, account: Address, chain: ChainId) -> Result<()> {
        let ledger = self.ledgers.get(&chain).ok_or(NonceError::UnknownChain(chain))?;
        let cell = {
            let mut accounts = self.accounts.lock();
            accounts.entry((account, chain)).or_default().clone()
        };
        cell.get_or_try_init(|| async {
            let base = ledger.transaction_count(account).await?;
            info!(account = ?account, chain, base, "Nonce state initialized");
            Ok::<_, NonceError>(Arc::new(AccountNonces {
                state: Mutex::new(NonceState::new(base)),
            }))
        })
        .await?;
        Ok(())
    }

    pub fn is_initialized(&self, account: Address, chain: ChainId) -> bool {
        self.accounts
            .lock()
            .get(&(account, chain))
            .is_some_and(|cell| cell.initialized())
    }

    fn account(&self, account: Address, chain: ChainId) -> Result<Arc<AccountNonces>> {
        self.accounts
            .lock()
            .get(&(account, chain))
            .and_then(|cell| cell.get().cloned())
            .ok_or(NonceError::NotInitialized { account, chain })
    }

    /// Issue the next nonce. Requires [`NonceManager::initialize`].
    pub fn next_nonce(&self, account: Address, chain: ChainId) -> Result<u64> {
        let nonces = self.account(account, chain)?;
        let mut state = nonces.state.lock();
        if let Some(Reverse(nonce)) = state.reclaimed.pop() {
            state.reclaimed_set.remove(&nonce);
            debug!(account = ?account, chain, nonce, "Reissuing reclaimed nonce");
            return Ok(nonce);
        }
        let nonce = state.high_water().ok_or(NonceError::Exhausted { account, chain })?;
        state.next_offset += 1;
        Ok(nonce)
    }

    /// Initialize if needed, then issue the next nonce
    pub async fn acquire(&self, account: Address, chain: ChainId) -> Result<u64> {
        self.initialize(account, chain).await?;
        self.next_nonce(account, chain)
    }

    /// Return an issued but unconsumed nonce to the pool
    pub fn reclaim(&self, account: Address, chain: ChainId, nonce: u64) -> Result<()> {
        let nonces = self.account(account, chain)?;
        let mut state = nonces.state.lock();
        let issued = nonce >= state.base && state.high_water().map_or(true, |hw| nonce < hw);
        if !issued {
            return Err(NonceError::NotIssued(nonce));
        }
        if !state.reclaimed_set.insert(nonce) {
            return Err(NonceError::AlreadyReclaimed(nonce));
        }
        state.reclaimed.push(Reverse(nonce));
        debug!(account = ?account, chain, nonce, "Nonce reclaimed");
        Ok(())
    }

    /// Number of nonces waiting to be reissued
    pub fn reclaimed_count(&self, account: Address, chain: ChainId) -> Result<usize> {
        Ok(self.account(account, chain)?.state.lock().reclaimed.len())
    }
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new()
    }
}
