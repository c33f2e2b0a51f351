//! Relayer agent
//!
//! One agent drives one relayer: funding and registration first, then a
//! block loop that acts on window boundaries and occasionally claims
//! protocol rewards. What the agent observes for reporting lives in
//! [`AgentStats`], which observers hold while the agent runs in its own task.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relaynet_allocation::{active_to_latest_map, AllocationEngine, AllocationResult};
use relaynet_core::{
    ether, is_window_boundary, window_index, Address, BlockNumber, ChainId, Hash, RelayerStateSnapshot,
    RelayerStatus, WindowIndex, U256,
};
use relaynet_ledger::{ExecuteBatch, Ledger, RegisterRequest};
use relaynet_mempool::Mempool;
use relaynet_nonce::NonceManager;
use relaynet_settings::FailurePolicy;
use relaynet_state_store::{replay_history, RelayerStateStore, StateStoreError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{RelayError, Result, WindowParticipationRecord};

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Stake bonded at registration
    pub stake: U256,
    /// Native balance the funder tops the relayer up to
    pub funding_amount: U256,
    /// Endpoint advertised at registration
    pub endpoint: String,
    pub delegator_premium: U256,
    /// Per-block chance of claiming protocol rewards
    pub claim_probability: f64,
    pub failure_policy: FailurePolicy,
    /// Seed for the claim coin flips, random when unset
    pub rng_seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            stake: ether(1),
            funding_amount: ether(10),
            endpoint: "http://localhost".to_string(),
            delegator_premium: U256::zero(),
            claim_probability: 0.1,
            failure_policy: FailurePolicy::Exit,
            rng_seed: None,
        }
    }
}

/// Lifecycle of a relayer as seen by its agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentState {
    #[default]
    Unregistered,
    Funding,
    Registering,
    Active,
    Jailed,
    Exiting,
}

impl From<RelayerStatus> for AgentState {
    fn from(status: RelayerStatus) -> Self {
        match status {
            RelayerStatus::Inactive => AgentState::Unregistered,
            RelayerStatus::Active => AgentState::Active,
            RelayerStatus::Exiting => AgentState::Exiting,
            RelayerStatus::Jailed => AgentState::Jailed,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Unregistered => "unregistered",
            AgentState::Funding => "funding",
            AgentState::Registering => "registering",
            AgentState::Active => "active",
            AgentState::Jailed => "jailed",
            AgentState::Exiting => "exiting",
        };
        f.write_str(name)
    }
}

/// What happened at a window boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowOutcome {
    /// The ledger does not list the relayer as active
    Inactive(RelayerStatus),
    NotSelected,
    /// Selected, but nothing was allocated to this relayer
    Idle,
    Submitted { transactions: usize, nonce: u64 },
    /// Batch rejected and dropped under [`FailurePolicy::SkipWindow`]
    Skipped { reason: String },
    /// Ledger unreachable during submission; transactions stay pooled for
    /// the next window under either policy
    Deferred { reason: String },
}

/// Observable counters of one agent
#[derive(Debug)]
pub struct AgentStats {
    address: Address,
    state: RwLock<AgentState>,
    participation: RwLock<WindowParticipationRecord>,
    original_stake: RwLock<U256>,
    claimed: RwLock<U256>,
    batches_submitted: RwLock<u64>,
}

impl AgentStats {
    fn new(address: Address) -> Self {
        Self {
            address,
            state: RwLock::new(AgentState::Unregistered),
            participation: RwLock::new(WindowParticipationRecord::new()),
            original_stake: RwLock::new(U256::zero()),
            claimed: RwLock::new(U256::zero()),
            batches_submitted: RwLock::new(0),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    pub fn participation(&self) -> WindowParticipationRecord {
        self.participation.read().clone()
    }

    /// Stake bonded when the relayer registered
    pub fn original_stake(&self) -> U256 {
        *self.original_stake.read()
    }

    /// Protocol rewards claimed so far
    pub fn claimed(&self) -> U256 {
        *self.claimed.read()
    }

    pub fn batches_submitted(&self) -> u64 {
        *self.batches_submitted.read()
    }

    fn set_state(&self, next: AgentState) {
        let mut state = self.state.write();
        if *state != next {
            info!(relayer = ?self.address, from = %*state, to = %next, "Relayer state changed");
            *state = next;
        }
    }
}

pub struct RelayerAgent {
    address: Address,
    funder: Option<Address>,
    config: AgentConfig,
    ledger: Arc<dyn Ledger>,
    store: Arc<RelayerStateStore>,
    engine: Arc<AllocationEngine>,
    nonces: Arc<NonceManager>,
    mempool: Arc<Mempool>,
    stats: Arc<AgentStats>,
    rng: StdRng,
    initialized: bool,
    chain_id: ChainId,
    blocks_per_window: u64,
    last_window: Option<WindowIndex>,
}

impl RelayerAgent {
    pub fn new(
        address: Address,
        config: AgentConfig,
        ledger: Arc<dyn Ledger>,
        store: Arc<RelayerStateStore>,
        engine: Arc<AllocationEngine>,
        nonces: Arc<NonceManager>,
        mempool: Arc<Mempool>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            address,
            funder: None,
            config,
            ledger,
            store,
            engine,
            nonces,
            mempool,
            stats: Arc::new(AgentStats::new(address)),
            rng,
            initialized: false,
            chain_id: 0,
            blocks_per_window: 0,
            last_window: None,
        }
    }

    /// Account that tops up the relayer's native balance
    pub fn with_funder(mut self, funder: Address) -> Self {
        self.funder = Some(funder);
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn stats(&self) -> Arc<AgentStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> AgentState {
        self.stats.state()
    }

    /// Read ledger parameters, fund, register and prime the nonce state
    pub async fn initialize(&mut self) -> Result<()> {
        self.chain_id = self.ledger.chain_id().await?;
        self.blocks_per_window = self.ledger.blocks_per_window().await?;
        if self.blocks_per_window == 0 {
            return Err(RelayError::ZeroBlocksPerWindow);
        }
        let ledger_rpw = self.ledger.relayers_per_window().await?;
        let engine_rpw = self.engine.config().relayers_per_window;
        if ledger_rpw != engine_rpw {
            return Err(RelayError::ConfigMismatch {
                engine: engine_rpw,
                ledger: ledger_rpw,
            });
        }

        let block = self.ledger.block_number().await?;
        let window = window_index(block, self.blocks_per_window);

        self.fund(window).await?;
        self.register(window).await?;
        self.nonces
            .initialize(self.address, self.chain_id)
            .await
            .map_err(|e| self.fatal(window, "initialize_nonce", e))?;

        self.initialized = true;
        info!(
            relayer = ?self.address,
            chain_id = self.chain_id,
            state = %self.stats.state(),
            "Relayer initialized"
        );
        Ok(())
    }

    async fn fund(&self, window: WindowIndex) -> Result<()> {
        let Some(funder) = self.funder else {
            return Ok(());
        };
        let balance = self.ledger.balance(self.address).await?;
        if balance >= self.config.funding_amount {
            return Ok(());
        }

        self.stats.set_state(AgentState::Funding);
        let shortfall = self.config.funding_amount - balance;
        self.ledger
            .transfer(funder, self.address, shortfall)
            .await
            .map_err(|e| self.fatal(window, "fund", e))?;
        info!(relayer = ?self.address, funder = ?funder, amount = %shortfall, "Relayer funded");
        Ok(())
    }

    async fn register(&self, window: WindowIndex) -> Result<()> {
        let info = self.ledger.relayer_info(self.address).await?;
        if !info.stake.is_zero() {
            *self.stats.original_stake.write() = info.stake;
            self.stats.set_state(AgentState::from(info.status));
            debug!(relayer = ?self.address, stake = %info.stake, "Relayer already registered");
            return Ok(());
        }

        self.stats.set_state(AgentState::Registering);
        let stake = self.config.stake;
        self.ledger
            .mint(self.address, stake)
            .await
            .map_err(|e| self.fatal(window, "mint", e))?;
        self.ledger
            .approve(self.address, stake)
            .await
            .map_err(|e| self.fatal(window, "approve", e))?;

        let hashes = self
            .ledger
            .relayer_state_hash()
            .await
            .map_err(|e| self.fatal(window, "relayer_state_hash", e))?;
        let latest = self
            .resolve_state(hashes.latest)
            .await
            .map_err(|e| self.fatal(window, "state_lookup", e))?;

        let request = RegisterRequest {
            latest_state: latest.as_ref().clone(),
            stake,
            accounts: vec![self.address],
            endpoint: self.config.endpoint.clone(),
            delegator_premium: self.config.delegator_premium,
        };
        self.ledger
            .register(self.address, request)
            .await
            .map_err(|e| self.fatal(window, "register", e))?;

        *self.stats.original_stake.write() = stake;
        self.stats.set_state(AgentState::Active);
        info!(relayer = ?self.address, %stake, "Relayer registered");
        Ok(())
    }

    /// Look a state up, replaying ledger history once if the store lags
    async fn resolve_state(&self, hash: Hash) -> std::result::Result<Arc<RelayerStateSnapshot>, StateStoreError> {
        match self.store.get(&hash) {
            Err(StateStoreError::StateNotFound(_)) => {
                debug!(state = ?hash, "State not ingested yet, replaying history");
                replay_history(self.ledger.as_ref(), &self.store).await?;
                self.store.get(&hash)
            }
            found => found,
        }
    }

    /// Handle one block. Returns the outcome when the block opens a window
    /// not handled before.
    pub async fn handle_block(&mut self, block: BlockNumber) -> Result<Option<WindowOutcome>> {
        if !self.initialized {
            return Err(self.fatal(
                window_index(block, self.blocks_per_window),
                "handle_block",
                "agent not initialized",
            ));
        }

        let mut outcome = None;
        if is_window_boundary(block, self.blocks_per_window) {
            let window = window_index(block, self.blocks_per_window);
            if self.last_window != Some(window) {
                self.last_window = Some(window);
                outcome = Some(self.handle_window(window).await?);
            }
        }

        self.maybe_claim(block).await;
        Ok(outcome)
    }

    async fn handle_window(&mut self, window: WindowIndex) -> Result<WindowOutcome> {
        let info = self
            .ledger
            .relayer_info(self.address)
            .await
            .map_err(|e| self.fatal(window, "relayer_info", e))?;
        self.stats.set_state(AgentState::from(info.status));
        if info.status != RelayerStatus::Active {
            debug!(relayer = ?self.address, window, status = %info.status, "Relayer not active, skipping window");
            return Ok(WindowOutcome::Inactive(info.status));
        }

        let hashes = self
            .ledger
            .relayer_state_hash()
            .await
            .map_err(|e| self.fatal(window, "relayer_state_hash", e))?;
        let active = self
            .resolve_state(hashes.active)
            .await
            .map_err(|e| self.fatal(window, "state_lookup", e))?;

        let selected = self
            .engine
            .is_selected(&self.address, &active, window)
            .map_err(|e| self.fatal(window, "select_relayers", e))?;
        if !selected {
            debug!(relayer = ?self.address, window, "Not selected");
            return Ok(WindowOutcome::NotSelected);
        }
        self.stats.participation.write().record_selected(window);

        let pending = self.mempool.snapshot();
        let allocation = if pending.is_empty() {
            AllocationResult::default()
        } else {
            self.engine
                .allocate_transactions(&self.address, &pending, &active, window)
                .map_err(|e| self.fatal(window, "allocate_transactions", e))?
        };
        if allocation.is_empty() {
            self.stats.participation.write().record_idle(window);
            debug!(relayer = ?self.address, window, pending = pending.len(), "Selected with nothing to submit");
            return Ok(WindowOutcome::Idle);
        }

        let relayer_index = allocation
            .relayer_cdf_index
            .ok_or_else(|| self.fatal(window, "allocate_transactions", "relayer missing from active state"))?;
        let bitmap = allocation
            .iteration_bitmap()
            .map_err(|e| self.fatal(window, "iteration_bitmap", e))?;
        let latest = self
            .resolve_state(hashes.latest)
            .await
            .map_err(|e| self.fatal(window, "state_lookup", e))?;
        let nonce = self
            .nonces
            .acquire(self.address, self.chain_id)
            .await
            .map_err(|e| self.fatal(window, "acquire_nonce", e))?;

        let count = allocation.transactions.len();
        let batch = ExecuteBatch {
            transactions: allocation.transactions.clone(),
            relayer_index,
            generation_iteration_bitmap: bitmap,
            active_state: active.as_ref().clone(),
            latest_state: latest.as_ref().clone(),
            active_to_latest_map: active_to_latest_map(&active, &latest),
            nonce,
        };

        match self.ledger.execute(self.address, batch).await {
            Ok(receipt) => {
                let removed = self.mempool.remove(&allocation.transactions);
                *self.stats.batches_submitted.write() += 1;
                info!(
                    relayer = ?self.address,
                    window,
                    transactions = count,
                    removed,
                    nonce,
                    block = receipt.block,
                    "Batch submitted"
                );
                Ok(WindowOutcome::Submitted {
                    transactions: count,
                    nonce,
                })
            }
            Err(e) => {
                self.nonces
                    .reclaim(self.address, self.chain_id, nonce)
                    .map_err(|re| self.fatal(window, "reclaim_nonce", re))?;
                if e.is_transient() {
                    warn!(relayer = ?self.address, window, nonce, "Ledger unavailable, batch deferred: {}", e);
                    return Ok(WindowOutcome::Deferred { reason: e.to_string() });
                }
                match self.config.failure_policy {
                    FailurePolicy::Exit => Err(self.fatal(window, "execute", e)),
                    FailurePolicy::SkipWindow => {
                        warn!(relayer = ?self.address, window, nonce, "Batch rejected, skipping window: {}", e);
                        Ok(WindowOutcome::Skipped { reason: e.to_string() })
                    }
                }
            }
        }
    }

    async fn maybe_claim(&mut self, block: BlockNumber) {
        let probability = self.config.claim_probability;
        if self.stats.state() != AgentState::Active || probability.is_nan() || probability <= 0.0 {
            return;
        }
        if !self.rng.gen_bool(probability.min(1.0)) {
            return;
        }

        match self.ledger.relayer_info(self.address).await {
            Ok(info) if info.status == RelayerStatus::Jailed => {
                self.stats.set_state(AgentState::Jailed);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(relayer = ?self.address, block, "Relayer info unavailable, skipping claim: {}", e);
                return;
            }
        }

        match self.ledger.claim_protocol_reward(self.address).await {
            Ok(amount) => {
                let mut claimed = self.stats.claimed.write();
                *claimed = claimed.saturating_add(amount);
                debug!(relayer = ?self.address, block, %amount, "Protocol rewards claimed");
            }
            Err(e) => {
                warn!(relayer = ?self.address, block, "Reward claim failed: {}", e);
            }
        }
    }

    /// Initialize if needed, then follow blocks until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<Arc<AgentStats>> {
        if !self.initialized {
            self.initialize().await?;
        }
        let mut blocks = self.ledger.subscribe_blocks().await?;
        info!(relayer = ?self.address, "Relayer agent started");

        loop {
            tokio::select! {
                block = blocks.next() => {
                    match block {
                        Some(block) => {
                            if let Some(outcome) = self.handle_block(block).await? {
                                debug!(relayer = ?self.address, block, ?outcome, "Window handled");
                            }
                        }
                        None => {
                            warn!(relayer = ?self.address, "Block stream closed");
                            break;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(relayer = ?self.address, state = %self.stats.state(), "Relayer agent stopped");
        Ok(self.stats)
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<Result<Arc<AgentStats>>> {
        tokio::spawn(self.run(shutdown))
    }

    fn fatal(&self, window: WindowIndex, operation: &'static str, reason: impl fmt::Display) -> RelayError {
        RelayError::Fatal {
            relayer: self.address,
            window,
            operation,
            reason: reason.to_string(),
        }
    }
}
