//! In-memory allocator ledger
//!
//! Blocks are mined on demand ([`MockLedger::mine_block`]) or by a background
//! producer. The latest relayer state becomes active at each window boundary,
//! and protocol rewards accrue every block pro-rata to active stake.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use relaynet_allocation::{
    active_to_latest_map, AllocationEngine, AllocationResult, EngineConfig, PartitionKind, SelectionResult,
    DEFAULT_MAX_ITERATIONS,
};
use relaynet_core::abi::{encode_u256, keccak256};
use relaynet_core::{
    ether, is_window_boundary, window_index, Address, BlockNumber, ChainId, RelayerInfo, RelayerStateEvent,
    RelayerStateSnapshot, RelayerStatus, TxId, U256,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::subscription::{BlockSubscription, RelayerStateSubscription};
use crate::types::{ExecuteBatch, RegisterRequest, StateHashes, TxReceipt};
use crate::{Ledger, LedgerError, Result};

#[derive(Debug, Clone)]
pub struct MockLedgerConfig {
    pub chain_id: ChainId,
    pub blocks_per_window: u64,
    pub relayers_per_window: usize,
    pub minimum_stake: U256,
    pub partition: PartitionKind,
    pub max_selection_iterations: u64,
    /// Protocol reward minted per block, split by active stake
    pub reward_per_block: U256,
    pub epoch_length_secs: u64,
    pub exit_delay_secs: u64,
    /// Relayer registered at construction
    pub genesis_relayer: Address,
    pub genesis_stake: U256,
    /// Capacity of the block and state event channels
    pub channel_capacity: usize,
}

impl Default for MockLedgerConfig {
    fn default() -> Self {
        Self {
            chain_id: 31337,
            blocks_per_window: 10,
            relayers_per_window: 2,
            minimum_stake: ether(1),
            partition: PartitionKind::RoundRobin,
            max_selection_iterations: DEFAULT_MAX_ITERATIONS,
            reward_per_block: ether(1),
            epoch_length_secs: 3600,
            exit_delay_secs: 3600,
            genesis_relayer: Address::repeat_byte(0xf0),
            genesis_stake: ether(1),
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone)]
struct MockRelayer {
    info: RelayerInfo,
    claimable: U256,
    transactions_submitted: u64,
    delegator_premium: U256,
}

/// In-memory allocator state
#[derive(Debug)]
struct MockState {
    block: BlockNumber,
    balances: HashMap<Address, U256>,
    token_balances: HashMap<Address, U256>,
    allowances: HashMap<Address, U256>,
    relayers: HashMap<Address, MockRelayer>,
    active: RelayerStateSnapshot,
    latest: RelayerStateSnapshot,
    events: Vec<RelayerStateEvent>,
    used_nonces: HashMap<Address, BTreeSet<u64>>,
    executed: HashSet<TxId>,
    total_submitted: u64,
    tx_counter: u64,
}

impl MockState {
    fn receipt(&mut self) -> TxReceipt {
        self.tx_counter += 1;
        TxReceipt {
            hash: keccak256(encode_u256(U256::from(self.tx_counter))),
            block: self.block,
        }
    }

    /// Next latest snapshot; callers mutate nothing until this succeeds
    fn build_latest(stakes: &[(Address, U256)]) -> Result<RelayerStateSnapshot> {
        RelayerStateSnapshot::from_stakes(stakes).map_err(|e| LedgerError::reverted("state transition", e.to_string()))
    }

    /// Install a built snapshot as latest and record the transition
    fn commit_latest(&mut self, snapshot: RelayerStateSnapshot) -> RelayerStateEvent {
        let event = RelayerStateEvent {
            hash: snapshot.hash(),
            relayers: snapshot.relayers().to_vec(),
            cdf: snapshot.cdf().to_vec(),
            block: self.block,
        };
        self.latest = snapshot;
        self.events.push(event.clone());
        event
    }

    fn latest_stakes(&self) -> Vec<(Address, U256)> {
        self.latest
            .relayers()
            .iter()
            .enumerate()
            .filter_map(|(i, r)| self.latest.stake_at(i).map(|s| (*r, s)))
            .collect()
    }

    fn relayer_mut(&mut self, relayer: &Address) -> Result<&mut MockRelayer> {
        self.relayers
            .get_mut(relayer)
            .ok_or_else(|| LedgerError::NotRegistered(format!("{:?}", relayer)))
    }
}

pub struct MockLedger {
    config: MockLedgerConfig,
    engine: AllocationEngine,
    state: RwLock<MockState>,
    blocks: broadcast::Sender<BlockNumber>,
    relayer_states: broadcast::Sender<RelayerStateEvent>,
    epoch_start: u64,
    /// Failures returned by upcoming `execute` calls, in order
    execute_faults: Mutex<VecDeque<LedgerError>>,
}

impl MockLedger {
    pub fn new(config: MockLedgerConfig) -> Self {
        let engine = AllocationEngine::new(
            EngineConfig::new(config.relayers_per_window).with_max_iterations(config.max_selection_iterations),
            config.partition,
        );
        let genesis = RelayerStateSnapshot::genesis(config.genesis_relayer, config.genesis_stake);
        let genesis_event = RelayerStateEvent {
            hash: genesis.hash(),
            relayers: genesis.relayers().to_vec(),
            cdf: genesis.cdf().to_vec(),
            block: 0,
        };

        let mut relayers = HashMap::new();
        relayers.insert(
            config.genesis_relayer,
            MockRelayer {
                info: RelayerInfo {
                    stake: config.genesis_stake,
                    status: RelayerStatus::Active,
                    min_exit_timestamp: 0,
                    accounts: vec![config.genesis_relayer],
                    endpoint: "genesis".to_string(),
                },
                claimable: U256::zero(),
                transactions_submitted: 0,
                delegator_premium: U256::zero(),
            },
        );

        let state = MockState {
            block: 0,
            balances: HashMap::new(),
            token_balances: HashMap::new(),
            allowances: HashMap::new(),
            relayers,
            active: genesis.clone(),
            latest: genesis,
            events: vec![genesis_event],
            used_nonces: HashMap::new(),
            executed: HashSet::new(),
            total_submitted: 0,
            tx_counter: 0,
        };

        let capacity = config.channel_capacity.max(1);
        let (blocks, _) = broadcast::channel(capacity);
        let (relayer_states, _) = broadcast::channel(capacity);

        info!(
            chain_id = config.chain_id,
            blocks_per_window = config.blocks_per_window,
            relayers_per_window = config.relayers_per_window,
            "[MOCK] Ledger created"
        );

        Self {
            config,
            engine,
            state: RwLock::new(state),
            blocks,
            relayer_states,
            epoch_start: now_secs(),
            execute_faults: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &MockLedgerConfig {
        &self.config
    }

    /// Mine one block: promote the latest state at window boundaries, accrue
    /// rewards, then notify subscribers.
    pub fn mine_block(&self) -> BlockNumber {
        let block = {
            let mut state = self.state.write();
            state.block += 1;
            let block = state.block;

            if is_window_boundary(block, self.config.blocks_per_window) && state.active != state.latest {
                state.active = state.latest.clone();
                info!(
                    block,
                    relayers = state.active.len(),
                    "[MOCK] Latest relayer state activated"
                );
            }

            let total = state.active.total_stake();
            if !total.is_zero() && !self.config.reward_per_block.is_zero() {
                let shares: Vec<(Address, U256)> = state
                    .active
                    .relayers()
                    .iter()
                    .enumerate()
                    .filter_map(|(i, r)| state.active.stake_at(i).map(|s| (*r, s)))
                    .map(|(r, stake)| (r, self.config.reward_per_block.saturating_mul(stake) / total))
                    .collect();
                for (relayer, share) in shares {
                    if let Some(entry) = state.relayers.get_mut(&relayer) {
                        entry.claimable = entry.claimable.saturating_add(share);
                    }
                }
            }
            block
        };
        let _ = self.blocks.send(block);
        block
    }

    pub fn mine_blocks(&self, count: u64) -> BlockNumber {
        let mut block = 0;
        for _ in 0..count {
            block = self.mine_block();
        }
        block
    }

    /// Mine until the block height reaches `target`
    pub fn mine_to(&self, target: BlockNumber) -> BlockNumber {
        let mut block = self.state.read().block;
        while block < target {
            block = self.mine_block();
        }
        block
    }

    /// Mine a block every `interval` until shutdown
    pub fn spawn_block_producer(self: &Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let block = ledger.mine_block();
                        debug!(block, "[MOCK] Mined block");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("[MOCK] Block producer stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    // ==================== Admin ====================

    /// Credit native balance
    pub fn fund(&self, account: Address, amount: U256) {
        let mut state = self.state.write();
        let balance = state.balances.entry(account).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Jail a relayer and drop it from the latest state
    pub fn jail(&self, relayer: Address) -> Result<()> {
        let event = {
            let mut state = self.state.write();
            let stakes: Vec<_> = state.latest_stakes().into_iter().filter(|(r, _)| *r != relayer).collect();
            let snapshot = MockState::build_latest(&stakes)?;
            state.relayer_mut(&relayer)?.info.status = RelayerStatus::Jailed;
            state.commit_latest(snapshot)
        };
        warn!(relayer = ?relayer, "[MOCK] Relayer jailed");
        let _ = self.relayer_states.send(event);
        Ok(())
    }

    /// Restore a jailed relayer with its previous stake
    pub fn unjail(&self, relayer: Address) -> Result<()> {
        let event = {
            let mut state = self.state.write();
            let entry = state.relayer_mut(&relayer)?;
            if entry.info.status != RelayerStatus::Jailed {
                return Err(LedgerError::reverted("unjail", "relayer is not jailed"));
            }
            let stake = entry.info.stake;
            let mut stakes = state.latest_stakes();
            stakes.push((relayer, stake));
            let snapshot = MockState::build_latest(&stakes)?;
            state.relayer_mut(&relayer)?.info.status = RelayerStatus::Active;
            state.commit_latest(snapshot)
        };
        info!(relayer = ?relayer, "[MOCK] Relayer unjailed");
        let _ = self.relayer_states.send(event);
        Ok(())
    }

    /// Start a relayer's exit: it leaves the latest state and cannot
    /// withdraw before the exit delay elapses
    pub fn unregister(&self, relayer: Address) -> Result<()> {
        let exit_at = now_secs() + self.config.exit_delay_secs;
        let event = {
            let mut state = self.state.write();
            if state.relayer_mut(&relayer)?.info.status != RelayerStatus::Active {
                return Err(LedgerError::reverted("unregister", "relayer is not active"));
            }
            let stakes: Vec<_> = state.latest_stakes().into_iter().filter(|(r, _)| *r != relayer).collect();
            let snapshot = MockState::build_latest(&stakes)?;
            let entry = state.relayer_mut(&relayer)?;
            entry.info.status = RelayerStatus::Exiting;
            entry.info.min_exit_timestamp = exit_at;
            state.commit_latest(snapshot)
        };
        info!(relayer = ?relayer, exit_at, "[MOCK] Relayer exiting");
        let _ = self.relayer_states.send(event);
        Ok(())
    }

    /// Make the next `execute` call fail with `error` without touching state
    pub fn fail_next_execute(&self, error: LedgerError) {
        self.execute_faults.lock().push_back(error);
    }

    /// Delegator premium recorded at registration
    pub fn delegator_premium(&self, relayer: &Address) -> Option<U256> {
        self.state.read().relayers.get(relayer).map(|r| r.delegator_premium)
    }

    // ==================== Batch validation ====================

    fn validate_batch(&self, state: &MockState, sender: &Address, batch: &ExecuteBatch) -> Result<(Address, u64)> {
        let reject = |reason: String| LedgerError::SubmissionRejected(reason);

        if batch.active_state.hash() != state.active.hash() {
            return Err(reject("active state hash mismatch".to_string()));
        }
        if batch.latest_state.hash() != state.latest.hash() {
            return Err(reject("latest state hash mismatch".to_string()));
        }
        if batch.active_to_latest_map != active_to_latest_map(&state.active, &state.latest) {
            return Err(reject("invalid active to latest state map".to_string()));
        }

        let relayer = *state
            .active
            .relayers()
            .get(batch.relayer_index)
            .ok_or_else(|| reject(format!("relayer index {} out of range", batch.relayer_index)))?;
        let entry = state
            .relayers
            .get(&relayer)
            .ok_or_else(|| reject(format!("relayer {:?} not registered", relayer)))?;
        if relayer != *sender && !entry.info.accounts.contains(sender) {
            return Err(reject(format!("{:?} is not an account of relayer {:?}", sender, relayer)));
        }
        if entry.info.status != RelayerStatus::Active {
            return Err(reject(format!("relayer {:?} is {}", relayer, entry.info.status)));
        }

        let window = window_index(state.block, self.config.blocks_per_window);
        let selection = self.engine.select_relayers(window, &state.active)?;
        if !selection.is_selected(&relayer) {
            return Err(reject(format!("relayer {:?} not selected for window {}", relayer, window)));
        }
        let expected = AllocationResult {
            generation_iterations: selection.iterations_of(&relayer),
            ..Default::default()
        }
        .iteration_bitmap()?;
        if batch.generation_iteration_bitmap != expected {
            return Err(reject("generation iteration bitmap mismatch".to_string()));
        }

        if state
            .used_nonces
            .get(sender)
            .is_some_and(|used| used.contains(&batch.nonce))
        {
            return Err(reject(format!("nonce {} already used", batch.nonce)));
        }

        let mut batch_ids = HashSet::with_capacity(batch.transactions.len());
        for tx in &batch.transactions {
            let id = tx.id();
            if state.executed.contains(&id) || !batch_ids.insert(id) {
                return Err(reject(format!("transaction {:?} already executed", id)));
            }
        }

        if self.engine.strategy().is_position_independent() {
            for tx in &batch.transactions {
                if self.engine.owner_of(&selection, 0, tx) != Some(relayer) {
                    return Err(reject(format!("transaction {:?} not allocated to relayer", tx.id())));
                }
            }
        }

        let value = batch.total_value();
        let available = state.balances.get(sender).copied().unwrap_or_default();
        if available < value {
            return Err(LedgerError::InsufficientBalance {
                needed: value.to_string(),
                available: available.to_string(),
            });
        }

        Ok((relayer, window))
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn chain_id(&self) -> Result<ChainId> {
        Ok(self.config.chain_id)
    }

    async fn block_number(&self) -> Result<BlockNumber> {
        Ok(self.state.read().block)
    }

    async fn subscribe_blocks(&self) -> Result<BlockSubscription> {
        Ok(BlockSubscription::new("blocks", self.blocks.subscribe()))
    }

    async fn balance(&self, account: Address) -> Result<U256> {
        Ok(self.state.read().balances.get(&account).copied().unwrap_or_default())
    }

    async fn transaction_count(&self, account: Address) -> Result<u64> {
        Ok(self
            .state
            .read()
            .used_nonces
            .get(&account)
            .and_then(|used| used.iter().next_back())
            .map(|highest| highest + 1)
            .unwrap_or(0))
    }

    async fn relayer_info(&self, relayer: Address) -> Result<RelayerInfo> {
        Ok(self
            .state
            .read()
            .relayers
            .get(&relayer)
            .map(|r| r.info.clone())
            .unwrap_or_else(RelayerInfo::unregistered))
    }

    async fn blocks_per_window(&self) -> Result<u64> {
        Ok(self.config.blocks_per_window)
    }

    async fn relayers_per_window(&self) -> Result<usize> {
        Ok(self.config.relayers_per_window)
    }

    async fn minimum_stake_amount(&self) -> Result<U256> {
        Ok(self.config.minimum_stake)
    }

    async fn relayer_state_hash(&self) -> Result<StateHashes> {
        let state = self.state.read();
        Ok(StateHashes {
            active: state.active.hash(),
            latest: state.latest.hash(),
        })
    }

    async fn allocate_relayers(&self, active_state: &RelayerStateSnapshot) -> Result<SelectionResult> {
        let (window, active) = {
            let state = self.state.read();
            (window_index(state.block, self.config.blocks_per_window), state.active.clone())
        };
        if active_state.hash() != active.hash() {
            return Err(LedgerError::reverted("allocateRelayers", "active state hash mismatch"));
        }
        Ok(self.engine.select_relayers(window, &active)?.as_ref().clone())
    }

    async fn total_stake(&self) -> Result<U256> {
        Ok(self.state.read().latest.total_stake())
    }

    async fn transactions_submitted_by_relayer(&self, relayer: Address) -> Result<u64> {
        Ok(self
            .state
            .read()
            .relayers
            .get(&relayer)
            .map(|r| r.transactions_submitted)
            .unwrap_or(0))
    }

    async fn total_transactions_submitted(&self) -> Result<u64> {
        Ok(self.state.read().total_submitted)
    }

    async fn epoch_end_timestamp(&self) -> Result<u64> {
        let length = self.config.epoch_length_secs.max(1);
        let elapsed = now_secs().saturating_sub(self.epoch_start);
        Ok(self.epoch_start + (elapsed / length + 1) * length)
    }

    async fn relayer_claimable_protocol_rewards(&self, relayer: Address) -> Result<U256> {
        Ok(self
            .state
            .read()
            .relayers
            .get(&relayer)
            .map(|r| r.claimable)
            .unwrap_or_default())
    }

    async fn token_balance(&self, account: Address) -> Result<U256> {
        Ok(self
            .state
            .read()
            .token_balances
            .get(&account)
            .copied()
            .unwrap_or_default())
    }

    async fn transfer(&self, from: Address, to: Address, amount: U256) -> Result<TxReceipt> {
        let mut state = self.state.write();
        let available = state.balances.get(&from).copied().unwrap_or_default();
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                needed: amount.to_string(),
                available: available.to_string(),
            });
        }
        state.balances.insert(from, available - amount);
        let balance = state.balances.entry(to).or_default();
        *balance = balance.saturating_add(amount);
        debug!(from = ?from, to = ?to, %amount, "[MOCK] Transfer");
        Ok(state.receipt())
    }

    async fn mint(&self, to: Address, amount: U256) -> Result<TxReceipt> {
        let mut state = self.state.write();
        let balance = state.token_balances.entry(to).or_default();
        *balance = balance.saturating_add(amount);
        Ok(state.receipt())
    }

    async fn approve(&self, owner: Address, amount: U256) -> Result<TxReceipt> {
        let mut state = self.state.write();
        state.allowances.insert(owner, amount);
        Ok(state.receipt())
    }

    async fn register(&self, relayer: Address, request: RegisterRequest) -> Result<TxReceipt> {
        let (receipt, event) = {
            let mut state = self.state.write();
            if request.latest_state.hash() != state.latest.hash() {
                return Err(LedgerError::reverted("register", "latest state hash mismatch"));
            }
            if state.relayers.get(&relayer).is_some_and(|r| !r.info.stake.is_zero()) {
                return Err(LedgerError::reverted("register", "relayer already registered"));
            }
            if request.stake < self.config.minimum_stake {
                return Err(LedgerError::reverted("register", "stake below minimum"));
            }
            let allowance = state.allowances.get(&relayer).copied().unwrap_or_default();
            if allowance < request.stake {
                return Err(LedgerError::reverted("register", "insufficient allowance"));
            }
            let tokens = state.token_balances.get(&relayer).copied().unwrap_or_default();
            if tokens < request.stake {
                return Err(LedgerError::InsufficientBalance {
                    needed: request.stake.to_string(),
                    available: tokens.to_string(),
                });
            }
            let mut stakes = state.latest_stakes();
            stakes.push((relayer, request.stake));
            let snapshot = MockState::build_latest(&stakes)?;

            state.token_balances.insert(relayer, tokens - request.stake);
            state.allowances.insert(relayer, allowance - request.stake);
            state.relayers.insert(
                relayer,
                MockRelayer {
                    info: RelayerInfo {
                        stake: request.stake,
                        status: RelayerStatus::Active,
                        min_exit_timestamp: 0,
                        accounts: request.accounts,
                        endpoint: request.endpoint,
                    },
                    claimable: U256::zero(),
                    transactions_submitted: 0,
                    delegator_premium: request.delegator_premium,
                },
            );
            let event = state.commit_latest(snapshot);
            (state.receipt(), event)
        };
        info!(relayer = ?relayer, latest = ?event.hash, "[MOCK] Relayer registered");
        let _ = self.relayer_states.send(event);
        Ok(receipt)
    }

    async fn execute(&self, sender: Address, batch: ExecuteBatch) -> Result<TxReceipt> {
        if let Some(fault) = self.execute_faults.lock().pop_front() {
            debug!(sender = ?sender, nonce = batch.nonce, "[MOCK] Injected execute failure: {}", fault);
            return Err(fault);
        }
        let mut state = self.state.write();
        let (relayer, window) = self.validate_batch(&state, &sender, &batch)?;

        let value = batch.total_value();
        if let Some(balance) = state.balances.get_mut(&sender) {
            *balance = balance.saturating_sub(value);
        }
        state.used_nonces.entry(sender).or_default().insert(batch.nonce);
        for tx in &batch.transactions {
            state.executed.insert(tx.id());
        }
        let count = batch.transactions.len() as u64;
        state.total_submitted += count;
        if let Some(entry) = state.relayers.get_mut(&relayer) {
            entry.transactions_submitted += count;
        }
        debug!(relayer = ?relayer, window, count, nonce = batch.nonce, "[MOCK] Batch executed");
        Ok(state.receipt())
    }

    async fn claim_protocol_reward(&self, relayer: Address) -> Result<U256> {
        let mut state = self.state.write();
        let entry = state.relayer_mut(&relayer)?;
        if entry.info.status == RelayerStatus::Jailed {
            return Err(LedgerError::reverted("claimProtocolReward", "relayer is jailed"));
        }
        let amount = std::mem::take(&mut entry.claimable);
        let balance = state.token_balances.entry(relayer).or_default();
        *balance = balance.saturating_add(amount);
        Ok(amount)
    }

    async fn relayer_state_events(&self, from_block: BlockNumber) -> Result<Vec<RelayerStateEvent>> {
        Ok(self
            .state
            .read()
            .events
            .iter()
            .filter(|e| e.block >= from_block)
            .cloned()
            .collect())
    }

    async fn subscribe_relayer_states(&self) -> Result<RelayerStateSubscription> {
        Ok(RelayerStateSubscription::new("relayer_states", self.relayer_states.subscribe()))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaynet_core::Transaction;

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn ledger() -> MockLedger {
        MockLedger::new(MockLedgerConfig {
            genesis_relayer: addr(0xf0),
            ..Default::default()
        })
    }

    async fn register(ledger: &MockLedger, relayer: Address, stake: U256) {
        ledger.mint(relayer, stake).await.unwrap();
        ledger.approve(relayer, stake).await.unwrap();
        let latest = ledger.state.read().latest.clone();
        ledger
            .register(
                relayer,
                RegisterRequest {
                    latest_state: latest,
                    stake,
                    accounts: vec![relayer],
                    endpoint: "endpoint".to_string(),
                    delegator_premium: U256::zero(),
                },
            )
            .await
            .unwrap();
    }

    fn batch_for(ledger: &MockLedger, relayer: Address, txs: Vec<Transaction>, nonce: u64) -> ExecuteBatch {
        let state = ledger.state.read();
        let window = window_index(state.block, ledger.config.blocks_per_window);
        let allocation = ledger
            .engine
            .allocate_transactions(&relayer, &txs, &state.active, window)
            .unwrap();
        ExecuteBatch {
            transactions: allocation.transactions.clone(),
            relayer_index: allocation.relayer_cdf_index.unwrap(),
            generation_iteration_bitmap: allocation.iteration_bitmap().unwrap(),
            active_state: state.active.clone(),
            latest_state: state.latest.clone(),
            active_to_latest_map: active_to_latest_map(&state.active, &state.latest),
            nonce,
        }
    }

    #[tokio::test]
    async fn test_genesis_state() {
        let ledger = ledger();
        let hashes = ledger.relayer_state_hash().await.unwrap();
        assert_eq!(hashes.active, hashes.latest);
        let events = ledger.relayer_state_events(0).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].hash, hashes.active);
        let info = ledger.relayer_info(addr(0xf0)).await.unwrap();
        assert_eq!(info.status, RelayerStatus::Active);
    }

    #[tokio::test]
    async fn test_register_activates_at_window_boundary() {
        let ledger = ledger();
        register(&ledger, addr(1), ether(2)).await;

        let hashes = ledger.relayer_state_hash().await.unwrap();
        assert_ne!(hashes.active, hashes.latest);

        ledger.mine_to(9);
        assert_ne!(ledger.relayer_state_hash().await.unwrap().active, hashes.latest);
        ledger.mine_block();
        assert_eq!(ledger.relayer_state_hash().await.unwrap().active, hashes.latest);
        assert_eq!(ledger.total_stake().await.unwrap(), ether(3));
    }

    #[tokio::test]
    async fn test_register_rejections() {
        let ledger = ledger();
        let latest = ledger.state.read().latest.clone();
        let request = RegisterRequest {
            latest_state: latest.clone(),
            stake: ether(1),
            accounts: vec![addr(1)],
            endpoint: String::new(),
            delegator_premium: U256::zero(),
        };

        let err = ledger.register(addr(1), request.clone()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Reverted { reason, .. } if reason == "insufficient allowance"));

        ledger.approve(addr(1), ether(1)).await.unwrap();
        let err = ledger.register(addr(1), request.clone()).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        let low = RegisterRequest {
            stake: U256::one(),
            ..request.clone()
        };
        let err = ledger.register(addr(1), low).await.unwrap_err();
        assert!(matches!(err, LedgerError::Reverted { reason, .. } if reason == "stake below minimum"));

        let stale = RegisterRequest {
            latest_state: RelayerStateSnapshot::genesis(addr(9), ether(1)),
            ..request
        };
        let err = ledger.register(addr(1), stale).await.unwrap_err();
        assert!(matches!(err, LedgerError::Reverted { reason, .. } if reason == "latest state hash mismatch"));
    }

    #[tokio::test]
    async fn test_execute_accepts_valid_batch_once() {
        let ledger = ledger();
        register(&ledger, addr(1), ether(2)).await;
        ledger.mine_to(10);

        let txs: Vec<Transaction> = (0..6u8).map(|i| Transaction::call(vec![i])).collect();
        let window = window_index(10, 10);
        let active = ledger.state.read().active.clone();
        let selection = ledger.engine.select_relayers(window, &active).unwrap();
        let relayer = selection.selected_relayers[0];

        let batch = batch_for(&ledger, relayer, txs, 0);
        let submitted = batch.transactions.len() as u64;
        ledger.execute(relayer, batch.clone()).await.unwrap();
        assert_eq!(ledger.transactions_submitted_by_relayer(relayer).await.unwrap(), submitted);
        assert_eq!(ledger.transaction_count(relayer).await.unwrap(), 1);

        let replay = ExecuteBatch { nonce: 1, ..batch.clone() };
        let err = ledger.execute(relayer, replay).await.unwrap_err();
        assert!(matches!(err, LedgerError::SubmissionRejected(_)));

        let reused_nonce = ExecuteBatch {
            transactions: vec![Transaction::call(vec![0xff; 4])],
            ..batch
        };
        assert!(ledger.execute(relayer, reused_nonce).await.is_err());
    }

    #[tokio::test]
    async fn test_execute_rejects_unselected_and_stale() {
        let ledger = MockLedger::new(MockLedgerConfig {
            relayers_per_window: 1,
            ..Default::default()
        });
        register(&ledger, addr(1), ether(1)).await;
        register(&ledger, addr(2), ether(1)).await;
        ledger.mine_to(10);

        let window = 1;
        let active = ledger.state.read().active.clone();
        let selection = ledger.engine.select_relayers(window, &active).unwrap();
        let outsider = *active
            .relayers()
            .iter()
            .find(|r| !selection.is_selected(r))
            .unwrap();

        let mut batch = batch_for(&ledger, selection.selected_relayers[0], vec![Transaction::call(vec![1])], 0);
        batch.relayer_index = active.index_of(&outsider).unwrap();
        let err = ledger.execute(outsider, batch.clone()).await.unwrap_err();
        assert!(matches!(err, LedgerError::SubmissionRejected(_)));

        let mut stale = batch_for(&ledger, selection.selected_relayers[0], vec![Transaction::call(vec![2])], 0);
        stale.active_to_latest_map.push(0);
        let err = ledger
            .execute(selection.selected_relayers[0], stale)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::SubmissionRejected("invalid active to latest state map".to_string()));
    }

    #[tokio::test]
    async fn test_rewards_accrue_and_claim() {
        let ledger = ledger();
        ledger.mine_blocks(3);
        let claimable = ledger.relayer_claimable_protocol_rewards(addr(0xf0)).await.unwrap();
        assert_eq!(claimable, ether(3));

        let claimed = ledger.claim_protocol_reward(addr(0xf0)).await.unwrap();
        assert_eq!(claimed, ether(3));
        assert_eq!(ledger.token_balance(addr(0xf0)).await.unwrap(), ether(3));
        assert!(ledger.relayer_claimable_protocol_rewards(addr(0xf0)).await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn test_jailed_relayer_cannot_claim() {
        let ledger = ledger();
        ledger.mine_block();
        ledger.jail(addr(0xf0)).unwrap();
        assert!(ledger.claim_protocol_reward(addr(0xf0)).await.is_err());
        assert_eq!(ledger.relayer_info(addr(0xf0)).await.unwrap().status, RelayerStatus::Jailed);
        ledger.unjail(addr(0xf0)).unwrap();
        assert!(ledger.claim_protocol_reward(addr(0xf0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_registration_leaves_state_untouched() {
        let ledger = ledger();
        let before = ledger.relayer_state_hash().await.unwrap();
        ledger.mint(addr(1), U256::MAX).await.unwrap();
        ledger.approve(addr(1), U256::MAX).await.unwrap();
        let request = RegisterRequest {
            latest_state: ledger.state.read().latest.clone(),
            stake: U256::MAX,
            accounts: vec![addr(1)],
            endpoint: String::new(),
            delegator_premium: U256::zero(),
        };

        let err = ledger.register(addr(1), request).await.unwrap_err();
        assert!(matches!(err, LedgerError::Reverted { operation, .. } if operation == "state transition"));
        assert!(matches!(ledger.relayer_info(addr(1)).await, Err(LedgerError::NotRegistered(_))));
        assert_eq!(ledger.token_balance(addr(1)).await.unwrap(), U256::MAX);
        assert_eq!(ledger.state.read().allowances.get(&addr(1)), Some(&U256::MAX));
        assert_eq!(ledger.relayer_state_hash().await.unwrap(), before);
        assert_eq!(ledger.relayer_state_events(0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_unjail_keeps_relayer_jailed() {
        let ledger = ledger();
        register(&ledger, addr(1), U256::MAX - ether(1)).await;
        ledger.jail(addr(0xf0)).unwrap();
        register(&ledger, addr(2), ether(1)).await;
        let latest = ledger.relayer_state_hash().await.unwrap().latest;

        assert!(ledger.unjail(addr(0xf0)).is_err());
        assert_eq!(ledger.relayer_info(addr(0xf0)).await.unwrap().status, RelayerStatus::Jailed);
        assert_eq!(ledger.relayer_state_hash().await.unwrap().latest, latest);
    }

    #[tokio::test]
    async fn test_injected_execute_failure_consumes_nothing() {
        let ledger = ledger();
        ledger.mine_to(10);
        let batch = batch_for(&ledger, addr(0xf0), vec![Transaction::call(vec![1])], 0);
        ledger.fail_next_execute(LedgerError::Transport("connection refused".to_string()));

        let err = ledger.execute(addr(0xf0), batch.clone()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(ledger.transaction_count(addr(0xf0)).await.unwrap(), 0);
        ledger.execute(addr(0xf0), batch).await.unwrap();
        assert_eq!(ledger.transaction_count(addr(0xf0)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unregister_marks_exiting() {
        let ledger = ledger();
        register(&ledger, addr(1), ether(1)).await;
        ledger.unregister(addr(1)).unwrap();
        let info = ledger.relayer_info(addr(1)).await.unwrap();
        assert_eq!(info.status, RelayerStatus::Exiting);
        assert!(info.min_exit_timestamp > 0);
        assert!(!ledger.state.read().latest.contains(&addr(1)));
    }

    #[tokio::test]
    async fn test_state_events_streamed() {
        let ledger = ledger();
        let mut states = ledger.subscribe_relayer_states().await.unwrap();
        register(&ledger, addr(1), ether(1)).await;
        let event = states.next().await.unwrap();
        assert_eq!(event.hash, ledger.relayer_state_hash().await.unwrap().latest);
        assert_eq!(ledger.relayer_state_events(0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transfer() {
        let ledger = ledger();
        ledger.fund(addr(1), ether(5));
        ledger.transfer(addr(1), addr(2), ether(2)).await.unwrap();
        assert_eq!(ledger.balance(addr(1)).await.unwrap(), ether(3));
        assert_eq!(ledger.balance(addr(2)).await.unwrap(), ether(2));
        assert!(ledger.transfer(addr(2), addr(1), ether(3)).await.is_err());
    }

    #[tokio::test]
    async fn test_block_producer_stops_on_shutdown() {
        let ledger = Arc::new(ledger());
        let mut blocks = ledger.subscribe_blocks().await.unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = ledger.spawn_block_producer(Duration::from_millis(5), shutdown_rx);
        assert_eq!(blocks.next().await, Some(1));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
