//! Relayer and network reports
//!
//! Point-in-time views combining ledger reads with agent counters. They are
//! serializable and log themselves as structured events.

use std::time::{SystemTime, UNIX_EPOCH};

use relaynet_core::{blocks_until_next_window, window_index, Address, BlockNumber, RelayerStatus, WindowIndex, U256};
use relaynet_ledger::{Ledger, Result};
use relaynet_mempool::Mempool;
use serde::Serialize;
use tracing::info;

use crate::AgentStats;

#[derive(Debug, Clone, Serialize)]
pub struct RelayerReport {
    pub relayer: Address,
    pub status: RelayerStatus,
    pub original_stake: U256,
    pub current_stake: U256,
    /// Percentage of total stake
    pub stake_share: f64,
    pub claimed_rewards: U256,
    pub unclaimed_rewards: U256,
    pub total_rewards: U256,
    pub transactions_submitted: u64,
    /// Percentage of all submitted transactions
    pub transaction_share: f64,
    pub windows_selected: usize,
    pub windows_selected_idle: usize,
}

impl RelayerReport {
    pub async fn collect(ledger: &dyn Ledger, stats: &AgentStats) -> Result<Self> {
        let relayer = stats.address();
        let info = ledger.relayer_info(relayer).await?;
        let total_stake = ledger.total_stake().await?;
        let unclaimed = ledger.relayer_claimable_protocol_rewards(relayer).await?;
        let submitted = ledger.transactions_submitted_by_relayer(relayer).await?;
        let total_submitted = ledger.total_transactions_submitted().await?;
        let participation = stats.participation();
        let claimed = stats.claimed();

        Ok(Self {
            relayer,
            status: info.status,
            original_stake: stats.original_stake(),
            current_stake: info.stake,
            stake_share: percentage(info.stake, total_stake),
            claimed_rewards: claimed,
            unclaimed_rewards: unclaimed,
            total_rewards: claimed.saturating_add(unclaimed),
            transactions_submitted: submitted,
            transaction_share: percentage(U256::from(submitted), U256::from(total_submitted)),
            windows_selected: participation.selected_in().len(),
            windows_selected_idle: participation.selected_in_but_idle().len(),
        })
    }

    pub fn log(&self) {
        info!(
            relayer = ?self.relayer,
            status = %self.status,
            original_stake = %self.original_stake,
            current_stake = %self.current_stake,
            stake_share = %format!("{:.2}%", self.stake_share),
            claimed = %self.claimed_rewards,
            unclaimed = %self.unclaimed_rewards,
            total_rewards = %self.total_rewards,
            submitted = self.transactions_submitted,
            tx_share = %format!("{:.2}%", self.transaction_share),
            windows_selected = self.windows_selected,
            windows_idle = self.windows_selected_idle,
            "Relayer report"
        );
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkReport {
    pub block: BlockNumber,
    pub window: WindowIndex,
    pub blocks_until_next_window: u64,
    pub seconds_until_epoch_end: u64,
    pub mempool_size: usize,
    pub total_stake: U256,
    pub total_transactions_submitted: u64,
}

impl NetworkReport {
    pub async fn collect(ledger: &dyn Ledger, mempool: &Mempool) -> Result<Self> {
        let block = ledger.block_number().await?;
        let blocks_per_window = ledger.blocks_per_window().await?;
        let epoch_end = ledger.epoch_end_timestamp().await?;

        Ok(Self {
            block,
            window: window_index(block, blocks_per_window),
            blocks_until_next_window: blocks_until_next_window(block, blocks_per_window),
            seconds_until_epoch_end: epoch_end.saturating_sub(now_secs()),
            mempool_size: mempool.len(),
            total_stake: ledger.total_stake().await?,
            total_transactions_submitted: ledger.total_transactions_submitted().await?,
        })
    }

    pub fn log(&self) {
        info!(
            block = self.block,
            window = self.window,
            next_window_in = self.blocks_until_next_window,
            epoch_ends_in_secs = self.seconds_until_epoch_end,
            mempool = self.mempool_size,
            total_stake = %self.total_stake,
            submitted = self.total_transactions_submitted,
            "Network report"
        );
    }
}

/// `part / total` as a percentage with two decimals of precision
fn percentage(part: U256, total: U256) -> f64 {
    if total.is_zero() {
        return 0.0;
    }
    let basis_points = part.saturating_mul(U256::from(10_000u64)) / total;
    basis_points.low_u64() as f64 / 100.0
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
    use crate::{AgentConfig, RelayerAgent};
    use relaynet_allocation::{AllocationEngine, EngineConfig, PartitionKind};
    use relaynet_core::{ether, Transaction};
    use relaynet_ledger::{MockLedger, MockLedgerConfig};
    use relaynet_nonce::NonceManager;
    use relaynet_state_store::RelayerStateStore;
    use std::sync::Arc;

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(ether(1), ether(4)), 25.0);
        assert_eq!(percentage(U256::from(1u64), U256::from(3u64)), 33.33);
        assert_eq!(percentage(ether(1), U256::zero()), 0.0);
    }

    #[tokio::test]
    async fn test_reports_reflect_activity() {
        let genesis = Address::repeat_byte(0xf0);
        let ledger = Arc::new(MockLedger::new(MockLedgerConfig {
            relayers_per_window: 1,
            genesis_relayer: genesis,
            ..Default::default()
        }));
        let dyn_ledger: Arc<dyn Ledger> = ledger.clone();
        let mempool = Arc::new(Mempool::new());
        let mut agent = RelayerAgent::new(
            genesis,
            AgentConfig {
                claim_probability: 0.0,
                ..Default::default()
            },
            dyn_ledger.clone(),
            Arc::new(RelayerStateStore::new()),
            Arc::new(AllocationEngine::new(EngineConfig::new(1), PartitionKind::RoundRobin)),
            Arc::new(NonceManager::for_ledger(31337, dyn_ledger.clone())),
            mempool.clone(),
        );
        agent.initialize().await.unwrap();
        mempool.add_all([Transaction::call(vec![1]), Transaction::call(vec![2])]);
        agent.handle_block(ledger.mine_to(10)).await.unwrap();
        ledger.mine_to(13);

        let report = RelayerReport::collect(dyn_ledger.as_ref(), &agent.stats()).await.unwrap();
        assert_eq!(report.status, RelayerStatus::Active);
        assert_eq!(report.stake_share, 100.0);
        assert_eq!(report.transactions_submitted, 2);
        assert_eq!(report.transaction_share, 100.0);
        assert_eq!(report.windows_selected, 1);
        assert_eq!(report.windows_selected_idle, 0);
        assert_eq!(report.unclaimed_rewards, ether(13));
        assert_eq!(report.total_rewards, ether(13));

        let network = NetworkReport::collect(dyn_ledger.as_ref(), &mempool).await.unwrap();
        assert_eq!(network.block, 13);
        assert_eq!(network.window, 1);
        assert_eq!(network.blocks_until_next_window, 7);
        assert_eq!(network.mempool_size, 0);
        assert_eq!(network.total_transactions_submitted, 2);
    }
}
