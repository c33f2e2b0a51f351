//! RelayNet Ledger
//!
//! The ledger oracle the relayer network runs against: chain reads, block
//! notifications, bond token operations and the allocator contract calls.
//!
//! ## Modes
//!
//! - [`MockLedger`]: complete in-memory allocator, used for simulations and
//!   tests. It re-validates every submitted batch the way the contract does.
//! - Live chains plug in by implementing [`Ledger`] over an RPC provider.

mod error;
mod mock;
mod subscription;
mod types;

pub use error::{LedgerError, Result};
pub use mock::{MockLedger, MockLedgerConfig};
pub use subscription::{BlockSubscription, RelayerStateSubscription, Subscription};
pub use types::*;

use async_trait::async_trait;
use relaynet_allocation::SelectionResult;
use relaynet_core::{
    Address, BlockNumber, ChainId, RelayerInfo, RelayerStateEvent, RelayerStateSnapshot, U256,
};

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn chain_id(&self) -> Result<ChainId>;

    async fn block_number(&self) -> Result<BlockNumber>;

    /// New block heights, in order
    async fn subscribe_blocks(&self) -> Result<BlockSubscription>;

    /// Native balance
    async fn balance(&self, account: Address) -> Result<U256>;

    /// Number of nonces the account has consumed
    async fn transaction_count(&self, account: Address) -> Result<u64>;

    async fn relayer_info(&self, relayer: Address) -> Result<RelayerInfo>;

    async fn blocks_per_window(&self) -> Result<u64>;

    async fn relayers_per_window(&self) -> Result<usize>;

    async fn minimum_stake_amount(&self) -> Result<U256>;

    async fn relayer_state_hash(&self) -> Result<StateHashes>;

    /// Contract view of the current window's selection over `active_state`
    async fn allocate_relayers(&self, active_state: &RelayerStateSnapshot) -> Result<SelectionResult>;

    async fn total_stake(&self) -> Result<U256>;

    async fn transactions_submitted_by_relayer(&self, relayer: Address) -> Result<u64>;

    async fn total_transactions_submitted(&self) -> Result<u64>;

    /// Unix timestamp at which the current reward epoch ends
    async fn epoch_end_timestamp(&self) -> Result<u64>;

    async fn relayer_claimable_protocol_rewards(&self, relayer: Address) -> Result<U256>;

    /// Bond token balance
    async fn token_balance(&self, account: Address) -> Result<U256>;

    /// Native value transfer
    async fn transfer(&self, from: Address, to: Address, amount: U256) -> Result<TxReceipt>;

    /// Mint bond tokens
    async fn mint(&self, to: Address, amount: U256) -> Result<TxReceipt>;

    /// Allow the allocator to pull `amount` bond tokens from `owner`
    async fn approve(&self, owner: Address, amount: U256) -> Result<TxReceipt>;

    async fn register(&self, relayer: Address, request: RegisterRequest) -> Result<TxReceipt>;

    /// Submit a batch; rejected batches return [`LedgerError::SubmissionRejected`]
    async fn execute(&self, sender: Address, batch: ExecuteBatch) -> Result<TxReceipt>;

    /// Claim accrued protocol rewards, returning the amount paid out
    async fn claim_protocol_reward(&self, relayer: Address) -> Result<U256>;

    /// Historical `NewRelayerState` events from `from_block` on
    async fn relayer_state_events(&self, from_block: BlockNumber) -> Result<Vec<RelayerStateEvent>>;

    /// Live `NewRelayerState` events
    async fn subscribe_relayer_states(&self) -> Result<RelayerStateSubscription>;
}
