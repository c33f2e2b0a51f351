//! RelayNet Allocation Engine
//!
//! Reproduces the allocator contract's relayer selection and transaction
//! partitioning bit-for-bit:
//!
//! - Stake-weighted relayer selection per window (CDF rejection sampling)
//! - Eligibility proofs that account for duplicate draws
//! - Pluggable partitioning of pending transactions among selected relayers
//! - Active-to-latest state remapping for batch submission
//!
//! ## Usage
//!
//! ```ignore
//! let engine = AllocationEngine::new(EngineConfig::new(relayers_per_window), PartitionKind::RoundRobin);
//! let allocation = engine.allocate_transactions(&me, &pending, &snapshot, window)?;
//! if !allocation.transactions.is_empty() {
//!     let bitmap = allocation.iteration_bitmap()?;
//!     // submit batch
//! }
//! ```

mod cache;
mod engine;
mod error;
mod partition;
mod proof;
mod remap;
mod selection;

pub use cache::WindowCache;
pub use engine::{AllocationEngine, AllocationResult, EngineConfig, DEFAULT_MAX_ITERATIONS};
pub use error::{AllocationError, Result};
pub use partition::{CalldataHash, PartitionKind, PartitionStrategy, RoundRobin};
pub use proof::{generate_proof, verify_proof, DuplicateProof, SelectionProof};
pub use remap::active_to_latest_map;
pub use selection::{base_seed, draw, eligible_count, select_relayers, Draw, SelectionResult};
