//! Configuration types

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use relaynet_allocation::PartitionKind;
use relaynet_logging::LogLevel;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Ledger endpoints
    #[serde(default)]
    pub network: NetworkSettings,

    /// Window and selection parameters
    #[serde(default)]
    pub allocator: AllocatorSettings,

    /// Mock-ledger simulation parameters
    #[serde(default)]
    pub simulation: SimulationSettings,

    /// Cross-chain delivery feed
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Per-relayer agent behaviour
    #[serde(default)]
    pub relayer: RelayerSettings,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Where the relayer state store is persisted, if anywhere
    #[serde(default)]
    pub state_store_path: Option<PathBuf>,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.clone());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            let mut settings = Self::default();
            settings.config_path = Some(path.clone());
            Ok(settings)
        }
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Apply `RELAYNET_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    ///
    /// Recognised keys:
    ///
    /// | key | field |
    /// |-----|-------|
    /// | `RELAYNET_RPC_URL` | `network.rpc_url` |
    /// | `RELAYNET_WS_URL` | `network.ws_url` |
    /// | `RELAYNET_CHAIN_ID` | `network.chain_id` |
    /// | `RELAYNET_BLOCKS_PER_WINDOW` | `allocator.blocks_per_window` |
    /// | `RELAYNET_RELAYERS_PER_WINDOW` | `allocator.relayers_per_window` |
    /// | `RELAYNET_PARTITION_STRATEGY` | `allocator.partition_strategy` |
    /// | `RELAYNET_RELAYER_COUNT` | `simulation.relayer_count` |
    /// | `RELAYNET_CLAIM_PROBABILITY` | `simulation.claim_probability` |
    /// | `RELAYNET_GUARDIAN_URL` | `bridge.guardian_url` |
    /// | `RELAYNET_FAILURE_POLICY` | `relayer.failure_policy` |
    /// | `RELAYNET_LOG_LEVEL` | `log_level` |
    /// | `RELAYNET_STATE_STORE_PATH` | `state_store_path` |
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RELAYNET_RPC_URL") {
            self.network.rpc_url = v;
        }
        if let Some(v) = lookup("RELAYNET_WS_URL") {
            self.network.ws_url = v;
        }
        override_parsed(&lookup, "RELAYNET_CHAIN_ID", &mut self.network.chain_id)?;
        override_parsed(&lookup, "RELAYNET_BLOCKS_PER_WINDOW", &mut self.allocator.blocks_per_window)?;
        override_parsed(&lookup, "RELAYNET_RELAYERS_PER_WINDOW", &mut self.allocator.relayers_per_window)?;
        override_parsed(&lookup, "RELAYNET_PARTITION_STRATEGY", &mut self.allocator.partition_strategy)?;
        override_parsed(&lookup, "RELAYNET_RELAYER_COUNT", &mut self.simulation.relayer_count)?;
        override_parsed(&lookup, "RELAYNET_CLAIM_PROBABILITY", &mut self.simulation.claim_probability)?;
        if let Some(v) = lookup("RELAYNET_GUARDIAN_URL") {
            self.bridge.guardian_url = v;
        }
        override_parsed(&lookup, "RELAYNET_FAILURE_POLICY", &mut self.relayer.failure_policy)?;
        override_parsed(&lookup, "RELAYNET_LOG_LEVEL", &mut self.log_level)?;
        if let Some(v) = lookup("RELAYNET_STATE_STORE_PATH") {
            self.state_store_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Reject values no component can run with
    pub fn validate(&self) -> Result<()> {
        if self.allocator.blocks_per_window == 0 {
            return Err(SettingsError::Invalid("blocks_per_window must be positive".into()));
        }
        if self.allocator.relayers_per_window == 0 {
            return Err(SettingsError::Invalid("relayers_per_window must be positive".into()));
        }
        if self.allocator.max_selection_iterations == 0 {
            return Err(SettingsError::Invalid("max_selection_iterations must be positive".into()));
        }
        if self.simulation.relayer_count == 0 {
            return Err(SettingsError::Invalid("relayer_count must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.simulation.claim_probability) {
            return Err(SettingsError::Invalid(format!(
                "claim_probability {} outside [0, 1]",
                self.simulation.claim_probability
            )));
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(key) {
        *target = value.trim().parse().map_err(|_| SettingsError::InvalidOverride {
            key: key.to_string(),
            value: value.clone(),
        })?;
        debug!(key, value = %value, "Applied settings override");
    }
    Ok(())
}

/// Ledger endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8545".to_string()
}

fn default_chain_id() -> u64 {
    31337
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            ws_url: default_ws_url(),
            chain_id: default_chain_id(),
        }
    }
}

/// Window and selection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorSettings {
    #[serde(default = "default_blocks_per_window")]
    pub blocks_per_window: u64,

    #[serde(default = "default_relayers_per_window")]
    pub relayers_per_window: usize,

    #[serde(default)]
    pub partition_strategy: PartitionKind,

    /// Draw cap before selection gives up
    #[serde(default = "default_max_selection_iterations")]
    pub max_selection_iterations: u64,

    /// Windows of selections kept in memory per engine
    #[serde(default = "default_selection_cache_windows")]
    pub selection_cache_windows: usize,
}

fn default_blocks_per_window() -> u64 {
    10
}

fn default_relayers_per_window() -> usize {
    2
}

fn default_max_selection_iterations() -> u64 {
    10_000
}

fn default_selection_cache_windows() -> usize {
    64
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            blocks_per_window: default_blocks_per_window(),
            relayers_per_window: default_relayers_per_window(),
            partition_strategy: PartitionKind::default(),
            max_selection_iterations: default_max_selection_iterations(),
            selection_cache_windows: default_selection_cache_windows(),
        }
    }
}

/// Mock-ledger simulation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Relayers including the genesis relayer
    #[serde(default = "default_relayer_count")]
    pub relayer_count: usize,

    /// Minimum stake in whole ether; relayer `i` bonds `i` units
    #[serde(default = "default_stake_unit_ether")]
    pub stake_unit_ether: u64,

    /// Native balance each relayer is topped up to, in ether
    #[serde(default = "default_funding_amount_ether")]
    pub funding_amount_ether: u64,

    #[serde(default = "default_generation_interval_ms")]
    pub generation_interval_ms: u64,

    #[serde(default = "default_transactions_per_interval")]
    pub transactions_per_interval: usize,

    /// Per-block chance a relayer claims its rewards
    #[serde(default = "default_claim_probability")]
    pub claim_probability: f64,

    /// Relayer indices that register but never run
    #[serde(default)]
    pub inactive_relayers: Vec<usize>,

    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,

    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

fn default_relayer_count() -> usize {
    5
}

fn default_stake_unit_ether() -> u64 {
    1
}

fn default_funding_amount_ether() -> u64 {
    10
}

fn default_generation_interval_ms() -> u64 {
    1000
}

fn default_transactions_per_interval() -> usize {
    5
}

fn default_claim_probability() -> f64 {
    0.1
}

fn default_block_interval_ms() -> u64 {
    1000
}

fn default_report_interval_secs() -> u64 {
    10
}

impl SimulationSettings {
    pub fn generation_interval(&self) -> Duration {
        Duration::from_millis(self.generation_interval_ms)
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.block_interval_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn is_inactive(&self, index: usize) -> bool {
        self.inactive_relayers.contains(&index)
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            relayer_count: default_relayer_count(),
            stake_unit_ether: default_stake_unit_ether(),
            funding_amount_ether: default_funding_amount_ether(),
            generation_interval_ms: default_generation_interval_ms(),
            transactions_per_interval: default_transactions_per_interval(),
            claim_probability: default_claim_probability(),
            inactive_relayers: Vec::new(),
            block_interval_ms: default_block_interval_ms(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

/// Cross-chain delivery feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Feed the mempool from the guardian instead of the synthetic generator
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_guardian_url")]
    pub guardian_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_guardian_url() -> String {
    "https://api.testnet.wormholescan.io".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

impl BridgeSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            guardian_url: default_guardian_url(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Per-relayer agent behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerSettings {
    /// Endpoint advertised at registration
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Delegator premium passed at registration
    #[serde(default)]
    pub delegator_premium: u64,
}

fn default_endpoint() -> String {
    "http://localhost".to_string()
}

impl Default for RelayerSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            failure_policy: FailurePolicy::default(),
            delegator_premium: 0,
        }
    }
}

/// What a relayer does when a batch submission is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the relayer task with an error
    #[default]
    Exit,
    /// Log the rejection and wait for the next window
    SkipWindow,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exit" => Ok(Self::Exit),
            "skip_window" | "skip-window" | "skip" => Ok(Self::SkipWindow),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}
