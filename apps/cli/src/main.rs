//! RelayNet CLI
//!
//! Runs relayer network simulations against the in-memory ledger and
//! inspects persisted relayer state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use relaynet_allocation::{AllocationEngine, EngineConfig, PartitionKind};
use relaynet_core::{ether, Address};
use relaynet_ledger::{Ledger, MockLedger, MockLedgerConfig};
use relaynet_logging::LogLevel;
use relaynet_mempool::{BridgeFeeder, GuardianClient, Mempool, PendingDelivery, SyntheticGenerator};
use relaynet_nonce::NonceManager;
use relaynet_relay::{AgentConfig, AgentStats, FailurePolicy, NetworkReport, RelayError, RelayerAgent, RelayerReport};
use relaynet_settings::{default_settings_path, Settings};
use relaynet_state_store::{RelayerStateStore, StateTracker};

/// RelayNet - Decentralized transaction relayer network
#[derive(Parser)]
#[command(name = "relaynet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file
    #[arg(short, long, env = "RELAYNET_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a relayer network on an in-memory ledger
    Simulate(SimulateArgs),

    /// Inspect persisted relayer states
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Show or initialize the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
struct SimulateArgs {
    /// Relayers including the genesis relayer
    #[arg(short = 'n', long)]
    relayers: Option<usize>,

    #[arg(long)]
    relayers_per_window: Option<usize>,

    #[arg(long)]
    blocks_per_window: Option<u64>,

    /// Partition strategy (round_robin, calldata_hash)
    #[arg(long)]
    partition: Option<PartitionKind>,

    /// Reaction to rejected batches (exit, skip_window)
    #[arg(long)]
    failure_policy: Option<FailurePolicy>,

    #[arg(long)]
    block_interval_ms: Option<u64>,

    /// Relayer indices that register but never run
    #[arg(long, value_delimiter = ',')]
    inactive: Vec<usize>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Bridge deliveries to feed (chain/emitter/sequence); enables bridge mode
    #[arg(long = "delivery")]
    deliveries: Vec<PendingDelivery>,
}

#[derive(Subcommand)]
enum StateAction {
    /// Print every state in a persisted store
    Show {
        /// State store file (defaults to the configured path)
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Write the effective settings to the settings file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_settings_path);
    let mut settings = Settings::load_from(&config_path)
        .with_context(|| format!("Failed to load settings from {:?}", config_path))?;
    settings
        .apply_env_overrides()
        .context("Invalid RELAYNET_* environment override")?;

    let level = if cli.verbose { LogLevel::Debug } else { settings.log_level };
    relaynet_logging::init(level);

    match cli.command {
        Commands::Simulate(args) => {
            apply_simulate_args(&mut settings, &args);
            settings.validate().context("Invalid settings")?;
            simulate(settings, args).await?;
        }
        Commands::State { action } => match action {
            StateAction::Show { path } => {
                let path = path
                    .or_else(|| settings.state_store_path.clone())
                    .context("No state store path given or configured")?;
                show_states(&path)?;
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            ConfigAction::Init => {
                settings.save_to(&config_path)?;
                println!("Settings written to {}", config_path.display());
            }
        },
    }

    Ok(())
}

fn apply_simulate_args(settings: &mut Settings, args: &SimulateArgs) {
    if let Some(n) = args.relayers {
        settings.simulation.relayer_count = n;
    }
    if let Some(rpw) = args.relayers_per_window {
        settings.allocator.relayers_per_window = rpw;
    }
    if let Some(bpw) = args.blocks_per_window {
        settings.allocator.blocks_per_window = bpw;
    }
    if let Some(partition) = args.partition {
        settings.allocator.partition_strategy = partition;
    }
    if let Some(policy) = args.failure_policy {
        settings.relayer.failure_policy = policy;
    }
    if let Some(ms) = args.block_interval_ms {
        settings.simulation.block_interval_ms = ms;
    }
    if !args.inactive.is_empty() {
        settings.simulation.inactive_relayers = args.inactive.clone();
    }
    if !args.deliveries.is_empty() {
        settings.bridge.enabled = true;
    }
}

// ============================================================================
// Simulation
// ============================================================================

/// Deterministic simulation address of relayer `index`
fn relayer_address(index: usize) -> Address {
    Address::from_low_u64_be(0x1000 + index as u64)
}

fn funder_address() -> Address {
    Address::from_low_u64_be(0xf00d)
}

async fn simulate(settings: Settings, args: SimulateArgs) -> Result<()> {
    let run_id = Uuid::new_v4();
    let sim = &settings.simulation;
    info!(
        %run_id,
        relayers = sim.relayer_count,
        blocks_per_window = settings.allocator.blocks_per_window,
        relayers_per_window = settings.allocator.relayers_per_window,
        partition = ?settings.allocator.partition_strategy,
        "Starting simulation"
    );

    let stake_unit = ether(sim.stake_unit_ether);
    let ledger = Arc::new(MockLedger::new(MockLedgerConfig {
        chain_id: settings.network.chain_id,
        blocks_per_window: settings.allocator.blocks_per_window,
        relayers_per_window: settings.allocator.relayers_per_window,
        minimum_stake: stake_unit,
        partition: settings.allocator.partition_strategy,
        max_selection_iterations: settings.allocator.max_selection_iterations,
        genesis_relayer: relayer_address(0),
        genesis_stake: stake_unit,
        ..Default::default()
    }));
    let dyn_ledger: Arc<dyn Ledger> = ledger.clone();
    let funding = ether(sim.funding_amount_ether);
    ledger.fund(funder_address(), funding.saturating_mul((sim.relayer_count as u64 + 1).into()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store = Arc::new(match &settings.state_store_path {
        Some(path) => RelayerStateStore::load_or_new(path)
            .with_context(|| format!("Failed to open state store {:?}", path))?,
        None => RelayerStateStore::new(),
    });
    let mut tracker = StateTracker::new(dyn_ledger.clone(), store.clone());
    if let Some(path) = &settings.state_store_path {
        tracker = tracker.with_persistence(path.clone());
    }
    tracker.sync().await.context("Failed to replay relayer state history")?;
    let tracker_handle = tracker.spawn(shutdown_rx.clone());

    let engine = Arc::new(AllocationEngine::new(
        EngineConfig::new(settings.allocator.relayers_per_window)
            .with_max_iterations(settings.allocator.max_selection_iterations)
            .with_cache_windows(settings.allocator.selection_cache_windows),
        settings.allocator.partition_strategy,
    ));
    let chain_id = dyn_ledger.chain_id().await?;
    let nonces = Arc::new(NonceManager::for_ledger(chain_id, dyn_ledger.clone()));
    let mempool = Arc::new(Mempool::new());

    let mut feeders: Vec<JoinHandle<bool>> = Vec::new();
    if settings.bridge.enabled {
        let guardian = GuardianClient::new(settings.bridge.guardian_url.clone())?;
        let feeder = BridgeFeeder::new(Arc::new(guardian), mempool.clone(), settings.bridge.poll_interval());
        for delivery in args.deliveries {
            info!(%delivery, "Polling for bridge delivery");
            feeders.push(feeder.spawn(delivery, shutdown_rx.clone()));
        }
    } else {
        SyntheticGenerator::new(mempool.clone(), sim.generation_interval(), sim.transactions_per_interval)
            .spawn(shutdown_rx.clone());
    }

    // Registrations run one at a time: each binds to the latest state
    let mut stats: Vec<Arc<AgentStats>> = Vec::new();
    let mut agents: Vec<(Address, JoinHandle<relaynet_relay::Result<Arc<AgentStats>>>)> = Vec::new();
    for index in 0..sim.relayer_count {
        let address = relayer_address(index);
        let config = AgentConfig {
            stake: stake_unit.saturating_mul(index.max(1).into()),
            funding_amount: funding,
            endpoint: format!("{}/{}", settings.relayer.endpoint, index),
            delegator_premium: settings.relayer.delegator_premium.into(),
            claim_probability: sim.claim_probability,
            failure_policy: settings.relayer.failure_policy,
            rng_seed: None,
        };
        let mut agent = RelayerAgent::new(
            address,
            config,
            dyn_ledger.clone(),
            store.clone(),
            engine.clone(),
            nonces.clone(),
            mempool.clone(),
        )
        .with_funder(funder_address());
        agent
            .initialize()
            .await
            .with_context(|| format!("Failed to initialize relayer {}", index))?;
        stats.push(agent.stats());

        if sim.is_inactive(index) {
            info!(relayer = ?address, index, "Relayer registered but left inactive");
            continue;
        }
        agents.push((address, agent.spawn(shutdown_rx.clone())));
    }

    let producer = ledger.spawn_block_producer(sim.block_interval(), shutdown_rx.clone());
    info!(%run_id, running = agents.len(), "Simulation running. Press Ctrl+C to stop.");

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let mut reports = tokio::time::interval(sim.report_interval());
    reports.tick().await;

    loop {
        tokio::select! {
            _ = reports.tick() => {
                log_reports(dyn_ledger.as_ref(), &mempool, &stats).await;
                if agents.iter().all(|(_, handle)| handle.is_finished()) {
                    warn!("All relayer agents stopped");
                    break;
                }
            }
            _ = &mut deadline => {
                info!("Simulation duration reached");
                break;
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Received shutdown signal");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = producer.await;
    for (address, handle) in agents {
        match handle.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log_agent_failure(address, &e),
            Err(e) => error!(relayer = ?address, "Relayer task panicked: {}", e),
        }
    }
    for feeder in feeders {
        let _ = feeder.await;
    }
    match tracker_handle.await {
        Ok(Err(e)) => error!("State tracker failed: {}", e),
        Err(e) => error!("State tracker panicked: {}", e),
        Ok(Ok(())) => {}
    }

    log_reports(dyn_ledger.as_ref(), &mempool, &stats).await;
    if let Some(path) = &settings.state_store_path {
        store.save_to(path)?;
        info!(states = store.len(), "State store saved to {:?}", path);
    }
    info!(%run_id, "Simulation finished");
    Ok(())
}

async fn log_reports(ledger: &dyn Ledger, mempool: &Mempool, stats: &[Arc<AgentStats>]) {
    match NetworkReport::collect(ledger, mempool).await {
        Ok(report) => report.log(),
        Err(e) => warn!("Network report unavailable: {}", e),
    }
    for agent in stats {
        match RelayerReport::collect(ledger, agent).await {
            Ok(report) => report.log(),
            Err(e) => warn!(relayer = ?agent.address(), "Relayer report unavailable: {}", e),
        }
    }
}

fn log_agent_failure(address: Address, err: &RelayError) {
    match err.context() {
        Some((relayer, window, operation)) => {
            error!(relayer = ?relayer, window, operation, "Relayer stopped: {}", err);
        }
        None => error!(relayer = ?address, "Relayer stopped: {}", err),
    }
}

// ============================================================================
// State inspection
// ============================================================================

fn show_states(path: &Path) -> Result<()> {
    let store = RelayerStateStore::load_from(path)
        .with_context(|| format!("Failed to load state store {:?}", path))?;

    println!("Relayer States ({})", store.len());
    println!("==================");
    let mut hashes = store.hashes();
    hashes.sort();
    for hash in hashes {
        let snapshot = store.get(&hash)?;
        println!();
        println!("{:?}", hash);
        println!("  relayers:    {}", snapshot.len());
        println!("  total stake: {}", snapshot.total_stake());
        for (index, relayer) in snapshot.relayers().iter().enumerate() {
            let stake = snapshot.stake_at(index).unwrap_or_default();
            println!("  [{}] {:?} stake {}", index, relayer, stake);
        }
    }
    Ok(())
}
