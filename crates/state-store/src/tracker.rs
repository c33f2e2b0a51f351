//! Ledger event ingestion
//!
//! Replays historical `NewRelayerState` events into the store, then follows
//! the live stream until shutdown. The live subscription is opened before the
//! replay so no event emitted in between is lost; replaying an event twice is
//! harmless since `put` is idempotent.

use std::path::PathBuf;
use std::sync::Arc;

use relaynet_core::RelayerStateEvent;
use relaynet_ledger::Ledger;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{RelayerStateStore, Result};

pub struct StateTracker {
    ledger: Arc<dyn Ledger>,
    store: Arc<RelayerStateStore>,
    persist_path: Option<PathBuf>,
}

impl StateTracker {
    pub fn new(ledger: Arc<dyn Ledger>, store: Arc<RelayerStateStore>) -> Self {
        Self {
            ledger,
            store,
            persist_path: None,
        }
    }

    /// Flush the store to `path` after every ingested event
    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        self.persist_path = Some(path);
        self
    }

    pub fn store(&self) -> &Arc<RelayerStateStore> {
        &self.store
    }

    /// Ingest every historical event, returning how many were applied
    pub async fn sync(&self) -> Result<usize> {
        let applied = replay_history(self.ledger.as_ref(), &self.store).await?;
        if let Some(path) = &self.persist_path {
            self.store.save_to(path)?;
        }
        info!(events = applied, states = self.store.len(), "Relayer state history replayed");
        Ok(applied)
    }

    /// Replay history, then follow live events until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut live = self.ledger.subscribe_relayer_states().await?;
        self.sync().await?;

        loop {
            tokio::select! {
                event = live.next() => {
                    match event {
                        Some(event) => self.ingest(&event)?,
                        None => {
                            warn!("Relayer state stream closed");
                            break;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("State tracker shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(shutdown))
    }

    fn ingest(&self, event: &RelayerStateEvent) -> Result<()> {
        self.store.apply_event(event)?;
        if let Some(path) = &self.persist_path {
            self.store.save_to(path)?;
        }
        Ok(())
    }
}

/// Apply the ledger's full `NewRelayerState` history to `store`
pub async fn replay_history(ledger: &dyn Ledger, store: &RelayerStateStore) -> Result<usize> {
    let events = ledger.relayer_state_events(0).await?;
    for event in &events {
        store.apply_event(event)?;
    }
    Ok(events.len())
}
