//! Content-addressed relayer state store

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use relaynet_core::{parse_hash, Address, Hash, RelayerStateEvent, RelayerStateSnapshot, U256};
use tracing::{debug, info};

use crate::{Result, StateStoreError};

/// Append-only map from state hash to snapshot.
///
/// Lookups of unknown hashes fail with [`StateStoreError::StateNotFound`];
/// there is no fallback to another state.
#[derive(Debug, Default)]
pub struct RelayerStateStore {
    states: RwLock<HashMap<Hash, Arc<RelayerStateSnapshot>>>,
}

impl RelayerStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a single-relayer genesis snapshot
    pub fn with_genesis(relayer: Address, stake: U256) -> Self {
        let store = Self::new();
        store.insert(RelayerStateSnapshot::genesis(relayer, stake));
        store
    }

    /// Upsert under a ledger-provided key. Idempotent.
    pub fn put(&self, hash: Hash, snapshot: RelayerStateSnapshot) {
        self.states.write().insert(hash, Arc::new(snapshot));
    }

    /// Insert under the snapshot's own content hash
    pub fn insert(&self, snapshot: RelayerStateSnapshot) -> Hash {
        let hash = snapshot.hash();
        self.put(hash, snapshot);
        hash
    }

    /// Insert under `hash`, rejecting a snapshot whose content hash differs
    pub fn insert_checked(&self, hash: Hash, snapshot: RelayerStateSnapshot) -> Result<()> {
        let actual = snapshot.hash();
        if actual != hash {
            return Err(StateStoreError::HashMismatch { expected: hash, actual });
        }
        self.put(hash, snapshot);
        Ok(())
    }

    pub fn get(&self, hash: &Hash) -> Result<Arc<RelayerStateSnapshot>> {
        self.states
            .read()
            .get(hash)
            .cloned()
            .ok_or(StateStoreError::StateNotFound(*hash))
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.states.read().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    pub fn hashes(&self) -> Vec<Hash> {
        self.states.read().keys().copied().collect()
    }

    /// Ingest a `NewRelayerState` event
    pub fn apply_event(&self, event: &RelayerStateEvent) -> Result<Hash> {
        let snapshot = RelayerStateSnapshot::new(event.relayers.clone(), event.cdf.clone())?;
        self.put(event.hash, snapshot);
        debug!(hash = ?event.hash, block = event.block, relayers = event.relayers.len(), "Ingested relayer state");
        Ok(event.hash)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Load a store from `{ "0xhash": { "relayers": [...], "cdf": [...] } }`
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: BTreeMap<String, RelayerStateSnapshot> = serde_json::from_str(&contents)?;
        let mut states = HashMap::with_capacity(file.len());
        for (key, snapshot) in file {
            let hash = parse_hash(&key).map_err(|_| StateStoreError::InvalidKey(key.clone()))?;
            states.insert(hash, Arc::new(snapshot));
        }
        info!("Loaded {} relayer states from {}", states.len(), path.display());
        Ok(Self {
            states: RwLock::new(states),
        })
    }

    /// Load `path` if it exists, otherwise start empty
    pub fn load_or_new(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Write the store as JSON (tmp file + rename)
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let file: BTreeMap<String, RelayerStateSnapshot> = self
            .states
            .read()
            .iter()
            .map(|(hash, snapshot)| (format!("{:?}", hash), snapshot.as_ref().clone()))
            .collect();
        let json = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        debug!("Saved {} relayer states to {}", file.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaynet_core::ether;

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn two_relayers() -> RelayerStateSnapshot {
        RelayerStateSnapshot::from_stakes(&[(addr(1), ether(1)), (addr(2), ether(2))]).unwrap()
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("relaynet-state-store-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_genesis_seed() {
        let store = RelayerStateStore::with_genesis(addr(9), ether(1));
        assert_eq!(store.len(), 1);
        let hash = RelayerStateSnapshot::genesis(addr(9), ether(1)).hash();
        assert_eq!(store.get(&hash).unwrap().relayers(), &[addr(9)]);
    }

    #[test]
    fn test_missing_state_fails() {
        let store = RelayerStateStore::new();
        let err = store.get(&Hash::repeat_byte(1)).unwrap_err();
        assert!(matches!(err, StateStoreError::StateNotFound(h) if h == Hash::repeat_byte(1)));
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = RelayerStateStore::new();
        let snapshot = two_relayers();
        let hash = snapshot.hash();
        store.put(hash, snapshot.clone());
        store.put(hash, snapshot.clone());
        assert_eq!(store.len(), 1);
        assert_eq!(*store.get(&hash).unwrap(), snapshot);
    }

    #[test]
    fn test_insert_checked_rejects_wrong_hash() {
        let store = RelayerStateStore::new();
        let err = store.insert_checked(Hash::zero(), two_relayers()).unwrap_err();
        assert!(matches!(err, StateStoreError::HashMismatch { .. }));
        assert!(store.is_empty());

        let snapshot = two_relayers();
        store.insert_checked(snapshot.hash(), snapshot).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_apply_event_validates_snapshot() {
        let store = RelayerStateStore::new();
        let bad = RelayerStateEvent {
            hash: Hash::repeat_byte(3),
            relayers: vec![addr(1)],
            cdf: vec![],
            block: 4,
        };
        assert!(matches!(store.apply_event(&bad), Err(StateStoreError::InvalidSnapshot(_))));

        let snapshot = two_relayers();
        let good = RelayerStateEvent {
            hash: snapshot.hash(),
            relayers: snapshot.relayers().to_vec(),
            cdf: snapshot.cdf().to_vec(),
            block: 5,
        };
        assert_eq!(store.apply_event(&good).unwrap(), snapshot.hash());
        assert!(store.contains(&snapshot.hash()));
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("states.json");
        let store = RelayerStateStore::with_genesis(addr(9), ether(1));
        let hash = store.insert(two_relayers());
        store.save_to(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains(&format!("{:?}", hash)));

        let loaded = RelayerStateStore::load_from(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(*loaded.get(&hash).unwrap(), two_relayers());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_or_new_missing_file() {
        let store = RelayerStateStore::load_or_new(&temp_path("does-not-exist.json")).unwrap();
        assert!(store.is_empty());
    }
}
