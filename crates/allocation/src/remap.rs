use std::collections::HashMap;

use relaynet_core::RelayerStateSnapshot;

/// For each relayer of `active`, its index in `latest`; relayers that left
/// map to `active.len()`.
pub fn active_to_latest_map(active: &RelayerStateSnapshot, latest: &RelayerStateSnapshot) -> Vec<usize> {
    let latest_index: HashMap<_, _> = latest
        .relayers()
        .iter()
        .enumerate()
        .map(|(i, relayer)| (*relayer, i))
        .collect();
    let absent = active.len();
    active
        .relayers()
        .iter()
        .map(|relayer| latest_index.get(relayer).copied().unwrap_or(absent))
        .collect()
}
