//! Per-relayer window participation

use std::collections::BTreeSet;

use relaynet_core::WindowIndex;
use serde::{Deserialize, Serialize};

/// Windows a relayer was selected in, and the subset in which it had
/// nothing to submit. Both sets only grow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowParticipationRecord {
    selected_in: BTreeSet<WindowIndex>,
    selected_in_but_idle: BTreeSet<WindowIndex>,
}

impl WindowParticipationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_selected(&mut self, window: WindowIndex) {
        self.selected_in.insert(window);
    }

    /// Selected but nothing allocated; also counts as selected
    pub fn record_idle(&mut self, window: WindowIndex) {
        self.selected_in.insert(window);
        self.selected_in_but_idle.insert(window);
    }

    pub fn selected_in(&self) -> &BTreeSet<WindowIndex> {
        &self.selected_in
    }

    pub fn selected_in_but_idle(&self) -> &BTreeSet<WindowIndex> {
        &self.selected_in_but_idle
    }

    pub fn was_selected(&self, window: WindowIndex) -> bool {
        self.selected_in.contains(&window)
    }

    pub fn was_idle(&self, window: WindowIndex) -> bool {
        self.selected_in_but_idle.contains(&window)
    }

    /// Windows in which a batch was actually submitted
    pub fn active_windows(&self) -> usize {
        self.selected_in.len() - self.selected_in_but_idle.len()
    }
}
