//! Per-window memo cache
//!
//! Window indices only grow, so the oldest entry is always the smallest
//! window. Entries are never invalidated by time; callers that need to detect
//! a changed input store a fingerprint alongside the value.

use std::collections::BTreeMap;

use relaynet_core::WindowIndex;

/// Default number of windows retained
pub const DEFAULT_MAX_WINDOWS: usize = 64;

#[derive(Debug, Clone)]
pub struct WindowCache<V> {
    entries: BTreeMap<WindowIndex, V>,
    max_size: usize,
}

impl<V: Clone> WindowCache<V> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_WINDOWS)
    }

    /// Create a cache holding at most `max_size` windows (minimum one)
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_size: max_size.max(1),
        }
    }

    pub fn insert(&mut self, window: WindowIndex, value: V) {
        if !self.entries.contains_key(&window) {
            while self.entries.len() >= self.max_size {
                self.evict_oldest();
            }
        }
        self.entries.insert(window, value);
    }

    pub fn get(&self, window: WindowIndex) -> Option<V> {
        self.entries.get(&window).cloned()
    }

    pub fn contains(&self, window: WindowIndex) -> bool {
        self.entries.contains_key(&window)
    }

    pub fn remove(&mut self, window: WindowIndex) -> Option<V> {
        self.entries.remove(&window)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every window strictly before `window`
    pub fn evict_before(&mut self, window: WindowIndex) {
        self.entries = self.entries.split_off(&window);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self.entries.keys().next().copied() {
            self.entries.remove(&oldest);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<V: Clone> Default for WindowCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
