use dashmap::DashMap;
use std::collections::VecDeque;

/// Per-key algorithm state.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowState {
    /// Accepted timestamps (millis), oldest first.
    Sliding {
        /// Accepted request times.
        hits: VecDeque<u64>,
    },
    /// Counter for the current one-minute window.
    Fixed {
        /// When the current window opened.
        window_start: u64,
        /// Requests admitted in the current window.
        count: u32,
    },
    /// Continuous refill bucket.
    Bucket {
        /// Available tokens.
        tokens: f64,
        /// Last time tokens were added.
        last_refill: u64,
    },
}

#[derive(Debug)]
struct KeyState {
    window: WindowState,
    last_seen: u64,
}

/// In-memory limiter state, sharded by key.
///
/// `update` holds the shard write lock for the whole read-decide-write sequence, so
/// concurrent checks against one key are serialized and never over-admit.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    entries: DashMap<String, KeyState>,
}

impl InMemoryStateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the state for `key`, creating it with `init` on first use.
    pub fn update<R>(
        &self,
        key: &str,
        now: u64,
        init: impl FnOnce() -> WindowState,
        f: impl FnOnce(&mut WindowState) -> R,
    ) -> R {
        let mut entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| KeyState { window: init(), last_seen: now });
        entry.last_seen = now;
        f(&mut entry.window)
    }

    /// Copy of the state for `key`.
    pub fn get(&self, key: &str) -> Option<WindowState> {
        self.entries.get(key).map(|e| e.window.clone())
    }

    /// Drop keys not touched within `ttl_millis` of `now`. Returns how many were removed.
    pub fn evict_idle(&self, now: u64, ttl_millis: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, state| now.saturating_sub(state.last_seen) < ttl_millis);
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
