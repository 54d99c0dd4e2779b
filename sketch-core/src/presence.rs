//! TTL-based presence tracking for room watchers.
//!
//! Every heartbeat refreshes its watcher and, in the same call, drops all
//! watchers that have been silent for the quiescence window. There is no
//! background sweeper: expiry cost is bounded by the number of tracked
//! watchers and paid by whoever heartbeats next.
//!
//! ```text
//! t=0.0  heartbeat(A)  {A}        → 1
//! t=0.0  heartbeat(B)  {A, B}     → 2
//! t=3.1  heartbeat(C)  {C}        → 1   (A, B silent ≥ 3s)
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::model::TokenId;

/// Default quiescence window after which a silent watcher is dropped.
pub const PRESENCE_TTL: Duration = Duration::from_secs(3);

/// Watcher identity → last time it was seen.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    watchers: HashMap<TokenId, Instant>,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::with_ttl(PRESENCE_TTL)
    }

    /// Create with a custom quiescence window (for testing).
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            watchers: HashMap::new(),
            ttl,
        }
    }

    /// Record a heartbeat from `watcher` at `now`, expire silent watchers
    /// and return the resulting count.
    ///
    /// A heartbeat carrying an older instant than the one already stored
    /// never moves the watcher's last-seen time backwards.
    pub fn heartbeat(&mut self, watcher: TokenId, now: Instant) -> usize {
        self.watchers
            .entry(watcher)
            .and_modify(|seen| *seen = (*seen).max(now))
            .or_insert(now);
        self.expire(now)
    }

    /// Drop every watcher silent for at least the window; return the count.
    pub fn expire(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        self.watchers
            .retain(|_, seen| now.saturating_duration_since(*seen) < ttl);
        self.watchers.len()
    }

    /// Count as of the last heartbeat or expiry (may include stale entries).
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    pub fn is_watching(&self, watcher: TokenId) -> bool {
        self.watchers.contains_key(&watcher)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
