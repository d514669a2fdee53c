use std::collections::{BTreeMap, HashMap};

use crate::types::UserId;

/// Per-peer counters of messages that arrived outside the active conversation.
#[derive(Debug, Clone, Default)]
pub struct UnreadTracker {
    counts: HashMap<UserId, u64>,
}

impl UnreadTracker {
    pub fn increment(&mut self, peer_id: UserId) -> u64 {
        let count = self.counts.entry(peer_id).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Returns `true` when a non-zero counter was removed.
    pub fn clear(&mut self, peer_id: UserId) -> bool {
        self.counts.remove(&peer_id).is_some()
    }

    pub fn count(&self, peer_id: UserId) -> u64 {
        self.counts.get(&peer_id).copied().unwrap_or(0)
    }

    /// Replace every counter with the server's authoritative view.
    /// `active_peer` is forced to zero.
    pub fn resync(&mut self, counts: HashMap<UserId, u64>, active_peer: Option<UserId>) {
        self.counts = counts
            .into_iter()
            .filter(|(peer_id, count)| *count > 0 && Some(*peer_id) != active_peer)
            .collect();
    }

    /// Ordered copy for display.
    pub fn snapshot(&self) -> BTreeMap<UserId, u64> {
        self.counts.iter().map(|(k, v)| (*k, *v)).collect()
    }
}
