// =============================================================================
// Replay cache — LRU-bounded sorted trade snapshots for the replay endpoint
// =============================================================================
//
// `GET /api/dashboard/replay` time-travels into a historical date. Loading
// and sorting a full day of trades from disk is not cheap, so the dashboard
// server keeps at most `capacity` dates resident, evicting the
// least-recently-used one on insert. This tracks a monotonic access counter
// per entry and evicts the smallest one rather than maintaining a strict
// doubly-linked LRU list, which behaves identically for the access patterns
// this endpoint sees (a handful of hot recent dates).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::types::{TierMap, TradeRecord};

/// One cached date: trades sorted by timestamp (for binary search / `<=`
/// filtering) plus the tier map in effect for that date.
#[derive(Clone)]
pub struct ReplayEntry {
    pub trades: Vec<TradeRecord>,
    pub tier_map: TierMap,
}

struct Slot {
    entry: ReplayEntry,
    last_used: u64,
}

pub struct ReplayCache {
    capacity: usize,
    slots: Mutex<HashMap<String, Slot>>,
    clock: AtomicU64,
}

impl ReplayCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, date: &str) -> Option<ReplayEntry> {
        let mut slots = self.slots.lock();
        let tick = self.tick();
        let slot = slots.get_mut(date)?;
        slot.last_used = tick;
        Some(slot.entry.clone())
    }

    /// Insert `entry` for `date`, evicting the least-recently-used entry if
    /// the cache is at capacity and `date` is not already present.
    pub fn insert(&self, date: String, entry: ReplayEntry) {
        let mut slots = self.slots.lock();
        let tick = self.tick();

        if !slots.contains_key(&date) && slots.len() >= self.capacity {
            if let Some(evict_key) = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone())
            {
                slots.remove(&evict_key);
            }
        }

        slots.insert(date, Slot { entry, last_used: tick });
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ReplayEntry {
        ReplayEntry { trades: Vec::new(), tier_map: TierMap::new() }
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let cache = ReplayCache::new(2);
        cache.insert("2024-01-01".into(), entry());
        cache.insert("2024-01-02".into(), entry());
        // Touch 01-01 so 01-02 becomes the least-recently-used.
        assert!(cache.get("2024-01-01").is_some());
        cache.insert("2024-01-03".into(), entry());

        assert!(cache.get("2024-01-01").is_some());
        assert!(cache.get("2024-01-02").is_none());
        assert!(cache.get("2024-01-03").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinserting_existing_date_does_not_evict() {
        let cache = ReplayCache::new(2);
        cache.insert("2024-01-01".into(), entry());
        cache.insert("2024-01-02".into(), entry());
        cache.insert("2024-01-01".into(), entry());
        assert_eq!(cache.len(), 2);
        assert!(cache.get("2024-01-02").is_some());
    }

    #[test]
    fn miss_returns_none() {
        let cache = ReplayCache::new(2);
        assert!(cache.get("2024-01-01").is_none());
    }
}
