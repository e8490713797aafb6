// =============================================================================
// Trade-parameters store — per-date key/value map with SSE pub/sub
// =============================================================================
//
// Clients read and mutate per-date `"SYMBOL:SESSION" -> f64` targets through
// the REST surface (`GET/PUT/DELETE /api/targets`) and watch them live over
// `GET /api/targets/stream`. A single mutex guards the date-keyed map;
// subscribers are a separate mutex-guarded list of bounded channels. On
// subscribe a `snapshot` event is always emitted before any `set`/`delete`
// delta, and a full channel is handled by dropping the event rather than
// blocking the mutator.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Capacity of each subscriber's event channel before drops start.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetEvent {
    Snapshot { targets: HashMap<String, HashMap<String, f64>> },
    Set { date: String, key: String, value: f64 },
    Delete { date: String, key: String },
}

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<TargetEvent>,
}

pub struct TargetsStore {
    targets: Mutex<HashMap<String, HashMap<String, f64>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
}

impl Default for TargetsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetsStore {
    pub fn new() -> Self {
        Self {
            targets: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// All targets for `date`, or an empty map if none have been set.
    pub fn for_date(&self, date: &str) -> HashMap<String, f64> {
        self.targets.lock().get(date).cloned().unwrap_or_default()
    }

    pub fn set(&self, date: &str, key: &str, value: f64) {
        self.targets
            .lock()
            .entry(date.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.broadcast(TargetEvent::Set {
            date: date.to_string(),
            key: key.to_string(),
            value,
        });
    }

    pub fn delete(&self, date: &str, key: &str) {
        if let Some(by_key) = self.targets.lock().get_mut(date) {
            by_key.remove(key);
        }
        self.broadcast(TargetEvent::Delete {
            date: date.to_string(),
            key: key.to_string(),
        });
    }

    /// Register a new subscriber and return its id, an immediate snapshot
    /// event, and the receiving half of its channel. The snapshot is
    /// guaranteed to precede any delta this subscriber sees because both are
    /// produced while holding the subscriber-list lock across registration.
    pub fn subscribe(&self) -> (u64, TargetEvent, mpsc::Receiver<TargetEvent>) {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let snapshot = TargetEvent::Snapshot { targets: self.targets.lock().clone() };
        self.subscribers.lock().push(Subscriber { id, sender: tx });
        (id, snapshot, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    fn broadcast(&self, event: TargetEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|s| match s.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true, // drop this event, keep subscriber
            Err(mpsc::error::TrySendError::Closed(_)) => false, // unregister
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_precedes_deltas() {
        let store = TargetsStore::new();
        store.set("2024-01-02", "AAPL:REG", 1.0);

        let (_id, snapshot, mut rx) = store.subscribe();
        assert!(matches!(snapshot, TargetEvent::Snapshot { .. }));

        store.set("2024-01-02", "AAPL:REG", 2.0);
        let next = rx.recv().await.unwrap();
        match next {
            TargetEvent::Set { value, .. } => assert_eq!(value, 2.0),
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn set_then_delete_round_trips() {
        let store = TargetsStore::new();
        store.set("2024-01-02", "AAPL:REG", 5.0);
        assert_eq!(store.for_date("2024-01-02").get("AAPL:REG"), Some(&5.0));
        store.delete("2024-01-02", "AAPL:REG");
        assert_eq!(store.for_date("2024-01-02").get("AAPL:REG"), None);
    }

    #[test]
    fn unsubscribe_removes_from_broadcast_list() {
        let store = TargetsStore::new();
        let (id, _snap, rx) = store.subscribe();
        store.unsubscribe(id);
        drop(rx);
        store.set("2024-01-02", "AAPL:REG", 1.0);
        assert_eq!(store.subscribers.lock().len(), 0);
    }

    #[test]
    fn missing_date_returns_empty_map() {
        let store = TargetsStore::new();
        assert!(store.for_date("2024-01-02").is_empty());
    }
}
