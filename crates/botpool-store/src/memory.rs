use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::Subscription;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Copy)]
struct Counter {
    value: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

/// In-process store backend. Counters honor TTLs lazily: an expired entry
/// reads as absent and is reset by the next write.
#[derive(Clone, Default)]
pub struct MemoryStore {
    counters: Arc<DashMap<String, Counter>>,
    hashes: Arc<DashMap<String, BTreeMap<String, String>>>,
    sets: Arc<DashMap<String, BTreeSet<String>>>,
    lists: Arc<DashMap<String, VecDeque<String>>>,
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, key: &str) -> i64 {
        let now = Instant::now();
        let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: None,
        });
        if !entry.live(now) {
            *entry = Counter {
                value: 0,
                expires_at: None,
            };
        }
        entry.value += 1;
        entry.value
    }

    pub fn expire(&self, key: &str, ttl: Duration) {
        if let Some(mut entry) = self.counters.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
    }

    pub fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) {
        self.counters.insert(
            key.to_string(),
            Counter {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    pub fn set_nx_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut acquired = false;
        let mut entry = self.counters.entry(key.to_string()).or_insert_with(|| {
            acquired = true;
            Counter {
                value,
                expires_at: Some(now + ttl),
            }
        });
        if !acquired && !entry.live(now) {
            *entry = Counter {
                value,
                expires_at: Some(now + ttl),
            };
            acquired = true;
        }
        acquired
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|entry| entry.live(now))
            .map(|entry| entry.value)
    }

    pub fn set_members(&self, key: &str) -> Vec<String> {
        self.sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_add(&self, key: &str, member: &str) {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
    }

    pub fn set_remove(&self, key: &str, member: &str) {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
    }

    pub fn hash_all(&self, key: &str) -> Vec<(String, String)> {
        self.hashes
            .get(key)
            .map(|hash| {
                hash.iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn hash_set(&self, key: &str, field: &str, value: &str) {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    pub fn list_pop(&self, key: &str) -> Option<String> {
        self.lists.get_mut(key).and_then(|mut list| list.pop_front())
    }

    pub fn list_push(&self, key: &str, value: &str) {
        self.lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
    }

    pub fn list_len(&self, key: &str) -> i64 {
        self.lists.get(key).map(|list| list.len() as i64).unwrap_or(0)
    }

    pub fn publish(&self, channel: &str, payload: &str) {
        if let Some(tx) = self.channels.get(channel) {
            // No receivers is fine; the payload is simply dropped.
            let _ = tx.send(payload.to_string());
        }
    }

    pub fn subscribe(&self, channel: &str) -> Subscription {
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Subscription::memory(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incr_resets_after_expiry() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("k"), 1);
        assert_eq!(store.incr("k"), 2);
        store.set_with_ttl("k", 10, Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.incr("k"), 1);
    }

    #[test]
    fn set_nx_respects_live_entry() {
        let store = MemoryStore::new();
        assert!(store.set_nx_with_ttl("lock", 1, Duration::from_secs(60)));
        assert!(!store.set_nx_with_ttl("lock", 1, Duration::from_secs(60)));
    }

    #[test]
    fn sets_are_ordered_and_removable() {
        let store = MemoryStore::new();
        store.set_add("s", "b");
        store.set_add("s", "a");
        store.set_add("s", "a");
        assert_eq!(store.set_members("s"), vec!["a", "b"]);
        store.set_remove("s", "a");
        assert_eq!(store.set_members("s"), vec!["b"]);
    }

    #[test]
    fn list_pops_in_push_order() {
        let store = MemoryStore::new();
        store.list_push("jobs", "one");
        store.list_push("jobs", "two");
        assert_eq!(store.list_len("jobs"), 2);
        assert_eq!(store.list_pop("jobs").as_deref(), Some("one"));
        assert_eq!(store.list_pop("jobs").as_deref(), Some("two"));
        assert_eq!(store.list_pop("jobs"), None);
    }

    #[tokio::test]
    async fn publish_reaches_existing_subscriber() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("ch");
        store.publish("ch", "true");
        assert_eq!(sub.next_message().await.as_deref(), Some("true"));
    }
}
