use std::time::Duration;

use botpool_models::identity;
use botpool_store::{keys, Store};

/// Window a (guild, identity) counter lives for after an admitted request.
pub const RATE_WINDOW: Duration = Duration::from_secs(5);

/// Default ceiling for one (guild, identity) pair inside the window.
pub const DEFAULT_MAX_REQUESTS_5S: i64 = 7;

/// Sliding-window quota decision per (guild, identity), backed by the
/// shared store so every service instance sees the same view.
///
/// The gate is optimistic: it increments first and judges afterward.
/// Under bursts the counter may briefly exceed the ceiling; the next
/// caller simply sees false.
#[derive(Clone)]
pub struct RateGate {
    store: Store,
    max_requests_5s: i64,
}

impl RateGate {
    pub fn new(store: Store, max_requests_5s: i64) -> Self {
        Self {
            store,
            max_requests_5s,
        }
    }

    /// Increment the pair's counter and admit iff the post-increment value
    /// is strictly below the ceiling. Admission refreshes the 5-second TTL;
    /// a rejection leaves the TTL untouched. Store faults admit: a batch
    /// must not stall on a transient store problem.
    pub async fn admit(&self, guild_id: u64, identity_hash: &str) -> bool {
        let key = keys::rate_counter(guild_id, identity_hash);
        let count = match self.store.incr(&key).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(guild_id, "rate counter increment failed, admitting: {e}");
                return true;
            }
        };

        let usable = count < self.max_requests_5s;
        tracing::debug!(
            guild_id,
            identity = identity::short(identity_hash),
            count,
            usable,
            "quota check"
        );
        if !usable {
            return false;
        }
        if let Err(e) = self.store.expire(&key, RATE_WINDOW).await {
            tracing::warn!(guild_id, "rate counter expire failed: {e}");
        }
        true
    }

    /// Pin the pair at the ceiling for `ttl`, making `admit` return false
    /// until the entry expires.
    pub async fn blacklist(&self, guild_id: u64, identity_hash: &str, ttl: Duration) {
        let key = keys::rate_counter(guild_id, identity_hash);
        if let Err(e) = self
            .store
            .set_with_ttl(&key, self.max_requests_5s, ttl)
            .await
        {
            tracing::warn!(
                guild_id,
                identity = identity::short(identity_hash),
                "blacklist write failed: {e}"
            );
        } else {
            tracing::info!(
                guild_id,
                identity = identity::short(identity_hash),
                ttl_secs = ttl.as_secs(),
                "identity blacklisted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botpool_store::MemoryStore;

    fn gate(max: i64) -> RateGate {
        RateGate::new(Store::Memory(MemoryStore::new()), max)
    }

    #[tokio::test]
    async fn admits_at_most_ceiling_minus_one_in_a_window() {
        let gate = gate(7);
        let mut admitted = 0;
        for _ in 0..20 {
            if gate.admit(100, "h1").await {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 6);
    }

    #[tokio::test]
    async fn pairs_are_independent() {
        let gate = gate(2);
        assert!(gate.admit(100, "h1").await);
        assert!(!gate.admit(100, "h1").await);
        assert!(gate.admit(100, "h2").await);
        assert!(gate.admit(200, "h1").await);
    }

    #[tokio::test]
    async fn blacklist_rejects_immediately() {
        let gate = gate(7);
        gate.blacklist(100, "h1", Duration::from_secs(300)).await;
        assert!(!gate.admit(100, "h1").await);
    }

    #[tokio::test]
    async fn blacklist_expires() {
        let gate = gate(7);
        gate.blacklist(100, "h1", Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(gate.admit(100, "h1").await);
    }
}
