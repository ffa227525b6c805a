//! Shared key-value store capability.
//!
//! All cross-instance state (rate windows, guild membership, the job queue,
//! capture pub/sub) lives behind [`Store`]. The `Redis` backend is the
//! production path; the `Memory` backend is a full in-process implementation
//! selected by runtime configuration, used by tests and single-node setups.

pub mod keys;
mod memory;
mod redis;

use std::time::Duration;

use thiserror::Error;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o: {0}")]
    Backend(#[from] ::redis::RedisError),
    #[error("store connect: {0}")]
    Connect(String),
}

/// Runtime-selected store backend. Enum dispatch keeps call sites free of
/// trait objects while letting tests and config swap the implementation.
#[derive(Clone)]
pub enum Store {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl Store {
    /// Increment an integer counter, returning the post-increment value.
    pub async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        match self {
            Store::Redis(s) => s.incr(key).await,
            Store::Memory(s) => Ok(s.incr(key)),
        }
    }

    /// (Re)set the TTL of an existing key.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        match self {
            Store::Redis(s) => s.expire(key, ttl).await,
            Store::Memory(s) => {
                s.expire(key, ttl);
                Ok(())
            }
        }
    }

    /// Set an integer value with a TTL, overwriting anything present.
    pub async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        match self {
            Store::Redis(s) => s.set_with_ttl(key, value, ttl).await,
            Store::Memory(s) => {
                s.set_with_ttl(key, value, ttl);
                Ok(())
            }
        }
    }

    /// Set an integer value with a TTL only if the key is absent.
    /// Returns true when the lock was acquired.
    pub async fn set_nx_with_ttl(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        match self {
            Store::Redis(s) => s.set_nx_with_ttl(key, value, ttl).await,
            Store::Memory(s) => Ok(s.set_nx_with_ttl(key, value, ttl)),
        }
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Store::Redis(s) => s.set_members(key).await,
            Store::Memory(s) => Ok(s.set_members(key)),
        }
    }

    pub async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        match self {
            Store::Redis(s) => s.set_add(key, member).await,
            Store::Memory(s) => {
                s.set_add(key, member);
                Ok(())
            }
        }
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        match self {
            Store::Redis(s) => s.set_remove(key, member).await,
            Store::Memory(s) => {
                s.set_remove(key, member);
                Ok(())
            }
        }
    }

    /// All field/value pairs of a hash. Missing hash reads as empty.
    pub async fn hash_all(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        match self {
            Store::Redis(s) => s.hash_all(key).await,
            Store::Memory(s) => Ok(s.hash_all(key)),
        }
    }

    /// Pop the head of a list, if any.
    pub async fn list_pop(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            Store::Redis(s) => s.list_pop(key).await,
            Store::Memory(s) => Ok(s.list_pop(key)),
        }
    }

    /// Append to the tail of a list.
    pub async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            Store::Redis(s) => s.list_push(key, value).await,
            Store::Memory(s) => {
                s.list_push(key, value);
                Ok(())
            }
        }
    }

    pub async fn list_len(&self, key: &str) -> Result<i64, StoreError> {
        match self {
            Store::Redis(s) => s.list_len(key).await,
            Store::Memory(s) => Ok(s.list_len(key)),
        }
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        match self {
            Store::Redis(s) => s.publish(channel, payload).await,
            Store::Memory(s) => {
                s.publish(channel, payload);
                Ok(())
            }
        }
    }

    /// Open a subscription on one channel. The subscription is released by
    /// dropping the returned handle.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        match self {
            Store::Redis(s) => s.subscribe(channel).await,
            Store::Memory(s) => Ok(s.subscribe(channel)),
        }
    }
}

/// A live pub/sub subscription on a single channel.
pub struct Subscription {
    inner: SubscriptionInner,
}

enum SubscriptionInner {
    Redis(self::redis::RedisSubscription),
    Memory(tokio::sync::broadcast::Receiver<String>),
}

impl Subscription {
    pub(crate) fn redis(sub: self::redis::RedisSubscription) -> Self {
        Self {
            inner: SubscriptionInner::Redis(sub),
        }
    }

    pub(crate) fn memory(rx: tokio::sync::broadcast::Receiver<String>) -> Self {
        Self {
            inner: SubscriptionInner::Memory(rx),
        }
    }

    /// Next payload on the channel. `None` means the subscription is closed.
    pub async fn next_message(&mut self) -> Option<String> {
        match &mut self.inner {
            SubscriptionInner::Redis(sub) => sub.next_message().await,
            SubscriptionInner::Memory(rx) => loop {
                match rx.recv().await {
                    Ok(payload) => return Some(payload),
                    // A lagged receiver skips to the oldest retained message.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }
}
