use std::sync::Arc;
use std::time::Duration;

use botpool_gateway::{Session, SessionOptions};
use botpool_models::identity;
use botpool_store::{keys, Store};

use crate::registry::SessionRegistry;

/// How long one identify slot is held. The chat service allows one
/// identify per credential per five seconds; the lock keeps concurrent
/// service instances from racing it.
const IDENTIFY_LOCK_TTL: Duration = Duration::from_secs(6);
const IDENTIFY_LOCK_RETRY: Duration = Duration::from_millis(500);
const IDENTIFY_LOCK_ATTEMPTS: u32 = 20;

#[derive(Clone)]
pub struct BootstrapOptions {
    pub gateway_url: String,
    pub api_base: Option<String>,
}

/// Load every credential from the `tokens` hash and open a session for
/// each, registering it with its guild-available pump attached. Failures
/// are per-credential: a dead token is logged and skipped, startup goes on.
/// Returns how many sessions were opened.
pub async fn populate_and_start_sessions(
    store: &Store,
    registry: &Arc<SessionRegistry>,
    options: &BootstrapOptions,
) -> usize {
    let credentials = match store.hash_all(keys::ALL_TOKENS).await {
        Ok(all) => all,
        Err(e) => {
            tracing::warn!("could not load the token hash: {e}");
            return 0;
        }
    };

    let mut opened = 0;
    for (_, credential) in credentials {
        if open_and_register(store, registry, options, &credential).await {
            opened += 1;
        }
    }
    tracing::info!(opened, "secondary sessions started");
    opened
}

async fn open_and_register(
    store: &Store,
    registry: &Arc<SessionRegistry>,
    options: &BootstrapOptions,
    credential: &str,
) -> bool {
    let hash = identity::hash_credential(credential);
    if registry.get(&hash).await.is_some() {
        return false;
    }

    wait_for_identify_slot(store, &hash).await;

    let mut session_options =
        SessionOptions::new(credential).gateway_url(&options.gateway_url);
    if let Some(base) = &options.api_base {
        session_options = session_options.api_base(base);
    }

    match Session::open(session_options).await {
        Ok((session, events)) => {
            tracing::info!(identity = identity::short(&hash), "opened session on startup");
            registry
                .register(&hash, Arc::new(session), Some(events))
                .await;
            true
        }
        Err(e) => {
            tracing::warn!(
                identity = identity::short(&hash),
                "could not open session: {e}"
            );
            false
        }
    }
}

/// Take the cross-instance identify lock for this credential, waiting a
/// bounded time for another holder to finish. Store faults fall open:
/// an identify attempt beats never starting.
async fn wait_for_identify_slot(store: &Store, identity_hash: &str) {
    let key = keys::identify_lock(identity_hash);
    for _ in 0..IDENTIFY_LOCK_ATTEMPTS {
        match store.set_nx_with_ttl(&key, 1, IDENTIFY_LOCK_TTL).await {
            Ok(true) => return,
            Ok(false) => tokio::time::sleep(IDENTIFY_LOCK_RETRY).await,
            Err(e) => {
                tracing::warn!("identify lock unavailable, proceeding: {e}");
                return;
            }
        }
    }
    tracing::warn!(
        identity = identity::short(identity_hash),
        "identify lock never freed, proceeding anyway"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use botpool_store::MemoryStore;

    #[tokio::test]
    async fn empty_token_hash_opens_nothing() {
        let store = Store::Memory(MemoryStore::new());
        let registry = SessionRegistry::new(store.clone());
        let options = BootstrapOptions {
            gateway_url: "ws://127.0.0.1:1/".to_string(),
            api_base: None,
        };
        assert_eq!(
            populate_and_start_sessions(&store, &registry, &options).await,
            0
        );
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn dead_credential_is_skipped_without_aborting() {
        let memory = MemoryStore::new();
        let store = Store::Memory(memory.clone());
        // Nothing listens on this port, so the session open fails fast.
        memory.hash_set(keys::ALL_TOKENS, "field", "credential-a");
        let registry = SessionRegistry::new(store.clone());
        let options = BootstrapOptions {
            gateway_url: "ws://127.0.0.1:1/".to_string(),
            api_base: None,
        };
        assert_eq!(
            populate_and_start_sessions(&store, &registry, &options).await,
            0
        );
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn identify_slot_waits_for_the_holder() {
        let memory = MemoryStore::new();
        let store = Store::Memory(memory.clone());
        // Hold the slot with a short TTL, then confirm the waiter gets it.
        memory.set_nx_with_ttl(&keys::identify_lock("h1"), 1, Duration::from_millis(100));
        let started = std::time::Instant::now();
        wait_for_identify_slot(&store, "h1").await;
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
