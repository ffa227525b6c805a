use std::collections::HashMap;
use std::sync::Arc;

use botpool_gateway::{GuildAvailable, VoiceBackend};
use botpool_models::identity;
use botpool_store::{keys, Store};
use tokio::sync::{mpsc, RwLock};

/// In-memory map from identity-hash to live session, guarded by a
/// many-reader/one-writer lock. The lock is held only for map access,
/// never across a chat-service call.
pub struct SessionRegistry {
    store: Store,
    sessions: RwLock<HashMap<String, Arc<dyn VoiceBackend>>>,
}

impl SessionRegistry {
    pub fn new(store: Store) -> Arc<Self> {
        Arc::new(Self {
            store,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub async fn get(&self, identity_hash: &str) -> Option<Arc<dyn VoiceBackend>> {
        self.sessions.read().await.get(identity_hash).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Insert a session, idempotently: a hash that is already registered
    /// keeps its existing session and the incoming one is closed.
    ///
    /// When an event stream is supplied, a pump task is spawned that writes
    /// every guild-available event into `guild:{id}:tokens`; membership is
    /// learned reactively, never crawled. The pump ends when the session's
    /// event sender goes away.
    pub async fn register(
        &self,
        identity_hash: &str,
        session: Arc<dyn VoiceBackend>,
        events: Option<mpsc::Receiver<GuildAvailable>>,
    ) {
        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(identity_hash) {
                tracing::debug!(
                    identity = identity::short(identity_hash),
                    "session already registered"
                );
                session.close();
                return;
            }
            sessions.insert(identity_hash.to_string(), session);
        }

        if let Some(events) = events {
            tokio::spawn(membership_pump(
                self.store.clone(),
                identity_hash.to_string(),
                events,
            ));
        }
    }

    /// Close every session and empty the map.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        for (hash, session) in sessions.drain() {
            tracing::info!(identity = identity::short(&hash), "closing session");
            session.close();
        }
    }
}

async fn membership_pump(
    store: Store,
    identity_hash: String,
    mut events: mpsc::Receiver<GuildAvailable>,
) {
    while let Some(event) = events.recv().await {
        let key = keys::guild_tokens(event.guild_id);
        match store.set_add(&key, &identity_hash).await {
            Ok(()) => tracing::info!(
                guild_id = event.guild_id,
                identity = identity::short(&identity_hash),
                "identity available for guild"
            ),
            Err(e) => tracing::warn!(
                guild_id = event.guild_id,
                "guild membership write failed: {e}"
            ),
        }
    }
    tracing::debug!(
        identity = identity::short(&identity_hash),
        "membership pump stopped"
    );
}
