use std::time::Duration;

use async_trait::async_trait;
use botpool_models::identity;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::socket::{self, GuildAvailable, SocketConfig, DEFAULT_GATEWAY_URL, INTENT_GUILDS};
use crate::{GatewayError, RestClient, VoiceBackend};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct SessionOptions {
    pub credential: String,
    pub gateway_url: String,
    pub api_base: Option<String>,
    pub intents: u64,
    pub shard: Option<[u64; 2]>,
}

impl SessionOptions {
    /// Defaults to a guilds-only subscription, the minimum a secondary
    /// identity needs to learn its memberships.
    pub fn new(credential: &str) -> Self {
        Self {
            credential: credential.to_string(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            api_base: None,
            intents: INTENT_GUILDS,
            shard: None,
        }
    }

    pub fn intents(mut self, intents: u64) -> Self {
        self.intents = intents;
        self
    }

    pub fn shard(mut self, id: u64, total: u64) -> Self {
        self.shard = Some([id, total]);
        self
    }

    pub fn gateway_url(mut self, url: &str) -> Self {
        self.gateway_url = url.to_string();
        self
    }

    pub fn api_base(mut self, base: &str) -> Self {
        self.api_base = Some(base.to_string());
        self
    }
}

/// One live chat-service connection for one bot identity: a REST client
/// for mutations plus a background socket task that keeps the identity
/// present and streams guild-availability events.
pub struct Session {
    identity_hash: String,
    rest: RestClient,
    socket_task: JoinHandle<()>,
}

impl Session {
    /// Open the gateway connection and identify. The initial handshake is
    /// awaited so a dead credential fails here; reconnects afterwards are
    /// handled by the background task.
    pub async fn open(
        options: SessionOptions,
    ) -> Result<(Session, mpsc::Receiver<GuildAvailable>), GatewayError> {
        let identity_hash = identity::hash_credential(&options.credential);
        let rest = match &options.api_base {
            Some(base) => RestClient::with_base_url(&options.credential, base),
            None => RestClient::new(&options.credential),
        };

        let cfg = SocketConfig {
            url: options.gateway_url.clone(),
            token: options.credential.clone(),
            intents: options.intents,
            shard: options.shard,
        };
        let (ws, heartbeat) = socket::connect(&cfg).await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let hash_for_task = identity_hash.clone();
        let socket_task = tokio::spawn(async move {
            supervise(cfg, ws, heartbeat, events_tx, hash_for_task).await;
        });

        Ok((
            Session {
                identity_hash,
                rest,
                socket_task,
            },
            events_rx,
        ))
    }

    pub fn identity_hash(&self) -> &str {
        &self.identity_hash
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.socket_task.abort();
    }
}

#[async_trait]
impl VoiceBackend for Session {
    async fn apply_voice_state(
        &self,
        guild_id: u64,
        user_id: u64,
        mute: bool,
        deaf: bool,
    ) -> Result<(), GatewayError> {
        self.rest
            .modify_member_voice(guild_id, user_id, mute, deaf)
            .await
    }

    fn close(&self) {
        self.socket_task.abort();
    }
}

/// Drive the socket until it fails, then reconnect with capped backoff.
/// Runs until the owning [`Session`] is closed.
async fn supervise(
    cfg: SocketConfig,
    ws: socket::WsStream,
    heartbeat: Duration,
    events: mpsc::Sender<GuildAvailable>,
    identity_hash: String,
) {
    let mut delay = RECONNECT_BASE_DELAY;
    let mut current = Some((ws, heartbeat));

    loop {
        if let Some((ws, heartbeat)) = current.take() {
            match socket::drive(ws, heartbeat, events.clone()).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(
                        identity = identity::short(&identity_hash),
                        "gateway socket dropped: {e}"
                    );
                }
            }
        }

        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(RECONNECT_MAX_DELAY);

        match socket::connect(&cfg).await {
            Ok(pair) => {
                delay = RECONNECT_BASE_DELAY;
                current = Some(pair);
            }
            Err(e) => {
                tracing::warn!(
                    identity = identity::short(&identity_hash),
                    "gateway reconnect failed: {e}"
                );
            }
        }
    }
}
