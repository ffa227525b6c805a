use std::time::Duration;

use botpool_models::UserModify;
use botpool_store::{keys, Store};
use serde::Serialize;

use crate::rate_gate::RateGate;
use crate::CAPTURE_IDENTITY;

/// Ack payload meaning the capture worker applied the change.
pub const ACK_SUCCESS: &str = "true";

/// Default wait for the worker's ack.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long an unresponsive capture endpoint sits out.
pub const UNRESPONSIVE_BLACKLIST: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Serialize)]
struct CaptureRequest<'a> {
    #[serde(rename = "guildID")]
    guild_id: u64,
    #[serde(rename = "userID")]
    user_id: u64,
    #[serde(rename = "connectCode")]
    connect_code: &'a str,
    mute: bool,
    deaf: bool,
}

/// Request/ack exchange with the out-of-process capture worker over the
/// store's pub/sub.
///
/// The ack channel is subscribed *before* the request is published: the
/// worker can ack faster than a late subscriber would attach, and a lost
/// ack reads as unresponsiveness.
#[derive(Clone)]
pub struct CaptureBridge {
    store: Store,
    rate_gate: RateGate,
    ack_timeout: Duration,
}

impl CaptureBridge {
    pub fn new(store: Store, rate_gate: RateGate, ack_timeout: Duration) -> Self {
        Self {
            store,
            rate_gate,
            ack_timeout,
        }
    }

    /// Ask the capture worker behind `connect_code` to apply the change.
    /// False means the caller should fall through to the next tier. An
    /// unresponsive or refusing worker is blacklisted for five minutes
    /// under the capture sentinel.
    pub async fn apply(&self, guild_id: u64, connect_code: &str, request: UserModify) -> bool {
        if !self.rate_gate.admit(guild_id, CAPTURE_IDENTITY).await {
            tracing::debug!(guild_id, "capture endpoint is cooling down, skipping");
            return false;
        }

        let ack_channel = keys::ack_channel(connect_code, request.user_id);
        let mut subscription = match self.store.subscribe(&ack_channel).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::warn!(guild_id, "ack subscribe failed: {e}");
                return false;
            }
        };

        let payload = CaptureRequest {
            guild_id,
            user_id: request.user_id,
            connect_code,
            mute: request.mute,
            deaf: request.deaf,
        };
        let payload = match serde_json::to_string(&payload) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(guild_id, "capture request encode failed: {e}");
                return false;
            }
        };
        if let Err(e) = self
            .store
            .publish(&keys::capture_channel(connect_code), &payload)
            .await
        {
            tracing::warn!(guild_id, "capture publish failed: {e}");
            return false;
        }

        match tokio::time::timeout(self.ack_timeout, subscription.next_message()).await {
            Ok(Some(ack)) if ack == ACK_SUCCESS => true,
            Ok(ack) => {
                tracing::warn!(guild_id, connect_code, ?ack, "capture worker refused");
                self.blacklist_endpoint(guild_id).await;
                false
            }
            Err(_) => {
                tracing::warn!(
                    guild_id,
                    connect_code,
                    timeout_ms = self.ack_timeout.as_millis() as u64,
                    "no ack from capture worker"
                );
                self.blacklist_endpoint(guild_id).await;
                false
            }
        }
    }

    async fn blacklist_endpoint(&self, guild_id: u64) {
        self.rate_gate
            .blacklist(guild_id, CAPTURE_IDENTITY, UNRESPONSIVE_BLACKLIST)
            .await;
    }
}
