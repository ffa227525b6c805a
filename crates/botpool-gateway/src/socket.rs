use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::GatewayError;

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

pub const INTENT_GUILDS: u64 = 1 << 0;
pub const INTENT_GUILD_VOICE_STATES: u64 = 1 << 7;
pub const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
pub const INTENT_GUILD_MESSAGE_REACTIONS: u64 = 1 << 10;

/// Intents the primary identity runs with.
pub fn default_intents() -> u64 {
    INTENT_GUILDS | INTENT_GUILD_VOICE_STATES | INTENT_GUILD_MESSAGES | INTENT_GUILD_MESSAGE_REACTIONS
}

const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A guild this session became a member of (or re-learned at resume).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuildAvailable {
    pub guild_id: u64,
}

#[derive(Clone)]
pub(crate) struct SocketConfig {
    pub url: String,
    pub token: String,
    pub intents: u64,
    pub shard: Option<[u64; 2]>,
}

/// Connect, wait for HELLO, identify. Returns the established stream and
/// the heartbeat interval the service asked for.
pub(crate) async fn connect(cfg: &SocketConfig) -> Result<(WsStream, Duration), GatewayError> {
    let (mut ws, _) = connect_async(cfg.url.as_str())
        .await
        .map_err(|e| GatewayError::Socket(e.to_string()))?;

    let heartbeat = loop {
        let msg = ws
            .next()
            .await
            .ok_or_else(|| GatewayError::Socket("closed before hello".into()))?
            .map_err(|e| GatewayError::Socket(e.to_string()))?;
        if let Message::Text(text) = msg {
            let frame: Value = serde_json::from_str(&text)
                .map_err(|e| GatewayError::Socket(format!("bad hello frame: {e}")))?;
            if frame["op"].as_u64() == Some(OP_HELLO) {
                let interval = frame["d"]["heartbeat_interval"].as_u64().unwrap_or(41_250);
                break Duration::from_millis(interval);
            }
        }
    };

    let mut payload = serde_json::json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": cfg.token,
            "intents": cfg.intents,
            "properties": { "os": "linux", "browser": "botpool", "device": "botpool" },
        }
    });
    if let Some(shard) = cfg.shard {
        payload["d"]["shard"] = serde_json::json!(shard);
    }
    ws.send(Message::Text(payload.to_string().into()))
        .await
        .map_err(|e| GatewayError::Socket(e.to_string()))?;

    Ok((ws, heartbeat))
}

/// Pump the established socket: heartbeat on schedule, answer pings,
/// fan `GUILD_CREATE` dispatches into `events`. Returns when the service
/// asks for a reconnect or the stream dies.
pub(crate) async fn drive(
    mut ws: WsStream,
    heartbeat: Duration,
    events: mpsc::Sender<GuildAvailable>,
) -> Result<(), GatewayError> {
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_seq: Option<u64> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let beat = serde_json::json!({ "op": OP_HEARTBEAT, "d": last_seq });
                ws.send(Message::Text(beat.to_string().into()))
                    .await
                    .map_err(|e| GatewayError::Socket(e.to_string()))?;
            }
            msg = ws.next() => {
                let msg = msg
                    .ok_or_else(|| GatewayError::Socket("stream ended".into()))?
                    .map_err(|e| GatewayError::Socket(e.to_string()))?;
                match msg {
                    Message::Text(text) => {
                        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(seq) = frame["s"].as_u64() {
                            last_seq = Some(seq);
                        }
                        match frame["op"].as_u64() {
                            Some(OP_DISPATCH) => {
                                if frame["t"] == "GUILD_CREATE" {
                                    let parsed = frame["d"]["id"]
                                        .as_str()
                                        .and_then(|raw| raw.parse::<u64>().ok());
                                    if let Some(guild_id) = parsed {
                                        // Primary shards drop their receiver; a
                                        // full or closed channel is not an error.
                                        let _ = events.try_send(GuildAvailable { guild_id });
                                    }
                                }
                            }
                            Some(OP_HEARTBEAT) => {
                                let beat = serde_json::json!({ "op": OP_HEARTBEAT, "d": last_seq });
                                ws.send(Message::Text(beat.to_string().into()))
                                    .await
                                    .map_err(|e| GatewayError::Socket(e.to_string()))?;
                            }
                            Some(OP_RECONNECT) | Some(OP_INVALID_SESSION) => {
                                return Err(GatewayError::Socket("reconnect requested".into()));
                            }
                            _ => {}
                        }
                    }
                    Message::Ping(data) => {
                        ws.send(Message::Pong(data))
                            .await
                            .map_err(|e| GatewayError::Socket(e.to_string()))?;
                    }
                    Message::Close(_) => {
                        return Err(GatewayError::Socket("closed by peer".into()));
                    }
                    _ => {}
                }
            }
        }
    }
}
