//! Chat-service client plumbing: the REST voice-state mutation, a minimal
//! gateway socket for guild-availability events, shard derivation, and the
//! [`Session`] tying them together per bot identity.
//!
//! Core never talks to the network directly; it sees sessions through the
//! [`VoiceBackend`] seam so tests can substitute stubs.

mod error;
mod rest;
mod session;
mod shard;
mod socket;

use async_trait::async_trait;

pub use error::GatewayError;
pub use rest::RestClient;
pub use session::{Session, SessionOptions};
pub use shard::{shard_for_guild, ShardManager};
pub use socket::{default_intents, GuildAvailable, DEFAULT_GATEWAY_URL, INTENT_GUILDS};

/// Anything that can apply a mute/deafen mutation for one guild member.
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    async fn apply_voice_state(
        &self,
        guild_id: u64,
        user_id: u64,
        mute: bool,
        deaf: bool,
    ) -> Result<(), GatewayError>;

    /// Tear down any long-lived connection this backend owns.
    fn close(&self) {}
}
