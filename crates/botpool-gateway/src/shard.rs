use std::sync::Arc;

use crate::socket::default_intents;
use crate::{GatewayError, Session, SessionOptions, VoiceBackend};

/// Gateway sharding rule: the shard for a guild is derived from the
/// timestamp half of its snowflake.
pub fn shard_for_guild(guild_id: u64, shard_count: u64) -> u64 {
    if shard_count <= 1 {
        return 0;
    }
    (guild_id >> 22) % shard_count
}

/// The primary identity's shard set. Tier-C dispatches pick the shard the
/// guild hashes to.
pub struct ShardManager {
    shards: Vec<Arc<dyn VoiceBackend>>,
}

impl ShardManager {
    /// Open one session per shard for the primary credential.
    pub async fn start(
        credential: &str,
        gateway_url: &str,
        api_base: Option<&str>,
        shard_count: u64,
    ) -> Result<Self, GatewayError> {
        let count = shard_count.max(1);
        let mut shards: Vec<Arc<dyn VoiceBackend>> = Vec::with_capacity(count as usize);
        for id in 0..count {
            let mut options = SessionOptions::new(credential)
                .gateway_url(gateway_url)
                .intents(default_intents())
                .shard(id, count);
            if let Some(base) = api_base {
                options = options.api_base(base);
            }
            let (session, events) = Session::open(options).await?;
            // Membership of the primary identity is not tracked; only
            // secondary sessions feed the guild token sets.
            drop(events);
            shards.push(Arc::new(session));
        }
        Ok(Self { shards })
    }

    /// Wrap pre-built backends; used by in-process harnesses.
    pub fn from_backends(shards: Vec<Arc<dyn VoiceBackend>>) -> Self {
        assert!(!shards.is_empty(), "shard set cannot be empty");
        Self { shards }
    }

    pub fn shard_count(&self) -> u64 {
        self.shards.len() as u64
    }

    pub fn session_for_guild(&self, guild_id: u64) -> Arc<dyn VoiceBackend> {
        let idx = shard_for_guild(guild_id, self.shards.len() as u64) as usize;
        Arc::clone(&self.shards[idx])
    }

    pub fn close_all(&self) {
        for shard in &self.shards {
            shard.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::shard_for_guild;

    #[test]
    fn single_shard_takes_everything() {
        assert_eq!(shard_for_guild(0, 1), 0);
        assert_eq!(shard_for_guild(u64::MAX, 1), 0);
        assert_eq!(shard_for_guild(12345, 0), 0);
    }

    #[test]
    fn shard_uses_snowflake_timestamp_bits() {
        // Two ids differing only below bit 22 land on the same shard.
        let base = 175_928_847_299_117_063_u64;
        assert_eq!(shard_for_guild(base, 16), shard_for_guild(base | 0x3F_FFFF, 16));
        // The worked example from the sharding docs: this snowflake mod 16 == 7.
        assert_eq!(shard_for_guild(base, 16), (base >> 22) % 16);
    }
}
