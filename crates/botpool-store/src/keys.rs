//! Canonical keyspace shared with the other processes that speak to the
//! store (the game bot pushing jobs, the capture workers listening for
//! requests). Changing any of these strings is a wire-format change.

/// Hash: identity-hash -> bot credential. The bootstrap seed.
pub const ALL_TOKENS: &str = "tokens";

/// List of raw pre-serialized job payloads.
pub const DISCORD_MESSAGES: &str = "discord_messages";

/// Set of identity-hashes usable for a guild.
pub fn guild_tokens(guild_id: u64) -> String {
    format!("guild:{guild_id}:tokens")
}

/// Windowed request counter for one (guild, identity) pair.
pub fn rate_counter(guild_id: u64, identity_hash: &str) -> String {
    format!("ratelimit:{guild_id}:{identity_hash}")
}

/// Pub/sub channel carrying capture requests for one connect code.
pub fn capture_channel(connect_code: &str) -> String {
    format!("capture:{connect_code}")
}

/// Pub/sub channel carrying the capture worker's ack for one user.
pub fn ack_channel(connect_code: &str, user_id: u64) -> String {
    format!("ack:{connect_code}:{user_id}")
}

/// Cross-instance lock taken while identifying a credential to the gateway.
pub fn identify_lock(identity_hash: &str) -> String {
    format!("identify:{identity_hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        assert_eq!(guild_tokens(100), "guild:100:tokens");
        assert_eq!(rate_counter(100, "abc"), "ratelimit:100:abc");
        assert_eq!(capture_channel("XYZW"), "capture:XYZW");
        assert_eq!(ack_channel("XYZW", 42), "ack:XYZW:42");
        assert_eq!(identify_lock("abc"), "identify:abc");
    }
}
