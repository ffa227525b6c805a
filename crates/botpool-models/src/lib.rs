pub mod identity;
pub mod premium;

use serde::{Deserialize, Serialize};

/// One voice-state change for one user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UserModify {
    #[serde(rename = "userID")]
    pub user_id: u64,
    pub mute: bool,
    pub deaf: bool,
}

/// A batch of voice-state changes for one guild, tagged with the premium
/// tier that bounds how many secondary identities may be tried per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserModifyRequest {
    pub premium: u8,
    pub users: Vec<UserModify>,
}

/// Per-batch success counts, one increment per dispatched user plus any
/// surfaced chat-service rate limits. Serialized as the modify response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchCounts {
    pub worker: u64,
    pub capture: u64,
    pub official: u64,
    #[serde(rename = "ratelimit")]
    pub rate_limit: u64,
}

impl DispatchCounts {
    /// Users accounted to some tier (rate-limit hits are not an outcome).
    pub fn accounted(&self) -> u64 {
        self.worker + self.capture + self.official
    }
}

/// Depth of the raw job queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JobsNumber {
    pub jobs: i64,
}
