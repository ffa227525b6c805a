use std::time::Duration;

use reqwest::header::{HeaderMap, AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::GatewayError;

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct VoiceStatePatch {
    mute: bool,
    deaf: bool,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// REST client for one bot credential. Only the member voice-state
/// mutation is needed here; everything else the chat service offers is
/// someone else's job.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    /// Point the client at a different API root (local test servers).
    pub fn with_base_url(token: &str, base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// PATCH the guild member's server mute/deafen flags.
    pub async fn modify_member_voice(
        &self,
        guild_id: u64,
        user_id: u64,
        mute: bool,
        deaf: bool,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/guilds/{}/members/{}", self.base_url, guild_id, user_id);
        let resp = self
            .http
            .patch(&url)
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .json(&VoiceStatePatch { mute, deaf })
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let header_delay = retry_delay_from_headers(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            let retry_after = header_delay
                .or_else(|| {
                    serde_json::from_str::<RateLimitBody>(&body)
                        .ok()
                        .map(|b| Duration::from_secs_f64(b.retry_after.max(0.0)))
                })
                .unwrap_or(Duration::from_secs(5));
            return Err(GatewayError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs = raw.trim().parse::<f64>().ok()?;
    if secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
