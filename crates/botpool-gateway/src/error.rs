use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rate limited for {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("api responded {status}: {body}")]
    Api { status: u16, body: String },
    #[error("socket: {0}")]
    Socket(String),
}

impl GatewayError {
    /// The cooldown advertised by the service, when this is a rate limit.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
