use axum::extract::{Path, State};
use axum::Json;
use botpool_core::dispatch::{self, BatchContext, Dispatcher};
use botpool_core::AppState;
use botpool_models::{premium, DispatchCounts, UserModifyRequest};
use botpool_store::keys;

use crate::error::ApiError;

/// `POST /modify/{guild_id}/{connect_code}`: apply a batch of mute/deafen
/// changes for one guild, responding with per-tier success counts.
pub async fn modify_guild(
    State(state): State<AppState>,
    Path((guild_id, connect_code)): Path<(String, String)>,
    body: String,
) -> Result<Json<DispatchCounts>, ApiError> {
    let guild_id: u64 = guild_id.parse().map_err(|_| {
        ApiError::BadRequest(
            "invalid guild id; expected POST /modify/<guildID>/<connectCode>".to_string(),
        )
    })?;
    // Decoded by hand so a malformed body reports 400 with the decoder's
    // message rather than the extractor's default status.
    let request: UserModifyRequest =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let limit = premium::secondary_bot_limit(request.premium);
    // One snapshot per batch: every worker iterates the same sequence.
    let secondary_tokens = match state.store.set_members(&keys::guild_tokens(guild_id)).await {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!(guild_id, "token snapshot failed, treating as empty: {e}");
            Vec::new()
        }
    };

    let batch_size = request.users.len();
    let ctx = BatchContext {
        guild_id,
        connect_code,
        secondary_tokens,
        limit,
        primary: state.primary.session_for_guild(guild_id),
    };
    let dispatcher = Dispatcher::from_state(&state);
    let counts = dispatch::run_batch(&dispatcher, ctx, request.users, state.max_workers).await;

    tracing::info!(
        guild_id,
        batch_size,
        worker = counts.worker,
        capture = counts.capture,
        official = counts.official,
        rate_limit = counts.rate_limit,
        "batch dispatched"
    );
    Ok(Json(counts))
}
