use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use botpool_core::AppState;
use botpool_models::JobsNumber;
use botpool_store::keys;
use serde_json::json;

use crate::error::ApiError;

/// `POST /request/job`: hand one raw pre-serialized job to a worker.
pub async fn pop_job(State(state): State<AppState>) -> Result<Response, ApiError> {
    let job = state.store.list_pop(keys::DISCORD_MESSAGES).await?;
    Ok(match job {
        Some(job) if job.is_empty() => {
            tracing::error!(endpoint = "/request/job", "empty job despite no store error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "empty job returned despite no store error" })),
            )
                .into_response()
        }
        Some(job) => (StatusCode::OK, job).into_response(),
        None => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "No jobs available" })),
        )
            .into_response(),
    })
}

/// `GET /jobs`: current queue depth.
pub async fn queue_depth(State(state): State<AppState>) -> Result<Json<JobsNumber>, ApiError> {
    let jobs = state.store.list_len(keys::DISCORD_MESSAGES).await?;
    Ok(Json(JobsNumber { jobs }))
}

/// `GET /`: liveness.
pub async fn liveness() -> &'static str {
    "ok"
}
