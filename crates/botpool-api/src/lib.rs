use axum::extract::Request;
use axum::routing::{get, post};
use axum::Router;
use botpool_core::AppState;

pub mod error;
pub mod routes;

pub fn build_router() -> Router<AppState> {
    Router::new()
        // Liveness
        .route("/", get(routes::jobs::liveness))
        // Dispatch
        .route(
            "/modify/{guild_id}/{connect_code}",
            post(routes::modify::modify_guild),
        )
        // Job queue
        .route("/request/job", post(routes::jobs::pop_job))
        .route("/jobs", get(routes::jobs::queue_depth))
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(|request: &Request| {
                let matched_path = request
                    .extensions()
                    .get::<axum::extract::MatchedPath>()
                    .map(axum::extract::MatchedPath::as_str)
                    .unwrap_or_else(|| request.uri().path());
                tracing::info_span!(
                    "http",
                    method = %request.method(),
                    path = %matched_path
                )
            }),
        )
}
