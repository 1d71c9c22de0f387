//! One-shot HTTP surface (§6), a thin axum binding over [`tm_core::api`]. Distinct `Router`
//! state from the WebSocket route (`Arc<Core>` rather than [`crate::ws::AppState`]) — merged
//! into the same server in `main`.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use tm_core::api::{OneShotRequest, OneShotResponse};
use tm_core::Core;

pub fn router(core: Arc<Core>) -> Router {
    Router::new()
        .route("/api/one-shot", post(handle))
        .with_state(core)
}

async fn handle(
    State(core): State<Arc<Core>>,
    Json(request): Json<OneShotRequest>,
) -> Json<OneShotResponse> {
    Json(core.handle_one_shot(request, None).await)
}
