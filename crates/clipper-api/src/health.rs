use axum::{Json, extract::State};

use clipper_types::api::GatewayStats;

use crate::AppState;

/// `GET /ws/health`
pub async fn health(State(state): State<AppState>) -> Json<GatewayStats> {
    Json(state.registry.stats())
}
