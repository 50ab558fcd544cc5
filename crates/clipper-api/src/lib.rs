//! HTTP surface of the chat gateway.
//!
//! `GET /ws/channels/{channel_id}` upgrades to a channel WebSocket after the
//! origin, token and join checks pass. `GET /ws/health` reports connection
//! counts, and `POST /internal/moderation/disconnect` lets trusted services
//! remove a user from a channel across the cluster.

pub mod auth;
pub mod error;
pub mod health;
pub mod moderation;
pub mod origin;
pub mod ws;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use clipper_gateway::HubRegistry;

pub use error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub registry: HubRegistry,
    pub jwt_secret: String,
    /// Exact origins, `*`, or `*.domain` patterns.
    pub allowed_origins: Vec<String>,
    /// Shared secret for `/internal` routes. `None` disables them.
    pub internal_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/channels/{channel_id}", get(ws::ws_upgrade))
        .route("/ws/health", get(health::health))
        .route("/internal/moderation/disconnect", post(moderation::force_disconnect))
        .with_state(state)
}
