use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, header},
    response::Response,
};
use serde::Deserialize;
use tracing::{debug, warn};

use clipper_gateway::connection::serve_connection;
use clipper_types::models::ChannelId;

use crate::AppState;
use crate::auth::{request_token, verify_token};
use crate::error::ApiError;
use crate::origin::is_origin_allowed;

/// Largest WebSocket message accepted from a client. Chat content is capped
/// far below this; the limit only bounds what the reader will buffer.
///
/// A larger frame fails the read itself, so the connection is dropped
/// without an error frame. Oversized content below this cap is answered
/// with an error frame and the connection stays open.
const MAX_MESSAGE_BYTES: usize = 16 * 1024;

#[derive(Debug, Deserialize)]
pub struct UpgradeParams {
    pub token: Option<String>,
}

/// `GET /ws/channels/{channel_id}`
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Query(params): Query<UpgradeParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !is_origin_allowed(origin, &state.allowed_origins) {
        debug!("rejected upgrade from origin {:?}", origin);
        return Err(ApiError::OriginNotAllowed);
    }

    let token = request_token(params.token.as_deref(), &headers).ok_or(ApiError::Unauthorized)?;
    let user = verify_token(&state.jwt_secret, token)?.identity();

    let channel_id = channel_id.trim();
    if channel_id.is_empty() {
        return Err(ApiError::BadRequest("channel id is required".into()));
    }
    let channel_id = ChannelId::from(channel_id);

    let registry = state.registry.clone();
    let check = registry.gate().may_join(user.user_id, &channel_id);
    match tokio::time::timeout(registry.config().collaborator_timeout, check).await {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => {
            debug!("{} ({}) may not join #{}", user.username, user.user_id, channel_id);
            return Err(ApiError::Forbidden);
        }
        Ok(Err(e)) => {
            warn!("join check for #{} failed: {}", channel_id, e);
            return Err(ApiError::Unavailable);
        }
        Err(_) => {
            warn!("join check for #{} timed out", channel_id);
            return Err(ApiError::Unavailable);
        }
    }

    Ok(ws
        .max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| serve_connection(socket, registry, channel_id, user)))
}
