use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
};
use subtle::ConstantTimeEq;
use tracing::info;

use clipper_types::api::ForceDisconnectRequest;

use crate::AppState;
use crate::error::ApiError;

pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// `POST /internal/moderation/disconnect`
///
/// Closes every connection the user holds on the channel, on every node.
pub async fn force_disconnect(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ForceDisconnectRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Some(expected) = state.internal_token.as_deref() else {
        return Err(ApiError::NotFound);
    };
    let presented = headers
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !tokens_match(presented, expected) {
        return Err(ApiError::Unauthorized);
    }

    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    info!(
        "force disconnect of {} from #{} ({})",
        req.user_id,
        req.channel_id,
        req.reason.as_deref().unwrap_or("no reason")
    );

    state
        .registry
        .force_disconnect(&req.channel_id, req.user_id, req.reason)
        .await?;

    Ok(StatusCode::ACCEPTED)
}

/// Constant-time comparison. Slices of different length never match.
fn tokens_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
