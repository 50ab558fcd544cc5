use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChannelId, UserIdentity};

// -- JWT Claims --

/// JWT claims presented on the WebSocket upgrade. Issued by the main API;
/// the chat gateway only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub exp: usize,
}

impl Claims {
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            user_id: self.sub,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

// -- Health --

/// Connection counts across every channel hub in this process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub total_connections: usize,
    pub active_channels: usize,
    pub channel_stats: BTreeMap<String, usize>,
}

// -- Moderation --

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ForceDisconnectRequest {
    pub channel_id: ChannelId,
    pub user_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}
