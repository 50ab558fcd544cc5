use thiserror::Error;

use clipper_types::events::MAX_CONTENT_CHARS;

/// Why a hub refused a registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("channel is full ({max} participants)")]
    ChannelFull { max: usize },

    #[error("channel is shutting down")]
    Draining,

    #[error("channel hub is closed")]
    Closed,
}

/// Malformed or invalid client frames. The connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Message content cannot be empty")]
    EmptyContent,

    #[error("Message content exceeds maximum size of {MAX_CONTENT_CHARS} characters")]
    ContentTooLong { chars: usize },

    #[error("binary frames are not supported")]
    BinaryFrame,
}

/// Every reason an inbound frame can be refused, as reported to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("not authorized to post in this channel")]
    NotAuthorized,
}

impl Rejection {
    /// Metrics label for this rejection.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(ProtocolError::Malformed(_)) => "malformed_frame",
            Self::Protocol(ProtocolError::UnknownType(_)) => "unknown_type",
            Self::Protocol(ProtocolError::EmptyContent) => "empty_message",
            Self::Protocol(ProtocolError::ContentTooLong { .. }) => "message_too_long",
            Self::Protocol(ProtocolError::BinaryFrame) => "binary_frame",
            Self::RateLimited => "rate_limited",
            Self::NotAuthorized => "not_authorized",
        }
    }
}
