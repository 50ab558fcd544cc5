//! Client frame decoding
//!
//! The `type` tag is checked before the full decode so an unknown type gets
//! its own error rather than a generic serde message.

use clipper_types::events::{ClientFrame, MAX_CONTENT_CHARS};

use crate::error::ProtocolError;

pub fn decode_client_frame(raw: &str) -> Result<ClientFrame, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ProtocolError::Malformed("missing \"type\" field".into()))?;

    if !ClientFrame::TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Chat content must be non-blank and at most `MAX_CONTENT_CHARS` characters.
pub fn validate_content(content: &str) -> Result<(), ProtocolError> {
    if content.trim().is_empty() {
        return Err(ProtocolError::EmptyContent);
    }

    let chars = content.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(ProtocolError::ContentTooLong { chars });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_known_frames() {
        assert_eq!(
            decode_client_frame(r#"{"type":"message","content":"hi"}"#),
            Ok(ClientFrame::Message { content: "hi".into() })
        );
        assert_eq!(decode_client_frame(r#"{"type":"typing"}"#), Ok(ClientFrame::Typing));
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            decode_client_frame(r#"{"type":"reaction","emoji":"+1"}"#),
            Err(ProtocolError::UnknownType("reaction".into()))
        );
        assert_eq!(
            ProtocolError::UnknownType("reaction".into()).to_string(),
            "Unknown message type: reaction"
        );
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(decode_client_frame("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode_client_frame(r#"{"content":"hi"}"#), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode_client_frame(r#"{"type":7}"#), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode_client_frame(r#"{"type":"message"}"#), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_content_limits() {
        assert_eq!(validate_content("hello"), Ok(()));
        assert_eq!(validate_content(""), Err(ProtocolError::EmptyContent));
        assert_eq!(validate_content("   \n"), Err(ProtocolError::EmptyContent));

        assert_eq!(validate_content(&"a".repeat(500)), Ok(()));
        assert_eq!(
            validate_content(&"a".repeat(501)),
            Err(ProtocolError::ContentTooLong { chars: 501 })
        );
    }

    #[test]
    fn test_limit_counts_characters_not_bytes() {
        // 500 four-byte characters is 2000 bytes but still within the limit
        assert_eq!(validate_content(&"🦀".repeat(500)), Ok(()));
        assert!(validate_content(&"é".repeat(501)).is_err());
    }
}
