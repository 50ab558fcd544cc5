use axum::http::{HeaderMap, header};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use clipper_types::api::Claims;

use crate::error::ApiError;

/// Token presented on the upgrade request. Browsers cannot set headers on a
/// WebSocket handshake, so the `?token=` query parameter wins over
/// `Authorization: Bearer`.
pub fn request_token<'a>(query: Option<&'a str>, headers: &'a HeaderMap) -> Option<&'a str> {
    if let Some(token) = query.filter(|t| !t.is_empty()) {
        return Some(token);
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validate an HS256 token and return its claims.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?;

    Ok(token_data.claims)
}

/// Sign claims with the shared secret. Tokens are normally issued by the
/// main API; this is for tooling and tests.
pub fn create_token(secret: &str, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use uuid::Uuid;

    fn claims(exp_offset: i64) -> Claims {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        Claims {
            sub: Uuid::new_v4(),
            username: "alice".into(),
            display_name: Some("Alice".into()),
            avatar_url: None,
            exp: (now + exp_offset) as usize,
        }
    }

    #[test]
    fn test_token_round_trip() {
        let claims = claims(3600);
        let token = create_token("secret", &claims).unwrap();

        let decoded = verify_token("secret", &token).unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.identity().display_name(), "Alice");
    }

    #[test]
    fn test_rejects_wrong_secret_and_expired() {
        let token = create_token("secret", &claims(3600)).unwrap();
        assert!(matches!(verify_token("other", &token), Err(ApiError::Unauthorized)));

        let expired = create_token("secret", &claims(-3600)).unwrap();
        assert!(matches!(verify_token("secret", &expired), Err(ApiError::Unauthorized)));

        assert!(matches!(verify_token("secret", "not-a-jwt"), Err(ApiError::Unauthorized)));
    }

    #[test]
    fn test_token_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_token(None, &headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(request_token(None, &headers), Some("abc"));
        assert_eq!(request_token(Some(""), &headers), Some("abc"));
        assert_eq!(request_token(Some("xyz"), &headers), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(request_token(None, &headers), None);
    }
}
