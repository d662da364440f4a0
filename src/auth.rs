//! The bearer-token authenticator described only by its interface in §6:
//! `GenerateToken(name, id) -> token`, `VerifyToken(req) -> token | Err`,
//! `GetUserFromToken(token) -> (name, id)`.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

const TOKEN_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    name: String,
    exp: i64,
    iat: i64,
}

pub fn generate_token(secret: &str, name: &str, id: i64) -> CoreResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: id,
        name: name.to_string(),
        exp: (now + Duration::hours(TOKEN_HOURS)).timestamp(),
        iat: now.timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))
}

/// VerifyToken + GetUserFromToken combined: returns (name, id) on success.
pub fn verify_token(secret: &str, token: &str) -> CoreResult<(String, i64)> {
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map_err(|_| CoreError::AuthFailed)?;
    Ok((data.claims.name, data.claims.sub))
}

pub fn extract_bearer_token(headers: &axum::http::HeaderMap) -> CoreResult<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(CoreError::AuthFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_name_and_id() {
        let token = generate_token("secret", "alice", 42).unwrap();
        let (name, id) = verify_token("secret", &token).unwrap();
        assert_eq!(name, "alice");
        assert_eq!(id, 42);
    }

    #[test]
    fn invalid_token_fails_auth() {
        assert!(matches!(verify_token("secret", "garbage"), Err(CoreError::AuthFailed)));
    }

    #[test]
    fn token_signed_with_different_secret_fails_auth() {
        let token = generate_token("secret-a", "bob", 1).unwrap();
        assert!(matches!(verify_token("secret-b", &token), Err(CoreError::AuthFailed)));
    }
}
