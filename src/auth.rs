//! Access-token issuance and verification (C2: Token Service, stateless half).
//!
//! Registration and refresh tokens are durable rows (see `models::token`);
//! access tokens are signed claims, never persisted, grounded on the
//! teacher's `handlers::auth::{Claims, generate_jwt}` pattern.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Agent ID this token speaks for.
    pub agent: String,
    pub iat: usize,
    pub exp: usize,
}

/// IssueAccessToken(agent): signed claims {agent, iat, exp=iat+24h}.
pub fn issue_access_token(agent_id: Uuid, secret: &str, ttl: std::time::Duration) -> Result<String, AppError> {
    let now = Utc::now();
    let exp = now + Duration::from_std(ttl).unwrap_or(Duration::hours(24));

    let claims = Claims {
        agent: agent_id.to_string(),
        iat: now.timestamp() as usize,
        exp: exp.timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Validates signature + expiry and extracts the embedded agent identifier.
pub fn verify_access_token(token: &str, secret: &str) -> Result<Uuid, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthenticated("invalid or expired access token".to_string()))?;

    Uuid::parse_str(&data.claims.agent).map_err(|_| AppError::Unauthenticated("malformed token subject".to_string()))
}
