//! Operator-facing registration-token endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::token::{IssueRegistrationToken, RegistrationToken};
use crate::{AppError, AppResult, AppState};

/// A `RegistrationToken` row plus derived redeemability, so operators
/// don't have to recompute "not revoked, not expired, seats left" client-side.
#[derive(Debug, Serialize)]
pub struct TokenView {
    #[serde(flatten)]
    pub token: RegistrationToken,
    pub redeemable: bool,
}

impl From<RegistrationToken> for TokenView {
    fn from(token: RegistrationToken) -> Self {
        let redeemable = token.is_redeemable();
        Self { token, redeemable }
    }
}

pub async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<TokenView>>> {
    let tokens = RegistrationToken::list(&state.pool).await?;
    Ok(Json(tokens.into_iter().map(TokenView::from).collect()))
}

pub async fn detail(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<TokenView>> {
    let token = RegistrationToken::get_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("registration token not found".to_string()))?;
    Ok(Json(token.into()))
}

/// IssueRegistrationToken: out-of-range ttl/max_seats is `InvalidArgument`
/// via the `validator` derive; a seat-cap breach is `InvalidArgument` too
/// (spec §4.2 groups both under the same failure kind).
pub async fn create(State(state): State<AppState>, Json(req): Json<IssueRegistrationToken>) -> AppResult<Json<RegistrationToken>> {
    req.validate()?;

    let committed = RegistrationToken::total_active_seats(&state.pool).await?;
    if committed + req.max_seats as i64 > state.config.fleet_seat_cap as i64 {
        return Err(AppError::InvalidArgument("fleet seat cap would be exceeded".to_string()));
    }

    let token = RegistrationToken::issue(&state.pool, &req).await?;
    tracing::info!(token_id = %token.id, label = %token.label, "registration token issued");
    Ok(Json(token))
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn revoke(State(state): State<AppState>, Path(id): Path<Uuid>, Query(req): Query<RevokeRequest>) -> AppResult<Json<serde_json::Value>> {
    let revoked = RegistrationToken::revoke(&state.pool, id, req.reason.as_deref().unwrap_or("revoked by operator")).await?;
    if !revoked {
        return Err(AppError::NotFound("registration token not found".to_string()));
    }
    Ok(Json(serde_json::json!({"revoked": true})))
}
