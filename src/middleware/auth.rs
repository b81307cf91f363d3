//! Authentication middleware (C8 HTTP Boundary): agent access-token
//! verification and the operator-auth stand-in.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{auth, AppError, AppState};

/// Agent identity extracted from a verified access token. Handlers that
/// take a path-embedded agent ID are responsible for comparing it
/// against `agent_id` themselves (spec §4.8: mismatch -> 403) — the
/// route param name varies per endpoint, so there is no one generic
/// place in the middleware to enforce it.
#[derive(Debug, Clone, Copy)]
pub struct AgentContext {
    pub agent_id: Uuid,
}

impl AgentContext {
    pub fn require_owner(&self, path_agent_id: Uuid) -> Result<(), AppError> {
        if self.agent_id != path_agent_id {
            return Err(AppError::PermissionDenied("access token does not match the requested agent".to_string()));
        }
        Ok(())
    }
}

pub async fn require_agent_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, AppError> {
    let token = extract_bearer_token(&req)?;
    let agent_id = auth::verify_access_token(&token, &state.config.access_token_secret)?;

    req.extensions_mut().insert(AgentContext { agent_id });

    Ok(next.run(req).await)
}

/// Operator identity. The real operator-auth subsystem is out of scope
/// (spec §1); this is a shared-secret stand-in that exists so the
/// `require_operator_auth` boundary is real and swappable later without
/// touching any handler signature.
#[derive(Debug, Clone, Copy)]
pub struct OperatorContext;

pub async fn require_operator_auth(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    let presented = req
        .headers()
        .get("X-Operator-Token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthenticated("missing operator token".to_string()))?;

    if presented != state.config.operator_shared_secret {
        return Err(AppError::Unauthenticated("invalid operator token".to_string()));
    }

    Ok(next.run(req).await)
}

fn extract_bearer_token(req: &Request) -> Result<String, AppError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthenticated("missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Unauthenticated("malformed authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| AppError::Unauthenticated("expected a bearer token".to_string()))
}

/// Best-effort client IP, used as the rate-limiter key for categories
/// that aren't keyed by agent identity.
pub fn client_ip(req: &Request) -> String {
    req.headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AgentContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AgentContext>()
            .copied()
            .ok_or_else(|| AppError::Unauthenticated("missing agent context".to_string()))
    }
}
