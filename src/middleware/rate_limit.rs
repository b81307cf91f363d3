//! C7 admission control wired onto the router as `tower` middleware, one
//! thin wrapper per category so each route group can `.layer()` the one
//! it needs (spec §4.7's six categories).

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

use crate::ratelimit::Category;
use crate::{AppError, AppState};

async fn enforce(state: &AppState, category: Category, req: Request, next: Next) -> Result<Response, AppError> {
    let key = super::auth::client_ip(&req);
    let decision = state.rate_limiter.check(category, &key)?;

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.reset_secs.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
    Ok(response)
}

pub async fn registration(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    enforce(&state, Category::Registration, req, next).await
}

pub async fn checkin(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    enforce(&state, Category::Checkin, req, next).await
}

pub async fn reports(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    enforce(&state, Category::Reports, req, next).await
}

pub async fn admin_token_gen(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    enforce(&state, Category::AdminTokenGen, req, next).await
}

pub async fn admin_ops(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    enforce(&state, Category::AdminOps, req, next).await
}

pub async fn public(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    enforce(&state, Category::Public, req, next).await
}
