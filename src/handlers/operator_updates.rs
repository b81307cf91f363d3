//! Operator-facing update-state endpoints: list/detail, approve,
//! bulk-approve, reject, install, dependency confirmation, logs.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine;
use crate::models::update::{UpdateLog, UpdateState};
use crate::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> AppResult<Json<Vec<UpdateState>>> {
    Ok(Json(UpdateState::list(&state.pool, q.status.as_deref(), q.limit).await?))
}

#[derive(Debug, Deserialize)]
pub struct PackageKey {
    pub agent_id: Uuid,
    pub package_type: String,
    pub package_name: String,
}

pub async fn detail(State(state): State<AppState>, Query(key): Query<PackageKey>) -> AppResult<Json<UpdateState>> {
    let state_row = UpdateState::find(&state.pool, key.agent_id, &key.package_type, &key.package_name)
        .await?
        .ok_or_else(|| AppError::NotFound("update not found".to_string()))?;
    Ok(Json(state_row))
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub agent_id: Uuid,
    pub package_type: String,
    pub package_name: String,
    #[serde(default)]
    pub approver: Option<String>,
}

pub async fn approve(State(state): State<AppState>, Json(req): Json<ApproveRequest>) -> AppResult<Json<UpdateState>> {
    let updated = engine::updates::approve(&state.pool, req.agent_id, &req.package_type, &req.package_name, req.approver.as_deref()).await?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct BulkApproveRequest {
    #[serde(default)]
    pub agent_id: Option<Uuid>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub approver: Option<String>,
}

pub async fn bulk_approve(State(state): State<AppState>, Json(req): Json<BulkApproveRequest>) -> AppResult<Json<serde_json::Value>> {
    let count = engine::updates::bulk_approve(&state.pool, req.agent_id, req.severity.as_deref(), req.approver.as_deref()).await?;
    Ok(Json(serde_json::json!({"approved": count})))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub agent_id: Uuid,
    pub package_type: String,
    pub package_name: String,
}

pub async fn reject(State(state): State<AppState>, Json(req): Json<RejectRequest>) -> AppResult<Json<UpdateState>> {
    let updated = engine::updates::reject(&state.pool, req.agent_id, &req.package_type, &req.package_name).await?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    pub agent_id: Uuid,
    pub package_type: String,
    pub package_name: String,
}

pub async fn install(State(state): State<AppState>, Json(req): Json<InstallRequest>) -> AppResult<Json<UpdateState>> {
    let updated =
        engine::updates::install_request(&state.pool, req.agent_id, &req.package_type, &req.package_name, state.config.rapid_poll_window).await?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmDepsRequest {
    pub agent_id: Uuid,
    pub package_type: String,
    pub package_name: String,
}

pub async fn confirm_deps(State(state): State<AppState>, Json(req): Json<ConfirmDepsRequest>) -> AppResult<Json<UpdateState>> {
    let updated = engine::updates::confirm_dependencies(&state.pool, req.agent_id, &req.package_type, &req.package_name).await?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub agent_id: Uuid,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

pub async fn logs(State(state): State<AppState>, Query(q): Query<LogsQuery>) -> AppResult<Json<Vec<UpdateLog>>> {
    Ok(Json(UpdateLog::list_by_agent(&state.pool, q.agent_id, q.limit).await?))
}
