//! Operator-facing agent endpoints: listing/detail/delete plus the
//! ad-hoc scan/update/heartbeat command triggers.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::agent::Agent;
use crate::models::command::{Command, CommandType};
use crate::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// An `Agent` row plus derived liveness (§3: `online` is computed, never
/// stored), so operators don't have to recompute it client-side.
#[derive(Debug, Serialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub online: bool,
}

impl AgentView {
    fn new(agent: Agent, offline_threshold: std::time::Duration) -> Self {
        let online = agent.is_online(offline_threshold, Utc::now());
        Self { agent, online }
    }
}

#[derive(Debug, Serialize)]
pub struct AgentListResponse {
    pub agents: Vec<AgentView>,
    /// CountActive (§4.3): agents with `last_seen` inside the liveness
    /// threshold, over the whole fleet rather than just this page.
    pub active_count: i64,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> AppResult<Json<AgentListResponse>> {
    let agents = Agent::list(&state.pool, q.limit).await?;
    let active_count = Agent::count_active(&state.pool, state.config.offline_threshold.as_secs() as i64).await?;
    let agents = agents.into_iter().map(|a| AgentView::new(a, state.config.offline_threshold)).collect();
    Ok(Json(AgentListResponse { agents, active_count }))
}

pub async fn detail(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<AgentView>> {
    let agent = Agent::find_by_id(&state.pool, id).await?.ok_or_else(|| AppError::NotFound("agent not found".to_string()))?;
    Ok(Json(AgentView::new(agent, state.config.offline_threshold)))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<serde_json::Value>> {
    let deleted = Agent::delete(&state.pool, id).await?;
    if !deleted {
        return Err(AppError::NotFound("agent not found".to_string()));
    }
    Ok(Json(serde_json::json!({"deleted": true})))
}

pub async fn scan(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Command>> {
    Agent::find_by_id(&state.pool, id).await?.ok_or_else(|| AppError::NotFound("agent not found".to_string()))?;
    let command = Command::enqueue(&state.pool, id, CommandType::ScanUpdates, serde_json::json!({})).await?;
    Ok(Json(command))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub package_type: String,
    #[serde(default)]
    pub package_name: Option<String>,
}

/// Ad-hoc install, independent of the approval-gated flow under
/// `/updates`: an operator may push `install_updates` directly, with an
/// absent `package_name` meaning "upgrade everything of this type".
pub async fn update(State(state): State<AppState>, Path(id): Path<Uuid>, Json(req): Json<UpdateRequest>) -> AppResult<Json<Command>> {
    Agent::find_by_id(&state.pool, id).await?.ok_or_else(|| AppError::NotFound("agent not found".to_string()))?;
    let command = Command::enqueue(
        &state.pool,
        id,
        CommandType::InstallUpdates,
        serde_json::json!({"package_type": req.package_type, "package_name": req.package_name}),
    )
    .await?;
    Ok(Json(command))
}

#[derive(Debug, Deserialize, Validate)]
pub struct HeartbeatRequest {
    #[validate(range(min = 1, max = 60))]
    pub duration_minutes: u32,
}

pub async fn heartbeat(State(state): State<AppState>, Path(id): Path<Uuid>, Json(req): Json<HeartbeatRequest>) -> AppResult<Json<Command>> {
    req.validate()?;
    Agent::find_by_id(&state.pool, id).await?.ok_or_else(|| AppError::NotFound("agent not found".to_string()))?;
    let command = Command::enqueue(
        &state.pool,
        id,
        CommandType::EnableHeartbeat,
        serde_json::json!({"duration_minutes": req.duration_minutes}),
    )
    .await?;
    Ok(Json(command))
}
