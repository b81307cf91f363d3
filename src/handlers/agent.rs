//! Agent-facing endpoints: registration, token renewal, update ingest,
//! execution-log ingest (which drives the command cascade), dependency
//! reports, and opaque system-info merge.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine;
use crate::middleware::auth::AgentContext;
use crate::models::agent::{is_version_older, Agent, RegisterAgentRequest};
use crate::models::command::ReportOutcome;
use crate::models::token::{RefreshToken, RegistrationToken};
use crate::models::update::{DiscoveredUpdate, ExecutionLogEntry, UpdateLog};
use crate::{auth, AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub registration_token: String,
    pub hostname: String,
    pub os_type: String,
    pub os_version: String,
    pub os_arch: String,
    #[serde(default)]
    pub agent_version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub agent_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
}

/// Register(registration_secret, agent_identity): redeems the
/// registration token atomically, creates the agent row, and issues the
/// initial access + refresh token pair.
pub async fn register(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> AppResult<Json<RegisterResponse>> {
    let token = RegistrationToken::try_redeem(&state.pool, &req.registration_token)
        .await?
        .ok_or_else(|| AppError::PermissionDenied("registration token is exhausted, revoked, or expired".to_string()))?;

    let agent = Agent::register(
        &state.pool,
        &RegisterAgentRequest {
            hostname: req.hostname,
            os_type: req.os_type,
            os_version: req.os_version,
            os_arch: req.os_arch,
            agent_version: req.agent_version,
        },
    )
    .await?;

    let access_token = auth::issue_access_token(agent.id, &state.config.access_token_secret, state.config.access_token_ttl)?;
    let refresh_token = RefreshToken::issue(&state.pool, agent.id, state.config.refresh_token_ttl).await?;

    tracing::info!(agent_id = %agent.id, token_label = %token.label, "agent registered");

    Ok(Json(RegisterResponse { agent_id: agent.id, access_token, refresh_token }))
}

#[derive(Debug, Deserialize)]
pub struct RenewRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RenewResponse {
    pub access_token: String,
}

/// RenewAccess(refresh_secret): resolves the owning agent from the
/// secret, slides the refresh window, and mints a fresh access token.
/// The agent identifier is preserved — this never spawns a new agent row.
pub async fn renew(State(state): State<AppState>, Json(req): Json<RenewRequest>) -> AppResult<Json<RenewResponse>> {
    let agent_id = RefreshToken::find_agent_by_secret(&state.pool, &req.refresh_token)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("invalid or expired refresh token".to_string()))?;

    let renewed = RefreshToken::renew(&state.pool, agent_id, &req.refresh_token, state.config.refresh_token_ttl).await?;
    if !renewed {
        return Err(AppError::Unauthenticated("invalid or expired refresh token".to_string()));
    }

    let access_token = auth::issue_access_token(agent_id, &state.config.access_token_secret, state.config.access_token_ttl)?;

    Ok(Json(RenewResponse { access_token }))
}

#[derive(Debug, Deserialize)]
pub struct UpdatesIngestRequest {
    pub updates: Vec<DiscoveredUpdate>,
}

#[derive(Debug, Serialize)]
pub struct UpdatesIngestResponse {
    pub accepted: usize,
    pub skipped: usize,
}

/// Ingests a batch of discovered-update events. Each event applies in
/// its own transaction (§4.1: per-row error isolation) — one malformed
/// row is logged and skipped, never aborts the batch.
pub async fn ingest_updates(
    State(state): State<AppState>,
    ctx: AgentContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatesIngestRequest>,
) -> AppResult<Json<UpdatesIngestResponse>> {
    ctx.require_owner(id)?;
    Agent::update_last_seen(&state.pool, id).await?;

    let mut accepted = 0;
    let mut skipped = 0;

    for update in &req.updates {
        match state.pool.begin().await {
            Ok(mut tx) => match crate::models::update::apply_discovery(&mut tx, id, update).await {
                Ok(()) => match tx.commit().await {
                    Ok(()) => accepted += 1,
                    Err(e) => {
                        tracing::warn!("updates ingest: commit failed for {}/{}: {}", update.package_type, update.package_name, e);
                        skipped += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!("updates ingest: skipping {}/{}: {}", update.package_type, update.package_name, e);
                    skipped += 1;
                }
            },
            Err(e) => {
                tracing::error!("updates ingest: failed to open transaction: {}", e);
                skipped += 1;
            }
        }
    }

    Ok(Json(UpdatesIngestResponse { accepted, skipped }))
}

#[derive(Debug, Deserialize)]
pub struct LogIngestRequest {
    #[serde(default)]
    pub command_id: Option<Uuid>,
    #[serde(default)]
    pub outcome: Option<ReportOutcome>,
    pub action: String,
    pub result: String,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// Ingests one execution-log entry and, when the entry references a
/// command with a reported outcome, drives the Report(agent, command,
/// outcome) transition and cascade (§4.4).
pub async fn ingest_log(
    State(state): State<AppState>,
    ctx: AgentContext,
    Path(id): Path<Uuid>,
    Json(req): Json<LogIngestRequest>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.require_owner(id)?;
    Agent::update_last_seen(&state.pool, id).await?;

    if let (Some(command_id), Some(outcome)) = (req.command_id, req.outcome.clone()) {
        engine::commands::report(
            &state.pool,
            id,
            command_id,
            outcome,
            serde_json::json!({"stdout": req.stdout, "stderr": req.stderr, "exit_code": req.exit_code}),
        )
        .await?;
    }

    let entry = ExecutionLogEntry {
        command_id: req.command_id,
        action: req.action,
        result: req.result,
        stdout: req.stdout,
        stderr: req.stderr,
        exit_code: req.exit_code,
        duration_seconds: req.duration_seconds,
    };
    UpdateLog::append(&state.pool, id, &entry).await?;

    Ok(Json(serde_json::json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct DependencyReportRequest {
    pub package_type: String,
    pub package_name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Dep-report handler (§4.5): empty list auto-advances to installing,
/// non-empty parks the package at pending_dependencies.
pub async fn dependencies(
    State(state): State<AppState>,
    ctx: AgentContext,
    Path(id): Path<Uuid>,
    Json(req): Json<DependencyReportRequest>,
) -> AppResult<Json<crate::models::update::UpdateState>> {
    ctx.require_owner(id)?;
    Agent::update_last_seen(&state.pool, id).await?;

    let state_row = engine::updates::dependency_report(&state.pool, id, &req.package_type, &req.package_name, req.dependencies).await?;
    Ok(Json(state_row))
}

/// Merges a detailed system descriptor into the agent's metadata bag.
/// Treated as opaque: no schema coupling to the payload shape.
pub async fn system_info(
    State(state): State<AppState>,
    ctx: AgentContext,
    Path(id): Path<Uuid>,
    Json(body): Json<serde_json::Value>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.require_owner(id)?;
    Agent::update_last_seen(&state.pool, id).await?;

    let merged = Agent::merge_metadata(&state.pool, id, &serde_json::json!({"system_info": body})).await?;
    Ok(Json(merged))
}

/// Derives and persists `update_available` from a freshly reported
/// agent build, using the semantic-version ordering of §4.3.
pub async fn apply_version_report(state: &AppState, id: Uuid, reported_version: &str) -> AppResult<()> {
    let update_available = is_version_older(reported_version, &state.config.latest_known_agent_version);
    Agent::update_version(&state.pool, id, reported_version, update_available).await?;
    Ok(())
}
