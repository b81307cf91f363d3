//! C6 Poll Endpoint: the agent's primary channel. Implements the
//! 8-step handler of spec §4.6, including the stale-heartbeat detector.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine;
use crate::middleware::auth::AgentContext;
use crate::models::agent::Agent;
use crate::models::command::Command;
use crate::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize, Default)]
struct PollRequest {
    #[serde(default)]
    reported_version: Option<String>,
    #[serde(default)]
    metrics: Option<serde_json::Value>,
    #[serde(default)]
    heartbeat: Option<HeartbeatEcho>,
}

#[derive(Debug, Deserialize)]
struct HeartbeatEcho {
    rapid_polling_enabled: bool,
    rapid_polling_until: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RapidPollDirective {
    pub enabled: bool,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub commands: Vec<Command>,
    pub rapid_poll: Option<RapidPollDirective>,
}

/// The body is strictly optional but, per the decided Open Question
/// (spec §9), must be well-formed JSON when present: an empty body is
/// treated as "no payload", a non-empty-but-malformed body is a 400.
fn parse_body(bytes: &Bytes) -> AppResult<PollRequest> {
    if bytes.is_empty() {
        return Ok(PollRequest::default());
    }
    serde_json::from_slice(bytes).map_err(|e| AppError::InvalidArgument(format!("malformed poll body: {e}")))
}

pub async fn poll(
    State(state): State<AppState>,
    ctx: AgentContext,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> AppResult<Json<PollResponse>> {
    ctx.require_owner(id)?;
    let req = parse_body(&body)?;

    let agent = Agent::find_by_id(&state.pool, id).await?.ok_or_else(|| AppError::NotFound("agent not found".to_string()))?;

    // Step 2: version-availability derivation.
    if let Some(reported_version) = &req.reported_version {
        super::agent::apply_version_report(&state, id, reported_version).await?;
    }

    // Step 3: merge metrics, stamp metrics_updated_at.
    if let Some(metrics) = &req.metrics {
        Agent::merge_metadata(
            &state.pool,
            id,
            &serde_json::json!({"metrics": metrics, "metrics_updated_at": Utc::now()}),
        )
        .await?;
    }

    // Snapshot the heartbeat state as it stood before this request so
    // step 8's stale check isn't looking at writes this same poll made.
    let (stored_enabled, stored_until) = agent.rapid_poll_state();

    let now = Utc::now();

    // Step 5.
    Agent::update_last_seen(&state.pool, id).await?;

    // Step 6: deliver pending commands in FIFO order.
    let commands = Command::poll_for(&state.pool, id).await?;

    // Step 8: heartbeat echo vs. stale-heartbeat detection, performed
    // only after commands are fetched. Clearance and the command fetch
    // above are separate statements, never combined into one rewrite of
    // the active bit, so a stale flag never reflects fresher state than
    // what this poll actually delivered.
    let mut stale_detected = false;
    match &req.heartbeat {
        Some(echo) => {
            Agent::merge_metadata(
                &state.pool,
                id,
                &serde_json::json!({
                    "rapid_polling_enabled": echo.rapid_polling_enabled,
                    "rapid_polling_until": echo.rapid_polling_until,
                }),
            )
            .await?;
        }
        None => {
            let server_believes_active = stored_enabled && stored_until.map(|until| now < until).unwrap_or(false);
            if server_believes_active {
                stale_detected = true;
                Agent::merge_metadata(
                    &state.pool,
                    id,
                    &serde_json::json!({"rapid_polling_enabled": false, "rapid_polling_until": serde_json::Value::Null}),
                )
                .await?;
                engine::commands::insert_audit_disable_heartbeat(&state.pool, id).await?;
                tracing::info!(agent_id = %id, "stale heartbeat detected, cleared server-side rapid-poll state");
            }
        }
    }

    // Step 7: rapid-poll directive, suppressed entirely when this
    // request triggered stale-heartbeat clearance.
    let rapid_poll = if stale_detected {
        None
    } else if !commands.is_empty() {
        Some(RapidPollDirective { enabled: true, until: Some(now + chrono::Duration::from_std(state.config.rapid_poll_window).unwrap_or_default()) })
    } else if let (true, Some(until)) = (
        req.heartbeat.as_ref().map(|h| h.rapid_polling_enabled).unwrap_or(stored_enabled),
        req.heartbeat.as_ref().map(|h| h.rapid_polling_until).or(stored_until),
    ) {
        if now < until {
            Some(RapidPollDirective { enabled: true, until: Some(until) })
        } else {
            None
        }
    } else {
        None
    };

    Ok(Json(PollResponse { commands, rapid_poll }))
}
