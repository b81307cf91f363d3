//! C5/C4 cascades: operator actions on update_state that also enqueue or
//! depend on commands. `crate::models::update` only ever touches the
//! event/projection tables; everything here that also touches `commands`
//! belongs in this module instead.

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::agent::Agent;
use crate::models::command::{Command, CommandType};
use crate::models::update::{UpdateState, UpdateStatus};

/// Approve(update): pending -> approved. Anything else is FailedPrecondition.
pub async fn approve(
    pool: &PgPool,
    agent_id: Uuid,
    package_type: &str,
    package_name: &str,
    approver: Option<&str>,
) -> AppResult<UpdateState> {
    let state = find_or_404(pool, agent_id, package_type, package_name).await?;
    if state.status() != UpdateStatus::Pending {
        return Err(AppError::FailedPrecondition("update is not pending approval".to_string()));
    }

    transition(pool, agent_id, package_type, package_name, UpdateStatus::Approved, "approved", approver, None).await
}

/// BulkApprove: approves every currently-pending update, optionally
/// narrowed to one agent or one minimum severity. Rows that raced into a
/// different status between listing and update are silently skipped —
/// bulk operations are best-effort over a snapshot, not transactional
/// across the whole set.
pub async fn bulk_approve(
    pool: &PgPool,
    agent_id: Option<Uuid>,
    severity: Option<&str>,
    approver: Option<&str>,
) -> AppResult<u64> {
    let mut tx = pool.begin().await?;

    let rows = sqlx::query_as::<_, UpdateState>(
        r#"
        SELECT * FROM update_state
        WHERE status = 'pending'
          AND ($1::uuid IS NULL OR agent_id = $1)
          AND ($2::text IS NULL OR severity = $2)
        FOR UPDATE
        "#,
    )
    .bind(agent_id)
    .bind(severity)
    .fetch_all(&mut *tx)
    .await?;

    for row in &rows {
        sqlx::query(
            "UPDATE update_state SET status = 'approved', approver = $4, last_updated_at = NOW() WHERE agent_id = $1 AND package_type = $2 AND package_name = $3",
        )
        .bind(row.agent_id)
        .bind(&row.package_type)
        .bind(&row.package_name)
        .bind(approver)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO update_events (agent_id, package_type, package_name, event_type, metadata) VALUES ($1, $2, $3, 'approved', $4)",
        )
        .bind(row.agent_id)
        .bind(&row.package_type)
        .bind(&row.package_name)
        .bind(json!({"bulk": true}))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len() as u64)
}

/// Reject(update): pending -> rejected. Operator intent; agent never sees it.
pub async fn reject(pool: &PgPool, agent_id: Uuid, package_type: &str, package_name: &str) -> AppResult<UpdateState> {
    let state = find_or_404(pool, agent_id, package_type, package_name).await?;
    if state.status() != UpdateStatus::Pending {
        return Err(AppError::FailedPrecondition("update is not pending approval".to_string()));
    }

    transition(pool, agent_id, package_type, package_name, UpdateStatus::Rejected, "rejected", None, None).await
}

/// InstallRequest(update): `approved` (or a direct `pending` install) ->
/// checking_dependencies. Enqueues a dry_run_update command and
/// (debounced) an enable_heartbeat command so the agent polls fast while
/// the install is in flight.
pub async fn install_request(
    pool: &PgPool,
    agent_id: Uuid,
    package_type: &str,
    package_name: &str,
    rapid_poll_window: std::time::Duration,
) -> AppResult<UpdateState> {
    let state = find_or_404(pool, agent_id, package_type, package_name).await?;
    if !matches!(state.status(), UpdateStatus::Approved | UpdateStatus::Pending) {
        return Err(AppError::FailedPrecondition("update must be pending or approved before an install can be requested".to_string()));
    }

    let updated = transition(pool, agent_id, package_type, package_name, UpdateStatus::CheckingDependencies, "installing", None, None).await?;

    Command::enqueue(
        pool,
        agent_id,
        CommandType::DryRunUpdate,
        json!({"package_type": package_type, "package_name": package_name}),
    )
    .await?;

    enqueue_heartbeat_if_needed(pool, agent_id, rapid_poll_window).await?;

    Ok(updated)
}

/// DependencyReport(update, dependencies): reported by the agent after a
/// dry run. An empty list means nothing blocks the install, so the
/// engine auto-advances straight to `installing`, records the (empty)
/// dependency list, and enqueues a confirm_dependencies command carrying
/// it — the same command type a non-empty list eventually gets via
/// ConfirmDependencies, just without waiting on an operator. A non-empty
/// list parks the update at `pending_dependencies` until an operator
/// calls ConfirmDependencies.
pub async fn dependency_report(
    pool: &PgPool,
    agent_id: Uuid,
    package_type: &str,
    package_name: &str,
    dependencies: Vec<String>,
) -> AppResult<UpdateState> {
    let state = find_or_404(pool, agent_id, package_type, package_name).await?;
    if state.status() != UpdateStatus::CheckingDependencies {
        return Err(AppError::FailedPrecondition("update is not awaiting a dependency report".to_string()));
    }

    if dependencies.is_empty() {
        let updated = transition(
            pool,
            agent_id,
            package_type,
            package_name,
            UpdateStatus::Installing,
            "dep_reported",
            None,
            Some(json!({"dependencies": dependencies})),
        )
        .await?;
        Command::enqueue(
            pool,
            agent_id,
            CommandType::ConfirmDependencies,
            json!({"package_type": package_type, "package_name": package_name, "dependencies": dependencies}),
        )
        .await?;
        Ok(updated)
    } else {
        transition(
            pool,
            agent_id,
            package_type,
            package_name,
            UpdateStatus::PendingDependencies,
            "dep_reported",
            None,
            Some(json!({"dependencies": dependencies})),
        )
        .await
    }
}

/// ConfirmDependencies(update): operator signs off on the dependency list
/// surfaced by DependencyReport. pending_dependencies -> installing, and
/// enqueues the confirm_dependencies command carrying the stored list
/// back down to the agent.
pub async fn confirm_dependencies(pool: &PgPool, agent_id: Uuid, package_type: &str, package_name: &str) -> AppResult<UpdateState> {
    let state = find_or_404(pool, agent_id, package_type, package_name).await?;
    if state.status() != UpdateStatus::PendingDependencies {
        return Err(AppError::FailedPrecondition("update has no pending dependencies to confirm".to_string()));
    }

    let dependencies = state.metadata.get("dependencies").cloned().unwrap_or_else(|| json!([]));

    let updated = transition(pool, agent_id, package_type, package_name, UpdateStatus::Installing, "approved", None, None).await?;

    Command::enqueue(
        pool,
        agent_id,
        CommandType::ConfirmDependencies,
        json!({"package_type": package_type, "package_name": package_name, "dependencies": dependencies}),
    )
    .await?;

    Ok(updated)
}

async fn find_or_404(pool: &PgPool, agent_id: Uuid, package_type: &str, package_name: &str) -> AppResult<UpdateState> {
    UpdateState::find(pool, agent_id, package_type, package_name)
        .await?
        .ok_or_else(|| AppError::NotFound("update not found".to_string()))
}

async fn transition(
    pool: &PgPool,
    agent_id: Uuid,
    package_type: &str,
    package_name: &str,
    status: UpdateStatus,
    event_type: &str,
    approver: Option<&str>,
    metadata_patch: Option<serde_json::Value>,
) -> AppResult<UpdateState> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query_as::<_, UpdateState>(
        r#"
        UPDATE update_state
        SET status = $4,
            approver = COALESCE($5, approver),
            metadata = CASE WHEN $6::jsonb IS NULL THEN metadata ELSE metadata || $6::jsonb END,
            last_updated_at = NOW()
        WHERE agent_id = $1 AND package_type = $2 AND package_name = $3
        RETURNING *
        "#,
    )
    .bind(agent_id)
    .bind(package_type)
    .bind(package_name)
    .bind(status.as_str())
    .bind(approver)
    .bind(&metadata_patch)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO update_events (agent_id, package_type, package_name, event_type) VALUES ($1, $2, $3, $4)",
    )
    .bind(agent_id)
    .bind(package_type)
    .bind(package_name)
    .bind(event_type)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(updated)
}

/// Debounced per §4.5: skipped only when rapid-poll is already active for
/// at least 5 more minutes, not merely when a command is in flight.
async fn enqueue_heartbeat_if_needed(pool: &PgPool, agent_id: Uuid, rapid_poll_window: std::time::Duration) -> AppResult<()> {
    let agent = Agent::find_by_id(pool, agent_id).await?;
    let active_long_enough = agent
        .and_then(|a| a.rapid_poll_remaining(Utc::now()))
        .map(|remaining| remaining >= Duration::minutes(5))
        .unwrap_or(false);

    if !active_long_enough {
        let duration_minutes = (rapid_poll_window.as_secs() / 60).clamp(1, 60) as u32;
        Command::enqueue(pool, agent_id, CommandType::EnableHeartbeat, json!({"duration_minutes": duration_minutes})).await?;
    }

    Ok(())
}
