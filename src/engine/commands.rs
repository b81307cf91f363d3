//! C4 Command Engine cascades.

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::command::{Command, CommandStatus, CommandType, ReportOutcome};
use crate::models::update::UpdateLog;

/// Params shape shared by the package-referencing command types
/// (`dry_run_update`, `confirm_dependencies`) and consulted by the
/// timeout sweep.
#[derive(Debug, serde::Deserialize)]
struct PackageRef {
    package_type: Option<String>,
    package_name: Option<String>,
}

/// Report(agent, command_id, outcome): terminal transition + cascades.
/// Mismatch between `agent_id` and the command's owner is `PermissionDenied`.
/// A terminal->anything transition is `FailedPrecondition`.
pub async fn report(
    pool: &PgPool,
    agent_id: Uuid,
    command_id: Uuid,
    outcome: ReportOutcome,
    result: serde_json::Value,
) -> AppResult<Command> {
    let command = Command::find_by_id(pool, command_id)
        .await?
        .ok_or_else(|| AppError::NotFound("command not found".to_string()))?;

    if command.agent_id != agent_id {
        return Err(AppError::PermissionDenied("command does not belong to this agent".to_string()));
    }

    if command.status().is_terminal() {
        return Err(AppError::FailedPrecondition("command is already in a terminal state".to_string()));
    }

    let mut tx = pool.begin().await?;

    let new_status = outcome.terminal_status();

    let updated = match new_status {
        Some(status) => {
            sqlx::query_as::<_, Command>(
                "UPDATE commands SET status = $2, result = $3, completed_at = NOW() WHERE id = $1 RETURNING *",
            )
            .bind(command_id)
            .bind(status.as_str())
            .bind(&result)
            .fetch_one(&mut *tx)
            .await?
        }
        None => {
            sqlx::query_as::<_, Command>("UPDATE commands SET result = $2 WHERE id = $1 RETURNING *")
                .bind(command_id)
                .bind(&result)
                .fetch_one(&mut *tx)
                .await?
        }
    };

    // Result-driven cascade: a successful confirm_dependencies advances
    // the referenced package to `updated`, atomic with the command update.
    if new_status == Some(CommandStatus::Completed) && command.command_type == CommandType::ConfirmDependencies.as_str() {
        if let Ok(reference) = serde_json::from_value::<PackageRef>(command.params.clone()) {
            if let (Some(package_type), Some(package_name)) = (reference.package_type, reference.package_name) {
                sqlx::query(
                    r#"
                    UPDATE update_state
                    SET status = 'updated', installed_at = NOW(), last_updated_at = NOW()
                    WHERE agent_id = $1 AND package_type = $2 AND package_name = $3
                    "#,
                )
                .bind(agent_id)
                .bind(&package_type)
                .bind(&package_name)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO update_events (agent_id, package_type, package_name, event_type)
                    VALUES ($1, $2, $3, 'installed')
                    "#,
                )
                .bind(agent_id)
                .bind(&package_type)
                .bind(&package_name)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    if new_status == Some(CommandStatus::Failed) {
        if let Ok(reference) = serde_json::from_value::<PackageRef>(command.params.clone()) {
            if let (Some(package_type), Some(package_name)) = (reference.package_type, reference.package_name) {
                transition_package_failed(&mut tx, agent_id, &package_type, &package_name, &json!({"reason": "command_failed"})).await?;
            }
        }
    }

    tx.commit().await?;
    Ok(updated)
}

/// Retry(command_id): factory, not a transition. Reference must be
/// terminal-non-success.
pub async fn retry(pool: &PgPool, command_id: Uuid) -> AppResult<Command> {
    let reference = Command::find_by_id(pool, command_id)
        .await?
        .ok_or_else(|| AppError::NotFound("command not found".to_string()))?;

    let status = reference.status();
    if !status.is_terminal() || status == CommandStatus::Completed {
        return Err(AppError::FailedPrecondition(
            "only terminal, non-success commands may be retried".to_string(),
        ));
    }

    Ok(Command::retry(pool, &reference).await?)
}

pub async fn cancel(pool: &PgPool, command_id: Uuid) -> AppResult<()> {
    let cancelled = Command::cancel(pool, command_id).await?;
    if !cancelled {
        return Err(AppError::FailedPrecondition(
            "command is not pending or sent".to_string(),
        ));
    }
    Ok(())
}

/// SweepTimeouts(): runs on a 5-minute period. Each `sent` command whose
/// deadline has passed transitions to `timed_out`, with a log row and,
/// if it references a package, a cascade to UpdateState::failed. One bad
/// row is logged and skipped, not allowed to kill the sweep.
pub async fn sweep_timeouts(pool: &PgPool, timeout: std::time::Duration) -> usize {
    let candidates = match Command::list_sweep_candidates(pool, timeout.as_secs() as i64).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("timeout sweep: failed to list candidates: {}", e);
            return 0;
        }
    };

    let mut swept = 0;
    for command in candidates {
        if let Err(e) = sweep_one(pool, &command).await {
            tracing::warn!("timeout sweep: command {} failed to sweep: {}", command.id, e);
            continue;
        }
        swept += 1;
    }
    swept
}

async fn sweep_one(pool: &PgPool, command: &Command) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let result = json!({"reason": "timeout", "timed_out_at": Utc::now()});
    sqlx::query(
        "UPDATE commands SET status = 'timed_out', result = $2, completed_at = NOW() WHERE id = $1 AND status = 'sent'",
    )
    .bind(command.id)
    .bind(&result)
    .execute(&mut *tx)
    .await?;

    UpdateLog::append_in_tx(&mut tx, command.agent_id, Some(command.id), "command_timeout", "timed_out").await?;

    if let Ok(reference) = serde_json::from_value::<PackageRef>(command.params.clone()) {
        if let (Some(package_type), Some(package_name)) = (reference.package_type, reference.package_name) {
            transition_package_failed(&mut tx, command.agent_id, &package_type, &package_name, &json!({"reason": "timeout"})).await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn transition_package_failed(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    agent_id: Uuid,
    package_type: &str,
    package_name: &str,
    metadata: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE update_state
        SET status = 'failed', last_updated_at = NOW(), metadata = metadata || $4
        WHERE agent_id = $1 AND package_type = $2 AND package_name = $3
        "#,
    )
    .bind(agent_id)
    .bind(package_type)
    .bind(package_name)
    .bind(metadata)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO update_events (agent_id, package_type, package_name, event_type, metadata) VALUES ($1, $2, $3, 'failed', $4)",
    )
    .bind(agent_id)
    .bind(package_type)
    .bind(package_name)
    .bind(metadata)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn clear_archived(pool: &PgPool, age_days: i64, mode: &str) -> AppResult<u64> {
    Ok(Command::clear_archived(pool, age_days, mode).await?)
}

/// Used by the stale-heartbeat detector (§4.6): inserts the audit-only
/// `disable_heartbeat` command, already `completed`.
pub async fn insert_audit_disable_heartbeat(pool: &PgPool, agent_id: Uuid) -> AppResult<Command> {
    Ok(Command::insert_audit_completed(
        pool,
        agent_id,
        CommandType::DisableHeartbeat,
        json!({}),
        json!({"reason": "stale_heartbeat_detected"}),
    )
    .await?)
}
