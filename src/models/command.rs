//! Command model (C4: Command Engine) — the pending/sent/terminal state
//! machine described in spec §4.4. Cross-entity cascades (the
//! confirm_dependencies -> UpdateState::updated rule, the timeout ->
//! UpdateState::failed rule) live in `crate::engine`, not here: this
//! module only knows about the `commands` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    ScanUpdates,
    DryRunUpdate,
    InstallUpdates,
    ConfirmDependencies,
    EnableHeartbeat,
    DisableHeartbeat,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScanUpdates => "scan_updates",
            Self::DryRunUpdate => "dry_run_update",
            Self::InstallUpdates => "install_updates",
            Self::ConfirmDependencies => "confirm_dependencies",
            Self::EnableHeartbeat => "enable_heartbeat",
            Self::DisableHeartbeat => "disable_heartbeat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Sent,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "sent" => Self::Sent,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "timed_out" => Self::TimedOut,
            "cancelled" => Self::Cancelled,
            _ => return None,
        })
    }

    /// Terminal statuses are final: completed, failed, timed_out, cancelled.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Sent)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Command {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub command_type: String,
    pub params: serde_json::Value,
    pub status: String,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Command {
    pub fn status(&self) -> CommandStatus {
        CommandStatus::from_str(&self.status).unwrap_or(CommandStatus::Pending)
    }

    /// Enqueue(agent, type, params) -> inserts a `pending` row.
    pub async fn enqueue(
        pool: &PgPool,
        agent_id: Uuid,
        command_type: CommandType,
        params: serde_json::Value,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO commands (agent_id, command_type, params, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING *
            "#,
        )
        .bind(agent_id)
        .bind(command_type.as_str())
        .bind(&params)
        .fetch_one(pool)
        .await
    }

    /// Audit-only command: begins life already `completed`, never delivered.
    /// Used by the stale-heartbeat detector (§4.6) to record that the
    /// server cleared rapid-poll state unilaterally.
    pub async fn insert_audit_completed(
        pool: &PgPool,
        agent_id: Uuid,
        command_type: CommandType,
        params: serde_json::Value,
        result: serde_json::Value,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO commands (agent_id, command_type, params, status, result, sent_at, completed_at)
            VALUES ($1, $2, $3, 'completed', $4, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(agent_id)
        .bind(command_type.as_str())
        .bind(&params)
        .bind(&result)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM commands WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// PollFor(agent): atomically transitions every `pending` command for
    /// the agent to `sent`, in insertion (FIFO) order, and returns them.
    pub async fn poll_for(pool: &PgPool, agent_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE commands
            SET status = 'sent', sent_at = NOW()
            WHERE agent_id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(agent_id)
        .fetch_all(pool)
        .await
        .map(|mut rows| {
            rows.sort_by_key(|c| c.created_at);
            rows
        })
    }

    /// Cancel: only from pending or sent.
    pub async fn cancel(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE commands SET status = 'cancelled', completed_at = NOW() WHERE id = $1 AND status IN ('pending', 'sent')",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Retry is a factory, not a transition: builds a fresh pending
    /// command with the same type+params as a terminal-non-success one.
    pub async fn retry(pool: &PgPool, reference: &Command) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO commands (agent_id, command_type, params, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING *
            "#,
        )
        .bind(reference.agent_id)
        .bind(&reference.command_type)
        .bind(&reference.params)
        .fetch_one(pool)
        .await
    }

    pub async fn list_active(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM commands WHERE status IN ('pending', 'sent') ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM commands ORDER BY created_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Candidate `sent` commands whose deadline has passed, for the sweeper.
    pub async fn list_sweep_candidates(pool: &PgPool, timeout_secs: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM commands WHERE status = 'sent' AND sent_at < NOW() - make_interval(secs => $1)",
        )
        .bind(timeout_secs as f64)
        .fetch_all(pool)
        .await
    }

    pub async fn mark_timed_out(pool: &PgPool, id: Uuid, result: &serde_json::Value) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE commands SET status = 'timed_out', result = $2, completed_at = NOW() WHERE id = $1 AND status = 'sent'",
        )
        .bind(id)
        .bind(result)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Administrative purge of historical failed commands. Never touches
    /// non-terminal rows.
    pub async fn clear_archived(pool: &PgPool, age_days: i64, mode: &str) -> Result<u64, sqlx::Error> {
        let result = match mode {
            "all_failed" => {
                sqlx::query(
                    "DELETE FROM commands WHERE status = 'failed' AND created_at < NOW() - make_interval(days => $1)",
                )
                .bind(age_days as f64)
                .execute(pool)
                .await?
            }
            "retried_only" => {
                sqlx::query(
                    r#"
                    DELETE FROM commands c
                    WHERE c.status IN ('failed', 'timed_out', 'cancelled')
                      AND c.created_at < NOW() - make_interval(days => $1)
                      AND EXISTS (
                          SELECT 1 FROM commands r
                          WHERE r.agent_id = c.agent_id
                            AND r.command_type = c.command_type
                            AND r.params = c.params
                            AND r.created_at > c.created_at
                      )
                    "#,
                )
                .bind(age_days as f64)
                .execute(pool)
                .await?
            }
            _ => {
                sqlx::query(
                    "DELETE FROM commands WHERE status IN ('failed', 'timed_out', 'cancelled') AND created_at < NOW() - make_interval(days => $1)",
                )
                .bind(age_days as f64)
                .execute(pool)
                .await?
            }
        };
        Ok(result.rows_affected())
    }
}

/// Outcome label an agent reports for a command (§4.4 Report contract).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    Success,
    Completed,
    Failed,
    DryRunFailed,
    #[serde(other)]
    Other,
}

impl ReportOutcome {
    pub fn terminal_status(&self) -> Option<CommandStatus> {
        match self {
            Self::Success | Self::Completed => Some(CommandStatus::Completed),
            Self::Failed | Self::DryRunFailed => Some(CommandStatus::Failed),
            Self::Other => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_and_sent_are_non_terminal() {
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(!CommandStatus::Sent.is_terminal());
        assert!(CommandStatus::Completed.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
        assert!(CommandStatus::TimedOut.is_terminal());
        assert!(CommandStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_str_round_trips() {
        for status in [
            CommandStatus::Pending,
            CommandStatus::Sent,
            CommandStatus::Completed,
            CommandStatus::Failed,
            CommandStatus::TimedOut,
            CommandStatus::Cancelled,
        ] {
            assert_eq!(CommandStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(CommandStatus::from_str("bogus"), None);
    }

    #[test]
    fn outcome_maps_to_the_right_terminal_status() {
        assert_eq!(ReportOutcome::Success.terminal_status(), Some(CommandStatus::Completed));
        assert_eq!(ReportOutcome::Completed.terminal_status(), Some(CommandStatus::Completed));
        assert_eq!(ReportOutcome::Failed.terminal_status(), Some(CommandStatus::Failed));
        assert_eq!(ReportOutcome::DryRunFailed.terminal_status(), Some(CommandStatus::Failed));
        assert_eq!(ReportOutcome::Other.terminal_status(), None);
    }
}
