//! Update model (C5: Update State Engine) — the event-sourced discovery
//! log plus the materialized per-package projection described in §4.5.
//! Transactional cascades that also touch `commands` live in
//! `crate::engine::updates`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Discovered,
    Approved,
    DepReported,
    Installing,
    Installed,
    Failed,
    Rejected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Approved => "approved",
            Self::DepReported => "dep_reported",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Pending,
    Approved,
    CheckingDependencies,
    PendingDependencies,
    Installing,
    Updated,
    Failed,
    Rejected,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::CheckingDependencies => "checking_dependencies",
            Self::PendingDependencies => "pending_dependencies",
            Self::Installing => "installing",
            Self::Updated => "updated",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "checking_dependencies" => Self::CheckingDependencies,
            "pending_dependencies" => Self::PendingDependencies,
            "installing" => Self::Installing,
            "updated" => Self::Updated,
            "failed" => Self::Failed,
            "rejected" => Self::Rejected,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UpdateEvent {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub package_type: String,
    pub package_name: String,
    pub version_from: Option<String>,
    pub version_to: Option<String>,
    pub severity: Option<String>,
    pub source: Option<String>,
    pub metadata: serde_json::Value,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveredUpdate {
    pub package_type: String,
    pub package_name: String,
    pub version_from: Option<String>,
    pub version_to: String,
    pub severity: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UpdateState {
    pub agent_id: Uuid,
    pub package_type: String,
    pub package_name: String,
    pub current_version: Option<String>,
    pub available_version: Option<String>,
    pub severity: Option<String>,
    pub status: String,
    pub last_discovered_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub approver: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub installed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl UpdateState {
    pub fn status(&self) -> UpdateStatus {
        UpdateStatus::from_str(&self.status).unwrap_or(UpdateStatus::Pending)
    }

    pub async fn find(
        pool: &PgPool,
        agent_id: Uuid,
        package_type: &str,
        package_name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM update_state WHERE agent_id = $1 AND package_type = $2 AND package_name = $3",
        )
        .bind(agent_id)
        .bind(package_type)
        .bind(package_name)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_by_agent(pool: &PgPool, agent_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM update_state WHERE agent_id = $1 ORDER BY last_discovered_at DESC")
            .bind(agent_id)
            .fetch_all(pool)
            .await
    }

    pub async fn list(pool: &PgPool, status: Option<&str>, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        match status {
            Some(status) => {
                sqlx::query_as::<_, Self>(
                    "SELECT * FROM update_state WHERE status = $1 ORDER BY last_discovered_at DESC LIMIT $2",
                )
                .bind(status)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Self>("SELECT * FROM update_state ORDER BY last_discovered_at DESC LIMIT $1")
                    .bind(limit)
                    .fetch_all(pool)
                    .await
            }
        }
    }
}

/// Applies one `discovered` report inside `tx`: appends the event, and
/// upserts the projection per §4.5's discovery rule — a fresh row starts
/// `pending`; an existing row in {pending, rejected} keeps its status;
/// anything else (terminal or in-flight) keeps status but refreshes
/// version/severity/source and `last_discovered_at`. Operator intent
/// survives repeated scans.
pub async fn apply_discovery(
    tx: &mut Transaction<'_, Postgres>,
    agent_id: Uuid,
    update: &DiscoveredUpdate,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO update_events
            (agent_id, package_type, package_name, version_from, version_to, severity, source, metadata, event_type)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'discovered')
        "#,
    )
    .bind(agent_id)
    .bind(&update.package_type)
    .bind(&update.package_name)
    .bind(&update.version_from)
    .bind(&update.version_to)
    .bind(&update.severity)
    .bind(&update.source)
    .bind(update.metadata.clone().unwrap_or_else(|| serde_json::json!({})))
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO update_state
            (agent_id, package_type, package_name, current_version, available_version, severity, status, last_discovered_at, last_updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, 'pending', NOW(), NOW())
        ON CONFLICT (agent_id, package_type, package_name) DO UPDATE SET
            current_version = EXCLUDED.current_version,
            available_version = EXCLUDED.available_version,
            severity = EXCLUDED.severity,
            last_discovered_at = NOW()
        "#,
    )
    .bind(agent_id)
    .bind(&update.package_type)
    .bind(&update.package_name)
    .bind(&update.version_from)
    .bind(&update.version_to)
    .bind(&update.severity)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UpdateLog {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub command_id: Option<Uuid>,
    pub action: String,
    pub result: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub duration_seconds: Option<f64>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionLogEntry {
    pub command_id: Option<Uuid>,
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

impl UpdateLog {
    pub async fn append(pool: &PgPool, agent_id: Uuid, entry: &ExecutionLogEntry) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO update_logs (agent_id, command_id, action, result, stdout, stderr, exit_code, duration_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(agent_id)
        .bind(entry.command_id)
        .bind(&entry.action)
        .bind(&entry.result)
        .bind(&entry.stdout)
        .bind(&entry.stderr)
        .bind(entry.exit_code)
        .bind(entry.duration_seconds)
        .fetch_one(pool)
        .await
    }

    pub async fn append_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        agent_id: Uuid,
        command_id: Option<Uuid>,
        action: &str,
        result: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO update_logs (agent_id, command_id, action, result) VALUES ($1, $2, $3, $4)",
        )
        .bind(agent_id)
        .bind(command_id)
        .bind(action)
        .bind(result)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn list_by_agent(pool: &PgPool, agent_id: Uuid, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM update_logs WHERE agent_id = $1 ORDER BY executed_at DESC LIMIT $2",
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_str_round_trips() {
        for status in [
            UpdateStatus::Pending,
            UpdateStatus::Approved,
            UpdateStatus::CheckingDependencies,
            UpdateStatus::PendingDependencies,
            UpdateStatus::Installing,
            UpdateStatus::Updated,
            UpdateStatus::Failed,
            UpdateStatus::Rejected,
        ] {
            assert_eq!(UpdateStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(UpdateStatus::from_str("bogus"), None);
    }

    #[test]
    fn discovered_update_defaults_missing_optionals() {
        let raw = serde_json::json!({
            "package_type": "apt",
            "package_name": "openssl",
            "version_to": "3.0.2",
            "severity": "high",
        });
        let parsed: DiscoveredUpdate = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.version_from, None);
        assert_eq!(parsed.source, None);
        assert_eq!(parsed.metadata, None);
    }
}
