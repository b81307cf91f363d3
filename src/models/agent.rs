//! Agent model — identity lifecycle (C3: Agent Registry)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub hostname: String,
    pub os_type: Option<String>,
    pub os_version: Option<String>,
    pub os_arch: Option<String>,
    pub agent_version: Option<String>,
    pub update_available: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    pub hostname: String,
    pub os_type: String,
    pub os_version: String,
    pub os_arch: String,
    #[serde(default)]
    pub agent_version: Option<String>,
}

impl Agent {
    /// Liveness is derived, never stored: `online` iff `now - last_seen <= threshold`.
    pub fn is_online(&self, threshold: std::time::Duration, now: DateTime<Utc>) -> bool {
        match self.last_seen {
            Some(last_seen) => (now - last_seen).to_std().map(|d| d <= threshold).unwrap_or(false),
            None => false,
        }
    }

    pub async fn register(pool: &PgPool, data: &RegisterAgentRequest) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Agent>(
            r#"
            INSERT INTO agents (hostname, os_type, os_version, os_arch, agent_version, last_seen)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING *
            "#,
        )
        .bind(&data.hostname)
        .bind(&data.os_type)
        .bind(&data.os_version)
        .bind(&data.os_arch)
        .bind(&data.agent_version)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Agent>("SELECT * FROM agents ORDER BY last_seen DESC NULLS LAST LIMIT $1")
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    pub async fn update_last_seen(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE agents SET last_seen = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Persists the reported agent version and the derived `update_available`
    /// flag in one statement (the "two-field derived flag" of §4.3).
    pub async fn update_version(
        pool: &PgPool,
        id: Uuid,
        reported_version: &str,
        update_available: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE agents SET agent_version = $2, update_available = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(reported_version)
        .bind(update_available)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Merges `patch` into the agent's metadata bag (shallow, top-level keys).
    pub async fn merge_metadata(pool: &PgPool, id: Uuid, patch: &serde_json::Value) -> Result<serde_json::Value, sqlx::Error> {
        let current = sqlx::query_scalar::<_, serde_json::Value>("SELECT metadata FROM agents WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;

        let merged = merge_json_objects(current, patch.clone());

        sqlx::query("UPDATE agents SET metadata = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(&merged)
            .execute(pool)
            .await?;

        Ok(merged)
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM agents WHERE id = $1").bind(id).execute(pool).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_active(pool: &PgPool, threshold_secs: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM agents WHERE last_seen IS NOT NULL AND last_seen > NOW() - make_interval(secs => $1)",
        )
        .bind(threshold_secs as f64)
        .fetch_one(pool)
        .await
    }

    /// Rapid-poll echo/stored state from metadata: `(enabled, until)`.
    pub fn rapid_poll_state(&self) -> (bool, Option<DateTime<Utc>>) {
        let enabled = self.metadata.get("rapid_polling_enabled").and_then(|v| v.as_bool()).unwrap_or(false);
        let until = self
            .metadata
            .get("rapid_polling_until")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        (enabled, until)
    }

    /// Time left on an active rapid-poll window, or `None` if disabled or expired.
    pub fn rapid_poll_remaining(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let (enabled, until) = self.rapid_poll_state();
        if !enabled {
            return None;
        }
        let remaining = until? - now;
        if remaining > chrono::Duration::zero() {
            Some(remaining)
        } else {
            None
        }
    }
}

fn merge_json_objects(base: serde_json::Value, patch: serde_json::Value) -> serde_json::Value {
    match (base, patch) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                base_map.insert(k, v);
            }
            serde_json::Value::Object(base_map)
        }
        (_, patch) => patch,
    }
}

/// Semantic-version ordering per §4.3: numeric per dotted component,
/// missing trailing components compare as zero. Returns true when
/// `reported` is strictly older than `latest`.
pub fn is_version_older(reported: &str, latest: &str) -> bool {
    let reported_parts = parse_version(reported);
    let latest_parts = parse_version(latest);
    let len = reported_parts.len().max(latest_parts.len());

    for i in 0..len {
        let r = reported_parts.get(i).copied().unwrap_or(0);
        let l = latest_parts.get(i).copied().unwrap_or(0);
        if r != l {
            return r < l;
        }
    }
    false
}

fn parse_version(v: &str) -> Vec<u64> {
    v.split('.').map(|part| part.parse::<u64>().unwrap_or(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_matches_spec_examples() {
        assert!(is_version_older("0.1.15", "0.1.16"));
        assert!(!is_version_older("0.1.16", "0.1.16"));
        assert!(!is_version_older("0.1.16.1", "0.1.16"));
        assert!(!is_version_older("0.2", "0.1.16"));
    }

    #[test]
    fn missing_trailing_components_compare_as_zero() {
        assert!(is_version_older("1.2", "1.2.1"));
        assert!(!is_version_older("1.2.0", "1.2"));
    }
}
