//! Token models (C2: Token Service) — registration and refresh tokens.
//! Access tokens are stateless signed claims and live in `crate::auth`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RegistrationToken {
    pub id: Uuid,
    pub secret: String,
    pub label: String,
    pub max_seats: i32,
    pub seats_used: i32,
    pub revoked: bool,
    pub revoked_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IssueRegistrationToken {
    pub label: String,
    #[validate(range(min = 1, max = 168))]
    pub ttl_hours: i64,
    #[validate(range(min = 1))]
    pub max_seats: i32,
}

impl RegistrationToken {
    fn generate_secret() -> String {
        format!("reg_{}", Uuid::new_v4().simple())
    }

    /// IssueRegistrationToken(label, ttl, max_seats). Callers must
    /// separately check the fleet seat cap before calling this.
    pub async fn issue(pool: &PgPool, req: &IssueRegistrationToken) -> Result<Self, sqlx::Error> {
        let secret = Self::generate_secret();
        let expires_at = Utc::now() + chrono::Duration::hours(req.ttl_hours);

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO registration_tokens (secret, label, max_seats, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&secret)
        .bind(&req.label)
        .bind(req.max_seats)
        .bind(expires_at)
        .fetch_one(pool)
        .await
    }

    /// RedeemRegistrationToken: atomic compare-and-increment under the
    /// `seats_used < max_seats` check. Returns `Some(token)` on success,
    /// `None` when exhausted/revoked/expired (no double-spend possible).
    pub async fn try_redeem(pool: &PgPool, secret: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE registration_tokens
            SET seats_used = seats_used + 1
            WHERE secret = $1
              AND revoked = false
              AND expires_at > NOW()
              AND seats_used < max_seats
            RETURNING *
            "#,
        )
        .bind(secret)
        .fetch_optional(pool)
        .await
    }

    pub async fn revoke(pool: &PgPool, id: Uuid, reason: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE registration_tokens SET revoked = true, revoked_reason = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM registration_tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM registration_tokens ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
    }

    pub fn is_redeemable(&self) -> bool {
        !self.revoked && self.expires_at > Utc::now() && self.seats_used < self.max_seats
    }

    /// Seats committed by live (non-revoked, non-expired) tokens, used to
    /// enforce the fleet seat cap at issuance time.
    pub async fn total_active_seats(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(max_seats), 0) FROM registration_tokens WHERE revoked = false AND expires_at > NOW()",
        )
        .fetch_one(pool)
        .await
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub secret_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    fn hash_secret(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// IssueRefreshToken: random secret, persisted with expiry=now+90d,
    /// replacing any prior refresh token for the agent (one active at a time).
    pub async fn issue(pool: &PgPool, agent_id: Uuid, ttl: std::time::Duration) -> Result<String, sqlx::Error> {
        let secret = format!("rtk_{}", Uuid::new_v4().simple());
        let secret_hash = Self::hash_secret(&secret);
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (agent_id, secret_hash, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (agent_id) DO UPDATE SET
                secret_hash = EXCLUDED.secret_hash,
                expires_at = EXCLUDED.expires_at,
                created_at = NOW()
            "#,
        )
        .bind(agent_id)
        .bind(&secret_hash)
        .bind(expires_at)
        .execute(pool)
        .await?;

        Ok(secret)
    }

    /// RenewAccess: validates the presented secret against the stored
    /// hash for the claimed agent, and if non-expired, slides the
    /// window to now+ttl. Fails (returns false) on mismatch/expiry.
    pub async fn renew(pool: &PgPool, agent_id: Uuid, secret: &str, ttl: std::time::Duration) -> Result<bool, sqlx::Error> {
        let secret_hash = Self::hash_secret(secret);
        let new_expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();

        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET expires_at = $3, created_at = created_at
            WHERE agent_id = $1 AND secret_hash = $2 AND expires_at > NOW()
            "#,
        )
        .bind(agent_id)
        .bind(&secret_hash)
        .bind(new_expires_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Resolves the owning agent from a bare refresh secret (used when the
    /// caller doesn't yet know which agent it belongs to).
    pub async fn find_agent_by_secret(pool: &PgPool, secret: &str) -> Result<Option<Uuid>, sqlx::Error> {
        let secret_hash = Self::hash_secret(secret);
        sqlx::query_scalar(
            "SELECT agent_id FROM refresh_tokens WHERE secret_hash = $1 AND expires_at > NOW()",
        )
        .bind(&secret_hash)
        .fetch_optional(pool)
        .await
    }
}
