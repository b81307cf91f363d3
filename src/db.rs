//! Database module - PostgreSQL connection and migrations

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create tables if not exist
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS pgcrypto;

-- Agents (fleet endpoints)
CREATE TABLE IF NOT EXISTS agents (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    hostname VARCHAR(255) NOT NULL,
    os_type VARCHAR(50),
    os_version VARCHAR(100),
    os_arch VARCHAR(50),
    agent_version VARCHAR(50),
    update_available BOOLEAN NOT NULL DEFAULT false,
    last_seen TIMESTAMPTZ,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Registration tokens (bootstrap secrets redeemed by new agents)
CREATE TABLE IF NOT EXISTS registration_tokens (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    secret VARCHAR(255) NOT NULL UNIQUE,
    label VARCHAR(255) NOT NULL,
    max_seats INT NOT NULL,
    seats_used INT NOT NULL DEFAULT 0,
    revoked BOOLEAN NOT NULL DEFAULT false,
    revoked_reason VARCHAR(255),
    expires_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Refresh tokens (sliding-window renewal of access tokens)
CREATE TABLE IF NOT EXISTS refresh_tokens (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    agent_id UUID NOT NULL UNIQUE REFERENCES agents(id) ON DELETE CASCADE,
    secret_hash VARCHAR(255) NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Commands (enqueue -> poll-delivery -> terminal resolution)
CREATE TABLE IF NOT EXISTS commands (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    command_type VARCHAR(50) NOT NULL,
    params JSONB NOT NULL DEFAULT '{}'::jsonb,
    status VARCHAR(20) NOT NULL DEFAULT 'pending',
    result JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    sent_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ
);

-- Update events (append-only discovery/lifecycle log)
CREATE TABLE IF NOT EXISTS update_events (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    package_type VARCHAR(50) NOT NULL,
    package_name VARCHAR(255) NOT NULL,
    version_from VARCHAR(100),
    version_to VARCHAR(100),
    severity VARCHAR(20),
    source VARCHAR(100),
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    event_type VARCHAR(30) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Update state (materialized per-package projection)
CREATE TABLE IF NOT EXISTS update_state (
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    package_type VARCHAR(50) NOT NULL,
    package_name VARCHAR(255) NOT NULL,
    current_version VARCHAR(100),
    available_version VARCHAR(100),
    severity VARCHAR(20),
    status VARCHAR(30) NOT NULL,
    last_discovered_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    approver VARCHAR(255),
    scheduled_at TIMESTAMPTZ,
    installed_at TIMESTAMPTZ,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    PRIMARY KEY (agent_id, package_type, package_name)
);

-- Update logs (append-only execution trail)
CREATE TABLE IF NOT EXISTS update_logs (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    agent_id UUID NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    command_id UUID REFERENCES commands(id) ON DELETE SET NULL,
    action VARCHAR(100) NOT NULL,
    result VARCHAR(50) NOT NULL,
    stdout TEXT,
    stderr TEXT,
    exit_code INT,
    duration_seconds DOUBLE PRECISION,
    executed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_agents_last_seen ON agents(last_seen);
CREATE INDEX IF NOT EXISTS idx_commands_agent_status ON commands(agent_id, status, created_at);
CREATE INDEX IF NOT EXISTS idx_commands_sweep ON commands(status, sent_at);
CREATE INDEX IF NOT EXISTS idx_update_events_agent ON update_events(agent_id, package_type, package_name, created_at);
CREATE INDEX IF NOT EXISTS idx_update_state_agent ON update_state(agent_id);
CREATE INDEX IF NOT EXISTS idx_update_state_status ON update_state(status);
CREATE INDEX IF NOT EXISTS idx_update_logs_agent ON update_logs(agent_id, executed_at);
CREATE INDEX IF NOT EXISTS idx_registration_tokens_secret ON registration_tokens(secret);
"#;
