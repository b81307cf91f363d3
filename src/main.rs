//! RedFlag Control Plane
//!
//! Central coordination server for the RedFlag fleet update-management
//! client. Agents poll a command channel, report execution results, and
//! the server mediates operator approval of discovered package updates.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      REDFLAG CONTROL PLANE                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────┐  ┌─────────────────────────┐ │
//! │  │  API      │  │  Token    │  │  Command + Update       │ │
//! │  │  Gateway  │  │  Service  │  │  Engines (background     │ │
//! │  │  (Axum)   │  │  (JWT)    │  │  sweep + cascades)       │ │
//! │  └─────┬─────┘  └─────┬─────┘  └────────────┬────────────┘ │
//! │        └──────────────┼──────────────────────┘              │
//! │                       ▼                                     │
//! │                ┌─────────────┐                             │
//! │                │ PostgreSQL  │                             │
//! │                └─────────────┘                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod auth;
mod config;
mod db;
mod engine;
mod error;
mod handlers;
mod middleware;
mod models;
mod ratelimit;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use error::{AppError, AppResult};
use ratelimit::RateLimiter;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "redflag_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    tracing::info!("RedFlag control plane starting...");
    tracing::info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));

    let pool = db::create_pool(&config.database_url).await.expect("Failed to create database pool");

    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await.expect("Failed to run migrations");

    let state = AppState { pool, config: config.clone(), rate_limiter: Arc::new(RateLimiter::new()) };

    spawn_background_tasks(state.clone());

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: config::Config,
    pub rate_limiter: Arc<RateLimiter>,
}

/// The command timeout sweeper (5-min period) and the rate-limiter
/// reclaimer (spec §5), both long-lived tasks that simply catch up on
/// restart — sweeping is idempotent since the `sent` predicate filters
/// out already-terminal rows.
fn spawn_background_tasks(state: AppState) {
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_state.config.sweep_interval);
        loop {
            interval.tick().await;
            let swept = engine::commands::sweep_timeouts(&sweep_state.pool, sweep_state.config.command_timeout).await;
            if swept > 0 {
                tracing::info!(count = swept, "timeout sweep transitioned commands");
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            state.rate_limiter.reclaim();
        }
    });
}

fn create_router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(handlers::health::check)).route(
        "/agents/renew",
        post(handlers::agent::renew).layer(axum_middleware::from_fn_with_state(state.clone(), middleware::rate_limit::public)),
    );

    let registration_routes = Router::new()
        .route("/agents/register", post(handlers::agent::register))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::rate_limit::registration));

    // Agent-token routes: the poll-commands, updates/logs/dependencies
    // ingest, and system-info merge. All require a valid access token
    // whose embedded agent identifier the handler cross-checks against
    // the path parameter (§4.8).
    let agent_routes = Router::new()
        .route("/agents/:id/commands", get(handlers::poll::poll))
        .route("/agents/:id/updates", post(handlers::agent::ingest_updates))
        .route("/agents/:id/logs", post(handlers::agent::ingest_log))
        .route("/agents/:id/dependencies", post(handlers::agent::dependencies))
        .route("/agents/:id/system-info", post(handlers::agent::system_info))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::rate_limit::checkin))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::auth::require_agent_auth));

    // Operator-facing routes. Real operator auth is out of scope; the
    // shared-secret stand-in (`require_operator_auth`) guards the
    // boundary so it can be swapped later without touching handlers.
    let operator_token_gen_routes = Router::new()
        .route("/registration-tokens", post(handlers::operator_tokens::create))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::rate_limit::admin_token_gen))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::auth::require_operator_auth));

    let operator_report_routes = Router::new()
        .route("/updates/logs", get(handlers::operator_updates::logs))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::rate_limit::reports))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::auth::require_operator_auth));

    let operator_routes = Router::new()
        .route("/agents", get(handlers::operator_agents::list))
        .route("/agents/:id", get(handlers::operator_agents::detail))
        .route("/agents/:id", delete(handlers::operator_agents::delete))
        .route("/agents/:id/scan", post(handlers::operator_agents::scan))
        .route("/agents/:id/update", post(handlers::operator_agents::update))
        .route("/agents/:id/heartbeat", post(handlers::operator_agents::heartbeat))
        .route("/updates", get(handlers::operator_updates::list))
        .route("/updates/detail", get(handlers::operator_updates::detail))
        .route("/updates/approve", post(handlers::operator_updates::approve))
        .route("/updates/bulk-approve", post(handlers::operator_updates::bulk_approve))
        .route("/updates/reject", post(handlers::operator_updates::reject))
        .route("/updates/install", post(handlers::operator_updates::install))
        .route("/updates/confirm-deps", post(handlers::operator_updates::confirm_deps))
        .route("/commands/:id/retry", post(handlers::operator_commands::retry))
        .route("/commands/:id/cancel", post(handlers::operator_commands::cancel))
        .route("/commands/active", get(handlers::operator_commands::active))
        .route("/commands/recent", get(handlers::operator_commands::recent))
        .route("/registration-tokens", get(handlers::operator_tokens::list))
        .route("/registration-tokens/:id", get(handlers::operator_tokens::detail))
        .route("/registration-tokens/:id", delete(handlers::operator_tokens::revoke))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::rate_limit::admin_ops))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::auth::require_operator_auth));

    Router::new()
        .merge(public_routes)
        .merge(registration_routes)
        .merge(agent_routes)
        .merge(operator_token_gen_routes)
        .merge(operator_report_routes)
        .merge(operator_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
