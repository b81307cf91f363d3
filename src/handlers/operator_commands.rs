//! Operator-facing command endpoints: retry/cancel, active/recent lists.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine;
use crate::models::command::Command;
use crate::{AppResult, AppState};

pub async fn retry(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Command>> {
    let retried = engine::commands::retry(&state.pool, id).await?;
    Ok(Json(retried))
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<serde_json::Value>> {
    engine::commands::cancel(&state.pool, id).await?;
    Ok(Json(serde_json::json!({"cancelled": true})))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn active(State(state): State<AppState>, Query(q): Query<ListQuery>) -> AppResult<Json<Vec<Command>>> {
    Ok(Json(Command::list_active(&state.pool, q.limit).await?))
}

pub async fn recent(State(state): State<AppState>, Query(q): Query<ListQuery>) -> AppResult<Json<Vec<Command>>> {
    Ok(Json(Command::list_recent(&state.pool, q.limit).await?))
}
