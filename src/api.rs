//! REST endpoints for polling, cancelling and sweeping background tasks.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::engine::TaskEngine;
use crate::task::TaskType;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TaskEngine>,
}

/// Build the Axum router with the task status routes.
pub fn task_routes(engine: Arc<TaskEngine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/health", get(health))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/sweep", post(sweep_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "offload"
    }))
}

// ── Tasks ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListParams {
    owner_id: Option<String>,
    task_type: Option<String>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let task_type = params.task_type.map(TaskType::from);
    let tasks = state
        .engine
        .list_tasks(params.owner_id.as_deref(), task_type.as_ref());
    Json(serde_json::json!(tasks))
}

fn parse_task_id(id: &str) -> Result<Uuid, (StatusCode, Json<serde_json::Value>)> {
    Uuid::parse_str(id).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid task ID"})),
        )
    })
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let task_id = match parse_task_id(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    match state.engine.get_status(task_id) {
        Some(record) => (StatusCode::OK, Json(serde_json::json!(record))),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Task not found"})),
        ),
    }
}

async fn cancel_task(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let task_id = match parse_task_id(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    let cancelled = state.engine.cancel(task_id);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "task_id": task_id,
            "cancelled": cancelled,
        })),
    )
}

#[derive(Debug, Deserialize)]
struct SweepParams {
    max_age_hours: Option<u64>,
}

async fn sweep_tasks(
    State(state): State<AppState>,
    Query(params): Query<SweepParams>,
) -> impl IntoResponse {
    let removed = match params.max_age_hours {
        Some(hours) => state.engine.sweep_hours(hours),
        None => state.engine.sweep_expired(),
    };
    info!(removed, "Sweep requested via API");
    Json(serde_json::json!({"removed": removed}))
}
