use crate::state::{ApiError, ApiResponse, AppState, TaskStatus};
use agent_core::AgentError;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use market_store::RunContext;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/discovery/run", post(run_discovery))
        .route("/discovery/status", get(discovery_status))
        .route("/discovery/results", get(discovery_results))
        .route("/discovery/history", get(discovery_history))
        .route("/discovery/clear", post(clear_discovery))
}

/// Kick off a discovery run in the background and return its run id.
async fn run_discovery(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    {
        let mut status = state.discovery_status.lock().await;
        if status.running {
            return Err(AgentError::Validation("discovery already running".to_string()).into());
        }
        status.running = true;
        status.last_error = None;
    }

    let ctx = RunContext::new(state.events.clone());
    let run_id = ctx.run_id().to_string();
    {
        let mut status = state.discovery_status.lock().await;
        status.last_run_id = Some(run_id.clone());
    }

    let discovery = state.discovery.clone();
    let status_handle = state.discovery_status.clone();
    tokio::spawn(async move {
        let result = discovery.run(&ctx).await;
        let mut status = status_handle.lock().await;
        status.running = false;
        if let Err(e) = result {
            tracing::warn!("discovery run failed: {e}");
            status.last_error = Some(e.to_string());
        }
    });

    Ok(ApiResponse::ok(json!({"run_id": run_id, "started": true})))
}

async fn discovery_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<TaskStatus>>, ApiError> {
    Ok(ApiResponse::ok(state.discovery_status.lock().await.clone()))
}

/// Results of the most recent run (empty until one has completed).
async fn discovery_results(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let run_id = state.discovery_status.lock().await.last_run_id.clone();
    let results = match &run_id {
        Some(run_id) => state.store.discovery_results(run_id).await?,
        None => Vec::new(),
    };
    Ok(ApiResponse::ok(json!({"run_id": run_id, "results": results})))
}

async fn discovery_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let rows = state
        .store
        .discovery_history(query.limit.unwrap_or(100).clamp(1, 1000))
        .await?;
    Ok(ApiResponse::ok(json!({"history": rows})))
}

async fn clear_discovery(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    state.store.clear_discovery().await?;
    let mut status = state.discovery_status.lock().await;
    status.last_run_id = None;
    Ok(ApiResponse::ok(json!({"cleared": true})))
}
