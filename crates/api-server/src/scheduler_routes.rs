use crate::state::{ApiError, ApiResponse, AppState};
use agent_core::AgentError;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use scheduler::{JobName, SchedulerStatus};
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/scheduler/status", get(status))
        .route("/scheduler/start", post(start))
        .route("/scheduler/stop", post(stop))
        .route("/scheduler/run/:job", post(run_job))
}

async fn status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SchedulerStatus>>, ApiError> {
    Ok(ApiResponse::ok(state.scheduler.status()))
}

async fn start(State(state): State<AppState>) -> Result<Json<ApiResponse<Value>>, ApiError> {
    if state.scheduler.is_running() {
        return Err(AgentError::Validation("scheduler already running".to_string()).into());
    }
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        scheduler.run_forever().await;
    });
    Ok(ApiResponse::ok(json!({"started": true})))
}

/// Kill switch: cancels the root context. In-flight work completes, pending
/// orders and active triggers are cancelled, positions are left alone.
async fn stop(State(state): State<AppState>) -> Result<Json<ApiResponse<Value>>, ApiError> {
    state.scheduler.shutdown().await;
    Ok(ApiResponse::ok(json!({"stopped": true})))
}

async fn run_job(
    State(state): State<AppState>,
    Path(job): Path<String>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let job = JobName::parse(&job)
        .ok_or_else(|| AgentError::Validation(format!("unknown job '{job}'")))?;
    state.scheduler.trigger(job).await?;
    Ok(ApiResponse::ok(json!({"job": job.as_str(), "completed": true})))
}
