use crate::state::{ApiError, ApiResponse, AppState, TaskStatus};
use agent_core::AgentError;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use market_store::RunContext;
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bot/run-loop", post(run_loop))
        .route("/bot/loop-status", get(loop_status))
}

/// Run one full pipeline pass over the current watchlist in the background.
async fn run_loop(State(state): State<AppState>) -> Result<Json<ApiResponse<Value>>, ApiError> {
    {
        let mut status = state.loop_status.lock().await;
        if status.running {
            return Err(AgentError::Validation("bot loop already running".to_string()).into());
        }
        status.running = true;
        status.last_error = None;
    }

    let symbols = state.watchlist.active_symbols().await?;
    if symbols.is_empty() {
        state.loop_status.lock().await.running = false;
        return Err(AgentError::Validation("watchlist is empty".to_string()).into());
    }

    let ctx = RunContext::new(state.events.clone());
    let run_id = ctx.run_id().to_string();
    state.loop_status.lock().await.last_run_id = Some(run_id.clone());

    let pipeline = state.pipeline.clone();
    let status_handle = state.loop_status.clone();
    let cancel = state.scheduler.cancel_token().child_token();
    tokio::spawn(async move {
        let result = pipeline.run(&ctx, symbols, cancel).await;
        let mut status = status_handle.lock().await;
        status.running = false;
        if let Err(e) = result {
            tracing::warn!("bot loop failed: {e}");
            status.last_error = Some(e.to_string());
        }
    });

    Ok(ApiResponse::ok(json!({"run_id": run_id, "started": true})))
}

async fn loop_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<TaskStatus>>, ApiError> {
    Ok(ApiResponse::ok(state.loop_status.lock().await.clone()))
}
