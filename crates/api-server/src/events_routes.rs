use crate::state::{ApiError, ApiResponse, AppState};
use agent_core::PipelineEvent;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct EventsQuery {
    pub limit: Option<i64>,
    pub phase: Option<String>,
    pub ticker: Option<String>,
    pub run_id: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/pipeline/events", get(events))
}

async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<ApiResponse<Vec<PipelineEvent>>>, ApiError> {
    let events = state
        .events
        .query(
            query.limit.unwrap_or(100).clamp(1, 1000),
            query.phase.as_deref(),
            query.ticker.as_deref(),
            query.run_id.as_deref(),
        )
        .await?;
    Ok(ApiResponse::ok(events))
}
