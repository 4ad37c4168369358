use crate::state::{ApiError, ApiResponse, AppState};
use agent_core::{Order, PortfolioSnapshot, PortfolioSummary, Position, PriceTrigger};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/portfolio", get(portfolio))
        .route("/positions", get(positions))
        .route("/orders", get(orders))
        .route("/triggers", get(triggers))
        .route("/portfolio/history", get(history))
}

async fn portfolio(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<PortfolioSummary>>, ApiError> {
    Ok(ApiResponse::ok(state.trader.portfolio().await?))
}

async fn positions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Position>>>, ApiError> {
    Ok(ApiResponse::ok(state.trader.positions().await?))
}

async fn orders(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<Order>>>, ApiError> {
    let orders = state
        .store
        .orders(query.limit.unwrap_or(100).clamp(1, 1000))
        .await?;
    Ok(ApiResponse::ok(orders))
}

async fn triggers(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<PriceTrigger>>>, ApiError> {
    let triggers = state
        .store
        .triggers(query.limit.unwrap_or(100).clamp(1, 1000))
        .await?;
    Ok(ApiResponse::ok(triggers))
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<PortfolioSnapshot>>>, ApiError> {
    let snapshots = state
        .store
        .snapshots(query.limit.unwrap_or(100).clamp(1, 1000))
        .await?;
    Ok(ApiResponse::ok(snapshots))
}
