use crate::state::{ApiError, ApiResponse, AppState};
use agent_core::AgentError;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
pub struct PriceQuery {
    pub days: Option<i64>,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct QuotesQuery {
    pub tickers: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard/overview/:ticker", get(overview))
        .route("/dashboard/prices/:ticker", get(prices))
        .route("/dashboard/news/:ticker", get(news))
        .route("/dashboard/youtube/:ticker", get(youtube))
        .route("/dashboard/technicals/:ticker", get(technicals))
        .route("/dashboard/financials/:ticker", get(financials))
        .route("/dashboard/risk/:ticker", get(risk))
        .route("/dashboard/analyst/:ticker", get(analyst))
        .route("/quotes", get(quotes))
}

async fn overview(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let symbol = ticker.to_uppercase();
    let latest_candle = state.store.latest_candle(&symbol).await.ok();
    let fundamentals = state.store.latest_fundamentals(&symbol).await.ok();
    let scorecard = state.store.latest_scorecard(&symbol).await.ok();
    let dossier = state.store.latest_dossier(&symbol).await.ok();
    let watchlist_entry = state.store.watchlist_entry(&symbol).await?;
    let position = state.store.position(&symbol).await?;

    Ok(ApiResponse::ok(json!({
        "symbol": symbol,
        "latest_candle": latest_candle,
        "fundamentals": fundamentals,
        "scorecard": scorecard,
        "dossier": dossier,
        "watchlist_entry": watchlist_entry,
        "position": position,
    })))
}

async fn prices(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(query): Query<PriceQuery>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let symbol = ticker.to_uppercase();
    let days = query.days.unwrap_or(180).clamp(1, 730);
    let today = Utc::now().date_naive();
    let candles = state
        .store
        .candles(&symbol, today - Duration::days(days), today)
        .await?;
    Ok(ApiResponse::ok(json!({"symbol": symbol, "candles": candles})))
}

async fn news(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let symbol = ticker.to_uppercase();
    let articles = state
        .store
        .news_for(&symbol, query.limit.unwrap_or(25).clamp(1, 200))
        .await?;
    Ok(ApiResponse::ok(json!({"symbol": symbol, "articles": articles})))
}

async fn youtube(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let symbol = ticker.to_uppercase();
    let transcripts = state
        .store
        .transcripts_for(&symbol, query.limit.unwrap_or(10).clamp(1, 50))
        .await?;
    Ok(ApiResponse::ok(json!({"symbol": symbol, "transcripts": transcripts})))
}

async fn technicals(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let symbol = ticker.to_uppercase();
    let rows = state.store.recent_technicals(&symbol, 30).await?;
    Ok(ApiResponse::ok(json!({"symbol": symbol, "technicals": rows})))
}

async fn financials(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let symbol = ticker.to_uppercase();
    let income = state.store.financials(&symbol).await?;
    let balance = state.store.balance_rows(&symbol).await?;
    let cash_flows = state.store.cash_flow_rows(&symbol).await?;
    Ok(ApiResponse::ok(json!({
        "symbol": symbol,
        "income_statements": income,
        "balance_sheets": balance,
        "cash_flows": cash_flows,
    })))
}

async fn risk(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let symbol = ticker.to_uppercase();
    let row = state.store.latest_risk_row(&symbol).await?;
    match row {
        Some(row) => Ok(ApiResponse::ok(json!({"symbol": symbol, "risk": row}))),
        None => Err(AgentError::NotFound(format!("no risk metrics for {symbol}")).into()),
    }
}

async fn analyst(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let symbol = ticker.to_uppercase();
    let snapshot = state.store.latest_analyst(&symbol).await?;
    match snapshot {
        Some(snapshot) => Ok(ApiResponse::ok(json!({"symbol": symbol, "analyst": snapshot}))),
        None => Err(AgentError::NotFound(format!("no analyst data for {symbol}")).into()),
    }
}

/// Batched live snapshot straight from the quote adapter.
async fn quotes(
    State(state): State<AppState>,
    Query(query): Query<QuotesQuery>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let symbols: Vec<String> = query
        .tickers
        .split(',')
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(AgentError::Validation("tickers query param is empty".to_string()).into());
    }
    let quotes = state.market.quotes(&symbols).await?;
    Ok(ApiResponse::ok(json!({"quotes": quotes})))
}
