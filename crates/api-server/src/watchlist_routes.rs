use crate::state::{ApiError, ApiResponse, AppState};
use agent_core::{WatchlistEntry, WatchlistSource};
use axum::extract::State;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct PutWatchlistRequest {
    pub tickers: Vec<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/watchlist", get(get_watchlist))
        .route("/watchlist", put(put_watchlist))
}

async fn get_watchlist(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WatchlistEntry>>>, ApiError> {
    let entries = state.watchlist.active_entries().await?;
    Ok(ApiResponse::ok(entries))
}

/// Reconcile the manual watchlist against the provided set: missing tickers
/// are added, manual entries no longer listed are removed. Auto-discovered
/// entries are left alone.
async fn put_watchlist(
    State(state): State<AppState>,
    Json(request): Json<PutWatchlistRequest>,
) -> Result<Json<ApiResponse<Vec<WatchlistEntry>>>, ApiError> {
    let desired: Vec<String> = request
        .tickers
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect();

    let current = state.watchlist.active_entries().await?;
    for entry in &current {
        if entry.source == WatchlistSource::Manual && !desired.contains(&entry.symbol) {
            state.watchlist.remove_manual(&entry.symbol).await?;
        }
    }
    for symbol in &desired {
        if !current.iter().any(|e| &e.symbol == symbol) {
            state.watchlist.add_manual(symbol).await?;
        }
    }

    let entries = state.watchlist.active_entries().await?;
    Ok(ApiResponse::ok(entries))
}
