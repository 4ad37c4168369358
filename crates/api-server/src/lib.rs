pub mod analysis_routes;
pub mod bot_routes;
pub mod dashboard_routes;
pub mod discovery_routes;
pub mod events_routes;
pub mod portfolio_routes;
pub mod scheduler_routes;
pub mod state;
pub mod watchlist_routes;

use axum::Router;
use state::AppState;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::{build_state, ApiError, ApiResponse};

/// Assemble the full route tree over shared state.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(watchlist_routes::routes())
        .merge(dashboard_routes::routes())
        .merge(discovery_routes::routes())
        .merge(analysis_routes::routes())
        .merge(portfolio_routes::routes())
        .merge(bot_routes::routes())
        .merge(scheduler_routes::routes())
        .merge(events_routes::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the scheduler's kill switch fires.
pub async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let cancel = state.scheduler.cancel_token();
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("API server listening on {bind_addr}");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
