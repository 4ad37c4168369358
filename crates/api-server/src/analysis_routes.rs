use crate::state::{ApiError, ApiResponse, AppState};
use agent_core::{QuantScorecard, StepStatus, TickerCollector, TickerDossier};
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use market_store::RunContext;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

#[derive(Deserialize)]
pub struct StreamQuery {
    pub ticker: String,
    pub mode: Option<String>,
}

#[derive(Deserialize)]
pub struct BatchRequest {
    pub tickers: Vec<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/analyze-stream", post(analyze_stream))
        .route("/analysis/deep/:ticker", post(deep_analysis))
        .route("/analysis/deep-batch", post(deep_batch))
        .route("/dossiers/:ticker", get(get_dossier))
        .route("/scorecards/:ticker", get(get_scorecard))
}

fn sse_event(kind: &str, payload: Value) -> Event {
    Event::default().data(
        json!({"type": kind, "payload": payload}).to_string(),
    )
}

/// Server-sent progress for a single-ticker deep analysis: collection step
/// events, per-stage agent events, the routing decision, then `done`.
async fn analyze_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let symbol = query.ticker.trim().to_uppercase();
    let collect_first = query.mode.as_deref() != Some("analysis-only");
    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(32);

    tokio::spawn(async move {
        let send = |event: Event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event).await;
            }
        };

        send(sse_event(
            "plan",
            json!({
                "symbol": &symbol,
                "steps": if collect_first { vec!["collect", "analyze", "decide"] } else { vec!["analyze", "decide"] },
            }),
        ))
        .await;

        let ctx = RunContext::new(state.events.clone());

        if collect_first {
            send(sse_event("step_start", json!({"step": "collect", "symbol": &symbol}))).await;
            match state.collector.collect_data(&symbol).await {
                Ok(report) => {
                    for (name, outcome) in &report.steps {
                        let payload = json!({
                            "step": name,
                            "rows": outcome.rows,
                            "elapsed_ms": outcome.elapsed_ms,
                            "message": outcome.message,
                        });
                        match outcome.status {
                            StepStatus::Error => {
                                send(sse_event("step_error", payload)).await;
                            }
                            _ => {
                                send(sse_event("step_complete", payload)).await;
                            }
                        }
                    }
                    if !report.ready_for_analysis() {
                        send(sse_event(
                            "error",
                            json!({"error_kind": "collector_error",
                                   "error": "critical collection steps failed"}),
                        ))
                        .await;
                        send(sse_event("done", json!({"symbol": &symbol, "status": "failed"})))
                            .await;
                        return;
                    }
                }
                Err(e) => {
                    send(sse_event(
                        "error",
                        json!({"error_kind": e.error_kind(), "error": e.to_string()}),
                    ))
                    .await;
                    send(sse_event("done", json!({"symbol": &symbol, "status": "failed"}))).await;
                    return;
                }
            }
        }

        send(sse_event("agent_start", json!({"agent": "deep_analysis", "symbol": &symbol}))).await;
        let portfolio = match state.trader.portfolio().await {
            Ok(portfolio) => portfolio,
            Err(e) => {
                send(sse_event(
                    "error",
                    json!({"error_kind": e.error_kind(), "error": e.to_string()}),
                ))
                .await;
                send(sse_event("done", json!({"symbol": &symbol, "status": "failed"}))).await;
                return;
            }
        };

        let dossier = match state.analysis.analyze(&ctx, &symbol, &portfolio).await {
            Ok(dossier) => {
                send(sse_event(
                    "agent_complete",
                    json!({
                        "agent": "deep_analysis",
                        "conviction": dossier.conviction_score,
                        "signal_summary": &dossier.signal_summary,
                    }),
                ))
                .await;
                dossier
            }
            Err(e) => {
                send(sse_event(
                    "agent_error",
                    json!({"agent": "deep_analysis", "error_kind": e.error_kind(),
                           "error": e.to_string()}),
                ))
                .await;
                send(sse_event("done", json!({"symbol": &symbol, "status": "failed"}))).await;
                return;
            }
        };

        match state.router.handle_dossier(&ctx, &state.trader, &dossier).await {
            Ok(decision) => {
                send(sse_event(
                    "decision_complete",
                    json!({
                        "action": decision.action,
                        "qty": decision.qty,
                        "rationale": decision.rationale,
                        "blocked_by": decision.blocked_by,
                    }),
                ))
                .await;
            }
            Err(e) => {
                send(sse_event(
                    "error",
                    json!({"error_kind": e.error_kind(), "error": e.to_string()}),
                ))
                .await;
            }
        }

        send(sse_event("done", json!({"symbol": &symbol, "status": "complete"}))).await;
    });

    Sse::new(ReceiverStream::new(rx).map(Ok)).keep_alive(KeepAlive::default())
}

/// Synchronous single-ticker deep analysis (no stream).
async fn deep_analysis(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<TickerDossier>>, ApiError> {
    let symbol = ticker.to_uppercase();
    let ctx = RunContext::new(state.events.clone());
    let portfolio = state.trader.portfolio().await?;
    let dossier = state.analysis.analyze(&ctx, &symbol, &portfolio).await?;
    Ok(ApiResponse::ok(dossier))
}

/// Run the full pipeline over an explicit batch of tickers.
async fn deep_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let symbols: Vec<String> = request
        .tickers
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(agent_core::AgentError::Validation("no tickers provided".to_string()).into());
    }

    let ctx = RunContext::new(state.events.clone());
    let run_id = ctx.run_id().to_string();
    let pipeline = state.pipeline.clone();
    let cancel = state.scheduler.cancel_token().child_token();
    tokio::spawn(async move {
        if let Err(e) = pipeline.run(&ctx, symbols, cancel).await {
            tracing::warn!("deep batch failed: {e}");
        }
    });
    Ok(ApiResponse::ok(json!({"run_id": run_id, "started": true})))
}

async fn get_dossier(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<TickerDossier>>, ApiError> {
    let dossier = state.store.latest_dossier(&ticker.to_uppercase()).await?;
    Ok(ApiResponse::ok(dossier))
}

async fn get_scorecard(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<QuantScorecard>>, ApiError> {
    let card = state.store.latest_scorecard(&ticker.to_uppercase()).await?;
    Ok(ApiResponse::ok(card))
}
