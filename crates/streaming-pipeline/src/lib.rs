#[cfg(test)]
mod tests;

use agent_core::{
    AgentResult, EventStatus, PipelineConfig, Signal, StepStatus, TickerCollector, TickerDossier,
};
use deep_analysis::DeepAnalysisEngine;
use market_store::RunContext;
use paper_trader::{PaperTrader, SignalRouter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use watchlist_manager::WatchlistManager;

/// A symbol that cleared analysis, headed for the trading worker.
#[derive(Debug)]
pub struct AnalyzedTicker {
    pub symbol: String,
    pub dossier: TickerDossier,
}

/// Counters reported at the end of a run.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub submitted: usize,
    pub collected: usize,
    pub analyzed: usize,
    pub orders: usize,
    pub dropped: usize,
}

/// Queue-connected fan-out/fan-in orchestrator.
///
/// Three bounded queues connect the stages; a full downstream queue blocks
/// its producers. Shutdown rides the channels themselves: when a stage's
/// senders drop, every sibling consumer sees end-of-stream. The cancellation
/// token is observed at every queue operation and before every network call.
pub struct StreamingPipeline {
    config: PipelineConfig,
    collector: Arc<dyn TickerCollector>,
    analysis: Arc<DeepAnalysisEngine>,
    router: Arc<SignalRouter>,
    trader: Arc<PaperTrader>,
    watchlist: Arc<WatchlistManager>,
}

impl StreamingPipeline {
    pub fn new(
        config: PipelineConfig,
        collector: Arc<dyn TickerCollector>,
        analysis: Arc<DeepAnalysisEngine>,
        router: Arc<SignalRouter>,
        trader: Arc<PaperTrader>,
        watchlist: Arc<WatchlistManager>,
    ) -> Self {
        Self {
            config,
            collector,
            analysis,
            router,
            trader,
            watchlist,
        }
    }

    /// Fresh run, fresh validation verdicts.
    pub fn reset_validation_cache(&self) {
        self.collector.reset_validation_cache();
    }

    pub async fn run(
        &self,
        ctx: &RunContext,
        symbols: Vec<String>,
        cancel: CancellationToken,
    ) -> AgentResult<PipelineStats> {
        let stats = Arc::new(StatCounters::default());
        let stage_timeout = Duration::from_secs(self.config.stage_timeout_secs);

        ctx.emit(
            "pipeline",
            "run_start",
            &format!("{} symbols", symbols.len()),
            None,
            Some(serde_json::json!({"symbols": &symbols})),
            EventStatus::Success,
        )
        .await;

        let (collect_tx, collect_rx) = mpsc::channel::<String>(self.config.collect_queue_bound);
        let (analyze_tx, analyze_rx) = mpsc::channel::<String>(self.config.analyze_queue_bound);
        let (trade_tx, trade_rx) = mpsc::channel::<AnalyzedTicker>(self.config.trade_queue_bound);

        let collect_rx = Arc::new(Mutex::new(collect_rx));
        let analyze_rx = Arc::new(Mutex::new(analyze_rx));
        let llm_slots = Arc::new(Semaphore::new(self.config.analysis_workers));

        let mut collection_workers = JoinSet::new();
        for worker in 0..self.config.collection_workers {
            let rx = Arc::clone(&collect_rx);
            let tx = analyze_tx.clone();
            let collector = Arc::clone(&self.collector);
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            let stats = Arc::clone(&stats);
            collection_workers.spawn(async move {
                collection_worker(worker, rx, tx, collector, ctx, cancel, stats, stage_timeout)
                    .await;
            });
        }
        drop(analyze_tx);

        let mut analysis_workers = JoinSet::new();
        for worker in 0..self.config.analysis_workers {
            let rx = Arc::clone(&analyze_rx);
            let tx = trade_tx.clone();
            let analysis = Arc::clone(&self.analysis);
            let trader = Arc::clone(&self.trader);
            let llm_slots = Arc::clone(&llm_slots);
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            let stats = Arc::clone(&stats);
            analysis_workers.spawn(async move {
                analysis_worker(
                    worker,
                    rx,
                    tx,
                    analysis,
                    trader,
                    llm_slots,
                    ctx,
                    cancel,
                    stats,
                    stage_timeout,
                )
                .await;
            });
        }
        drop(trade_tx);

        // Exactly one trading worker serializes portfolio mutations.
        let trading_worker = {
            let router = Arc::clone(&self.router);
            let trader = Arc::clone(&self.trader);
            let watchlist = Arc::clone(&self.watchlist);
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                trading_worker(trade_rx, router, trader, watchlist, ctx, cancel, stats).await;
            })
        };

        // Feed the head of the pipe, respecting backpressure and cancellation.
        let mut submitted = 0usize;
        for symbol in symbols {
            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = collect_tx.send(symbol) => {
                    if sent.is_err() {
                        break;
                    }
                    submitted += 1;
                }
            }
        }
        drop(collect_tx);

        while collection_workers.join_next().await.is_some() {}
        while analysis_workers.join_next().await.is_some() {}
        let _ = trading_worker.await;

        let mut totals = stats.snapshot();
        totals.submitted = submitted;

        let (event_type, status, detail) = if cancel.is_cancelled() {
            (
                "done",
                EventStatus::Warning,
                format!("reason=cancelled after {} analyzed", totals.analyzed),
            )
        } else {
            (
                "done",
                EventStatus::Success,
                format!(
                    "{} submitted, {} collected, {} analyzed, {} orders, {} dropped",
                    totals.submitted,
                    totals.collected,
                    totals.analyzed,
                    totals.orders,
                    totals.dropped
                ),
            )
        };
        ctx.emit("pipeline", event_type, &detail, None, None, status).await;
        Ok(totals)
    }
}

#[derive(Default)]
struct StatCounters {
    collected: AtomicUsize,
    analyzed: AtomicUsize,
    orders: AtomicUsize,
    dropped: AtomicUsize,
}

impl StatCounters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            submitted: 0,
            collected: self.collected.load(Ordering::Relaxed),
            analyzed: self.analyzed.load(Ordering::Relaxed),
            orders: self.orders.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn next_item<T>(
    rx: &Arc<Mutex<mpsc::Receiver<T>>>,
    cancel: &CancellationToken,
) -> Option<T> {
    let mut guard = rx.lock().await;
    tokio::select! {
        _ = cancel.cancelled() => None,
        item = guard.recv() => item,
    }
}

#[allow(clippy::too_many_arguments)]
async fn collection_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
    tx: mpsc::Sender<String>,
    collector: Arc<dyn TickerCollector>,
    ctx: RunContext,
    cancel: CancellationToken,
    stats: Arc<StatCounters>,
    stage_timeout: Duration,
) {
    while let Some(symbol) = next_item(&rx, &cancel).await {
        ctx.emit(
            "collection",
            "collection_start",
            &format!("worker {worker}"),
            Some(&symbol),
            None,
            EventStatus::Success,
        )
        .await;

        let report = match tokio::time::timeout(stage_timeout, collector.collect_data(&symbol)).await
        {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                ctx.emit(
                    "collection",
                    "collection_error",
                    &e.to_string(),
                    Some(&symbol),
                    Some(serde_json::json!({"error_kind": e.error_kind()})),
                    EventStatus::Error,
                )
                .await;
                continue;
            }
            Err(_) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                ctx.emit(
                    "collection",
                    "stage_timeout",
                    &format!("collection exceeded {}s", stage_timeout.as_secs()),
                    Some(&symbol),
                    None,
                    EventStatus::Error,
                )
                .await;
                continue;
            }
        };

        let step_meta: serde_json::Value = serde_json::json!({
            "steps": report
                .steps
                .iter()
                .map(|(name, outcome)| {
                    (
                        name.clone(),
                        serde_json::json!({
                            "status": outcome.status,
                            "rows": outcome.rows,
                            "elapsed_ms": outcome.elapsed_ms,
                        }),
                    )
                })
                .collect::<serde_json::Map<String, serde_json::Value>>()
        });

        if report.ready_for_analysis() {
            stats.collected.fetch_add(1, Ordering::Relaxed);
            ctx.emit(
                "collection",
                "collection_complete",
                &format!("{} rows", report.total_rows()),
                Some(&symbol),
                Some(step_meta),
                EventStatus::Success,
            )
            .await;
            // Backpressure: a full analyze queue blocks here.
            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = tx.send(symbol) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        } else {
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            let failed: Vec<&String> = report
                .steps
                .iter()
                .filter(|(_, o)| o.status == StepStatus::Error)
                .map(|(name, _)| name)
                .collect();
            ctx.emit(
                "collection",
                "collection_incomplete",
                &format!("critical steps failed: {failed:?}"),
                Some(&symbol),
                Some(step_meta),
                EventStatus::Warning,
            )
            .await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn analysis_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
    tx: mpsc::Sender<AnalyzedTicker>,
    analysis: Arc<DeepAnalysisEngine>,
    trader: Arc<PaperTrader>,
    llm_slots: Arc<Semaphore>,
    ctx: RunContext,
    cancel: CancellationToken,
    stats: Arc<StatCounters>,
    stage_timeout: Duration,
) {
    while let Some(symbol) = next_item(&rx, &cancel).await {
        let Ok(_permit) = llm_slots.acquire().await else {
            break;
        };
        tracing::debug!("analysis worker {worker} picked up {symbol}");

        let portfolio = match trader.portfolio().await {
            Ok(portfolio) => portfolio,
            Err(e) => {
                tracing::warn!("portfolio read failed for {symbol}: {e}");
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        let analyzed = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio::time::timeout(
                stage_timeout,
                analysis.analyze(&ctx, &symbol, &portfolio),
            ) => result,
        };

        match analyzed {
            Ok(Ok(dossier)) => {
                stats.analyzed.fetch_add(1, Ordering::Relaxed);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(AnalyzedTicker { symbol, dossier }) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                // Stage emitted its own error event; the ticker is dropped
                // and the batch continues.
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("analysis failed for {symbol}: {e}");
            }
            Err(_) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                ctx.emit(
                    "analysis",
                    "stage_timeout",
                    &format!("analysis exceeded {}s", stage_timeout.as_secs()),
                    Some(&symbol),
                    None,
                    EventStatus::Error,
                )
                .await;
            }
        }
    }
}

async fn trading_worker(
    mut rx: mpsc::Receiver<AnalyzedTicker>,
    router: Arc<SignalRouter>,
    trader: Arc<PaperTrader>,
    watchlist: Arc<WatchlistManager>,
    ctx: RunContext,
    cancel: CancellationToken,
    stats: Arc<StatCounters>,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => None,
            item = rx.recv() => item,
        };
        let Some(AnalyzedTicker { symbol, dossier }) = item else {
            break;
        };

        match router.handle_dossier(&ctx, &trader, &dossier).await {
            Ok(decision) => {
                if decision.action != Signal::Hold && decision.qty > 0 {
                    stats.orders.fetch_add(1, Ordering::Relaxed);
                }
                let held = matches!(trader.position(&symbol).await, Ok(Some(_)));
                if let Err(e) = watchlist.set_position_held(&symbol, held).await {
                    tracing::warn!("watchlist position flag update failed for {symbol}: {e}");
                }
            }
            Err(e) => {
                ctx.emit(
                    "trading",
                    "order_error",
                    &e.to_string(),
                    Some(&symbol),
                    Some(serde_json::json!({"error_kind": e.error_kind()})),
                    EventStatus::Error,
                )
                .await;
            }
        }

        // Watchlist conviction bookkeeping happens on the trading worker so
        // position_held is already settled.
        if let Err(e) = watchlist.apply_dossier(&ctx, &symbol, &dossier).await {
            tracing::debug!("watchlist update skipped for {symbol}: {e}");
        }
    }
}
