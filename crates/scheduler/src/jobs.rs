use crate::market_hours::MarketCalendar;
use agent_core::{AgentError, AgentResult, EventStatus, Signal};
use chrono::Utc;
use cron::Schedule;
use market_store::{EventLog, MarketStore, RunContext};
use paper_trader::PaperTrader;
use price_monitor::PriceMonitor;
use serde::Serialize;
use social_discovery::DiscoveryEngine;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streaming_pipeline::StreamingPipeline;
use tokio_util::sync::CancellationToken;
use watchlist_manager::WatchlistManager;

const PRE_MARKET_CRON: &str = "0 0 6 * * Mon-Fri";
const INTRADAY_CRON: &str = "0 30 10,12,14 * * Mon-Fri";
const EOD_CRON: &str = "0 30 16 * * Mon-Fri";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobName {
    PreMarket,
    Intraday,
    EndOfDay,
}

impl JobName {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "premarket" | "pre_market" | "pre-market" => Some(JobName::PreMarket),
            "intraday" => Some(JobName::Intraday),
            "eod" | "end_of_day" => Some(JobName::EndOfDay),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobName::PreMarket => "premarket",
            JobName::Intraday => "intraday",
            JobName::EndOfDay => "eod",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub market_open: bool,
    pub next_premarket: Option<String>,
    pub next_intraday: Option<String>,
    pub next_eod: Option<String>,
}

/// Time-zoned job driver: pre-market full runs, intraday re-analysis, EOD
/// housekeeping, and the monitor tick. Owns the root cancellation token
/// (the kill switch).
pub struct Scheduler {
    store: MarketStore,
    events: EventLog,
    discovery: Arc<DiscoveryEngine>,
    watchlist: Arc<WatchlistManager>,
    pipeline: Arc<StreamingPipeline>,
    trader: Arc<PaperTrader>,
    monitor: Arc<PriceMonitor>,
    calendar: MarketCalendar,
    monitor_interval: Duration,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: MarketStore,
        events: EventLog,
        discovery: Arc<DiscoveryEngine>,
        watchlist: Arc<WatchlistManager>,
        pipeline: Arc<StreamingPipeline>,
        trader: Arc<PaperTrader>,
        monitor: Arc<PriceMonitor>,
        calendar: MarketCalendar,
        monitor_interval_secs: u64,
    ) -> Self {
        Self {
            store,
            events,
            discovery,
            watchlist,
            pipeline,
            trader,
            monitor,
            calendar,
            monitor_interval: Duration::from_secs(monitor_interval_secs),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> SchedulerStatus {
        let tz = self.calendar.timezone();
        let next = |expr: &str| {
            Schedule::from_str(expr)
                .ok()
                .and_then(|s| s.upcoming(tz).next())
                .map(|dt| dt.to_rfc3339())
        };
        SchedulerStatus {
            running: self.is_running(),
            market_open: self.calendar.is_market_open(),
            next_premarket: next(PRE_MARKET_CRON),
            next_intraday: next(INTRADAY_CRON),
            next_eod: next(EOD_CRON),
        }
    }

    /// Kill switch: cancels the root context, cancels pending orders,
    /// deactivates triggers. Open positions are left untouched.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.running.store(false, Ordering::Relaxed);
        let cancelled_orders = self.store.cancel_pending_orders().await.unwrap_or(0);
        let cancelled_triggers = self.store.cancel_all_active_triggers().await.unwrap_or(0);
        let ctx = RunContext::new(self.events.clone());
        ctx.emit(
            "scheduler",
            "shutdown",
            &format!(
                "kill switch: {cancelled_orders} pending orders and {cancelled_triggers} \
                 triggers cancelled"
            ),
            None,
            None,
            EventStatus::Warning,
        )
        .await;
    }

    /// Main loop: sleeps toward the next cron firing, ticks the monitor on
    /// its own interval, exits on cancellation.
    pub async fn run_forever(self: Arc<Self>) {
        self.running.store(true, Ordering::Relaxed);
        let tz = self.calendar.timezone();
        let schedules: Vec<(JobName, Schedule)> = [
            (JobName::PreMarket, PRE_MARKET_CRON),
            (JobName::Intraday, INTRADAY_CRON),
            (JobName::EndOfDay, EOD_CRON),
        ]
        .into_iter()
        .filter_map(|(job, expr)| Schedule::from_str(expr).ok().map(|s| (job, s)))
        .collect();

        let mut monitor_tick = tokio::time::interval(self.monitor_interval);
        monitor_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let next_job = schedules
                .iter()
                .filter_map(|(job, schedule)| {
                    schedule.upcoming(tz).next().map(|at| (*job, at))
                })
                .min_by_key(|(_, at)| *at);

            let sleep_duration = next_job
                .map(|(_, at)| {
                    (at.with_timezone(&Utc) - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::from_secs(1))
                })
                .unwrap_or(Duration::from_secs(3600));

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("scheduler loop exiting (cancelled)");
                    break;
                }
                _ = monitor_tick.tick() => {
                    let ctx = RunContext::new(self.events.clone());
                    if let Err(e) = self.monitor.tick(&ctx, self.calendar.is_market_open()).await {
                        tracing::warn!("monitor tick failed: {e}");
                    }
                }
                _ = tokio::time::sleep(sleep_duration) => {
                    if let Some((job, _)) = next_job {
                        if let Err(e) = self.trigger(job).await {
                            tracing::error!("scheduled job {} failed: {e}", job.as_str());
                        }
                    }
                }
            }
        }
        self.running.store(false, Ordering::Relaxed);
    }

    /// Run one job now (also the manual-trigger entry point).
    pub async fn trigger(&self, job: JobName) -> AgentResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let ctx = RunContext::new(self.events.clone());
        ctx.emit(
            "scheduler",
            "job_start",
            job.as_str(),
            None,
            None,
            EventStatus::Success,
        )
        .await;

        let result = match job {
            JobName::PreMarket => self.run_premarket(&ctx).await,
            JobName::Intraday => self.run_intraday(&ctx).await,
            JobName::EndOfDay => self.run_eod(&ctx).await,
        };

        match &result {
            Ok(()) => {
                ctx.emit(
                    "scheduler",
                    "job_complete",
                    job.as_str(),
                    None,
                    None,
                    EventStatus::Success,
                )
                .await
            }
            Err(e) => {
                ctx.emit(
                    "scheduler",
                    "job_error",
                    &format!("{}: {e}", job.as_str()),
                    None,
                    Some(serde_json::json!({"error_kind": e.error_kind()})),
                    EventStatus::Error,
                )
                .await
            }
        }
        result
    }

    /// Pre-market: discovery -> watchlist import -> full pipeline. Symbols
    /// already analyzed today are skipped so a same-day re-run never
    /// double-creates dossiers or positions.
    async fn run_premarket(&self, ctx: &RunContext) -> AgentResult<()> {
        self.pipeline.reset_validation_cache();
        let scored = self.discovery.run(ctx).await?;
        let imported = self.watchlist.import_from_discovery(ctx, &scored).await?;
        tracing::info!("pre-market: imported {} new symbols", imported.len());

        let today = Utc::now().date_naive();
        let mut symbols = Vec::new();
        for symbol in self.watchlist.active_symbols().await? {
            if self.store.dossier_exists_on(&symbol, today).await? {
                tracing::info!("pre-market: {symbol} already analyzed today, skipping");
                continue;
            }
            symbols.push(symbol);
        }
        if symbols.is_empty() {
            return Ok(());
        }
        self.pipeline
            .run(ctx, symbols, self.cancel.child_token())
            .await?;
        Ok(())
    }

    /// Intraday: re-analyze only the symbols currently flagged BUY.
    async fn run_intraday(&self, ctx: &RunContext) -> AgentResult<()> {
        let symbols: Vec<String> = self
            .watchlist
            .active_entries()
            .await?
            .into_iter()
            .filter(|e| e.last_signal == Some(Signal::Buy))
            .map(|e| e.symbol)
            .collect();
        if symbols.is_empty() {
            return Ok(());
        }
        self.pipeline
            .run(ctx, symbols, self.cancel.child_token())
            .await?;
        Ok(())
    }

    /// End of day: snapshot, stale-entry sweep, daily report.
    async fn run_eod(&self, ctx: &RunContext) -> AgentResult<()> {
        let snapshot = self.trader.snapshot().await?;
        let stale = self.watchlist.remove_stale(ctx).await?;

        let orders_today = self
            .store
            .order_count_on(Utc::now().date_naive())
            .await
            .unwrap_or(0);
        let report = format!(
            "EOD: total {:.2} (cash {:.2}, positions {:.2}), realized {:.2}, unrealized {:.2}, \
             {orders_today} orders today, {} stale symbols rotated out",
            snapshot.total_value,
            snapshot.cash,
            snapshot.positions_value,
            snapshot.realized_pnl,
            snapshot.unrealized_pnl,
            stale.len()
        );
        tracing::info!("{report}");
        ctx.emit(
            "scheduler",
            "daily_report",
            &report,
            None,
            Some(serde_json::json!({
                "total_value": snapshot.total_value,
                "realized_pnl": snapshot.realized_pnl,
                "orders_today": orders_today,
                "stale_removed": stale,
            })),
            EventStatus::Success,
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_parse() {
        assert_eq!(JobName::parse("premarket"), Some(JobName::PreMarket));
        assert_eq!(JobName::parse("pre-market"), Some(JobName::PreMarket));
        assert_eq!(JobName::parse("intraday"), Some(JobName::Intraday));
        assert_eq!(JobName::parse("eod"), Some(JobName::EndOfDay));
        assert_eq!(JobName::parse("lunch"), None);
    }

    #[test]
    fn cron_expressions_are_valid() {
        for expr in [PRE_MARKET_CRON, INTRADAY_CRON, EOD_CRON] {
            assert!(Schedule::from_str(expr).is_ok(), "{expr}");
        }
    }

    #[test]
    fn intraday_fires_at_half_past() {
        let schedule = Schedule::from_str(INTRADAY_CRON).unwrap();
        let next = schedule.upcoming(chrono_tz::US::Eastern).next().unwrap();
        assert_eq!(next.format("%M:%S").to_string(), "30:00");
        let hour: u32 = next.format("%H").to_string().parse().unwrap();
        assert!(matches!(hour, 10 | 12 | 14));
    }
}
