use crate::risk::compute_risk_row;
use crate::technicals::compute_technicals;
use crate::validation::TickerValidator;
use agent_core::{
    AgentResult, SourcesConfig, StepOutcome, StepReport, TickerCollector, Transcript,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use market_data::{MarketDataClient, TranscriptClient};
use market_store::MarketStore;
use quant_engine::QuantInputs;
use std::sync::Arc;
use std::time::Instant;

/// Runs the twelve collection steps for a symbol and persists everything.
///
/// A failure in one step never aborts the others; the report carries the
/// per-step status map the pipeline logs and gates on.
pub struct DataCollector {
    store: MarketStore,
    market: Arc<MarketDataClient>,
    transcripts: Arc<TranscriptClient>,
    validator: Arc<TickerValidator>,
    sources: SourcesConfig,
    risk_free_rate: f64,
    kelly_fraction: f64,
}

impl DataCollector {
    pub fn new(
        store: MarketStore,
        market: Arc<MarketDataClient>,
        transcripts: Arc<TranscriptClient>,
        validator: Arc<TickerValidator>,
        sources: SourcesConfig,
        risk_free_rate: f64,
        kelly_fraction: f64,
    ) -> Self {
        Self {
            store,
            market,
            transcripts,
            validator,
            sources,
            risk_free_rate,
            kelly_fraction,
        }
    }

    pub fn validator(&self) -> &Arc<TickerValidator> {
        &self.validator
    }

    async fn step_price_history(&self, symbol: &str) -> StepOutcome {
        let started = Instant::now();
        match self.market.daily_candles(symbol, 400).await {
            Ok(candles) => match self.store.upsert_candles(&candles).await {
                Ok(rows) => StepOutcome::ok(rows, ms(started)),
                Err(e) => StepOutcome::error(e.to_string(), ms(started)),
            },
            Err(e) => StepOutcome::error(e.to_string(), ms(started)),
        }
    }

    async fn step_fundamentals(&self, symbol: &str) -> StepOutcome {
        let started = Instant::now();
        let today = Utc::now().date_naive();
        if let Ok(existing) = self.store.latest_fundamentals(symbol).await {
            if existing.snapshot_date == today {
                return StepOutcome::skipped("already collected today");
            }
        }
        match self.market.fundamentals_snapshot(symbol).await {
            Ok(snapshot) => match self.store.upsert_fundamentals(&snapshot).await {
                Ok(()) => StepOutcome::ok(1, ms(started)),
                Err(e) => StepOutcome::error(e.to_string(), ms(started)),
            },
            Err(e) => StepOutcome::error(e.to_string(), ms(started)),
        }
    }

    async fn step_financials(&self, symbol: &str) -> StepOutcome {
        let started = Instant::now();
        match self.market.financial_history(symbol).await {
            Ok(rows) => match self.store.upsert_financials(&rows).await {
                Ok(n) => StepOutcome::ok(n, ms(started)),
                Err(e) => StepOutcome::error(e.to_string(), ms(started)),
            },
            Err(e) => StepOutcome::error(e.to_string(), ms(started)),
        }
    }

    async fn step_balance_sheet(&self, symbol: &str) -> StepOutcome {
        let started = Instant::now();
        match self.market.balance_sheet_history(symbol).await {
            Ok(rows) => match self.store.upsert_balance_rows(&rows).await {
                Ok(n) => StepOutcome::ok(n, ms(started)),
                Err(e) => StepOutcome::error(e.to_string(), ms(started)),
            },
            Err(e) => StepOutcome::error(e.to_string(), ms(started)),
        }
    }

    async fn step_cash_flows(&self, symbol: &str) -> StepOutcome {
        let started = Instant::now();
        match self.market.cash_flow_history(symbol).await {
            Ok(rows) => match self.store.upsert_cash_flow_rows(&rows).await {
                Ok(n) => StepOutcome::ok(n, ms(started)),
                Err(e) => StepOutcome::error(e.to_string(), ms(started)),
            },
            Err(e) => StepOutcome::error(e.to_string(), ms(started)),
        }
    }

    async fn step_analyst(&self, symbol: &str) -> StepOutcome {
        let started = Instant::now();
        let today = Utc::now().date_naive();
        if let Ok(Some(existing)) = self.store.latest_analyst(symbol).await {
            if existing.snapshot_date == today {
                return StepOutcome::skipped("already collected today");
            }
        }
        match self.market.analyst_snapshot(symbol).await {
            Ok(snapshot) => match self.store.upsert_analyst(&snapshot).await {
                Ok(()) => StepOutcome::ok(1, ms(started)),
                Err(e) => StepOutcome::error(e.to_string(), ms(started)),
            },
            Err(e) => StepOutcome::error(e.to_string(), ms(started)),
        }
    }

    async fn step_insider(&self, symbol: &str) -> StepOutcome {
        let started = Instant::now();
        let today = Utc::now().date_naive();
        if let Ok(Some(existing)) = self.store.latest_insider(symbol).await {
            if existing.snapshot_date == today {
                return StepOutcome::skipped("already collected today");
            }
        }
        match self.market.insider_summary(symbol).await {
            Ok(summary) => match self.store.upsert_insider(&summary).await {
                Ok(()) => StepOutcome::ok(1, ms(started)),
                Err(e) => StepOutcome::error(e.to_string(), ms(started)),
            },
            Err(e) => StepOutcome::error(e.to_string(), ms(started)),
        }
    }

    async fn step_earnings(&self, symbol: &str) -> StepOutcome {
        let started = Instant::now();
        match self.market.earnings_calendar(symbol).await {
            Ok(events) => match self.store.upsert_earnings(&events).await {
                Ok(n) => StepOutcome::ok(n, ms(started)),
                Err(e) => StepOutcome::error(e.to_string(), ms(started)),
            },
            Err(e) => StepOutcome::error(e.to_string(), ms(started)),
        }
    }

    async fn step_news(&self, symbol: &str) -> StepOutcome {
        let started = Instant::now();
        match self.market.news(symbol, 25).await {
            Ok(articles) => match self.store.insert_news(&articles).await {
                Ok(n) => StepOutcome::ok(n, ms(started)),
                Err(e) => StepOutcome::error(e.to_string(), ms(started)),
            },
            Err(e) => StepOutcome::error(e.to_string(), ms(started)),
        }
    }

    async fn step_transcripts(&self, symbol: &str) -> StepOutcome {
        let started = Instant::now();
        if self.sources.transcript_channels.is_empty() {
            return StepOutcome::skipped("no transcript channels configured");
        }
        let window_start = Utc::now() - Duration::days(7);
        let mut stored = 0i64;
        let mut last_error: Option<String> = None;

        for channel in &self.sources.transcript_channels {
            let videos = match self
                .transcripts
                .channel_videos(&channel.channel_id, window_start)
                .await
            {
                Ok(videos) => videos,
                Err(e) => {
                    last_error = Some(e.to_string());
                    continue;
                }
            };
            for video in videos {
                if !video.title.to_uppercase().contains(&symbol.to_uppercase()) {
                    continue;
                }
                match self.transcripts.fetch_transcript(&video.video_id).await {
                    Ok(text) if !text.trim().is_empty() => {
                        let transcript = Transcript {
                            video_id: video.video_id.clone(),
                            symbol: symbol.to_string(),
                            title: video.title.clone(),
                            channel: video.channel.clone(),
                            published_at: video.published_at,
                            duration_secs: 0,
                            text,
                        };
                        match self.store.insert_transcripts(&[transcript]).await {
                            Ok(n) => stored += n,
                            Err(e) => last_error = Some(e.to_string()),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => last_error = Some(e.to_string()),
                }
            }
        }

        if stored == 0 {
            if let Some(message) = last_error {
                return StepOutcome::error(message, ms(started));
            }
        }
        StepOutcome::ok(stored, ms(started))
    }

    /// Compute-and-persist steps that read the freshly stored candles.
    async fn step_technicals(&self, symbol: &str) -> StepOutcome {
        let started = Instant::now();
        let candles = match self.load_candles(symbol).await {
            Ok(candles) => candles,
            Err(e) => return StepOutcome::error(e.to_string(), ms(started)),
        };
        match compute_technicals(symbol, &candles) {
            Some(row) => match self.store.upsert_technicals(&row).await {
                Ok(()) => StepOutcome::ok(1, ms(started)),
                Err(e) => StepOutcome::error(e.to_string(), ms(started)),
            },
            None => StepOutcome::error("insufficient candles for indicators", ms(started)),
        }
    }

    async fn step_risk_metrics(&self, symbol: &str) -> StepOutcome {
        let started = Instant::now();
        let candles = match self.load_candles(symbol).await {
            Ok(candles) => candles,
            Err(e) => return StepOutcome::error(e.to_string(), ms(started)),
        };
        let rest = QuantInputs {
            fundamentals: self.store.latest_fundamentals(symbol).await.ok(),
            financials: self.store.financials(symbol).await.unwrap_or_default(),
            balance: self.store.balance_rows(symbol).await.unwrap_or_default(),
            cash_flows: self.store.cash_flow_rows(symbol).await.unwrap_or_default(),
            ..Default::default()
        };
        match compute_risk_row(symbol, &candles, rest, self.risk_free_rate, self.kelly_fraction) {
            Some(row) => match self.store.upsert_risk_row(&row).await {
                Ok(()) => StepOutcome::ok(1, ms(started)),
                Err(e) => StepOutcome::error(e.to_string(), ms(started)),
            },
            None => StepOutcome::error("insufficient candles for risk metrics", ms(started)),
        }
    }

    async fn load_candles(&self, symbol: &str) -> AgentResult<Vec<agent_core::DailyCandle>> {
        let today = Utc::now().date_naive();
        self.store
            .candles(symbol, today - Duration::days(420), today)
            .await
    }
}

#[async_trait]
impl TickerCollector for DataCollector {
    async fn validate_ticker(&self, symbol: &str) -> AgentResult<bool> {
        self.validator.validate(symbol).await
    }

    fn reset_validation_cache(&self) {
        self.validator.reset_cache();
    }

    async fn collect_data(&self, symbol: &str) -> AgentResult<StepReport> {
        let mut report = StepReport::new(symbol);

        // Fetch steps are independent I/O and run concurrently.
        let (
            price_history,
            fundamentals,
            financials,
            balance_sheet,
            cash_flows,
            analyst,
            insider,
            earnings,
            news,
            transcripts,
        ) = tokio::join!(
            self.step_price_history(symbol),
            self.step_fundamentals(symbol),
            self.step_financials(symbol),
            self.step_balance_sheet(symbol),
            self.step_cash_flows(symbol),
            self.step_analyst(symbol),
            self.step_insider(symbol),
            self.step_earnings(symbol),
            self.step_news(symbol),
            self.step_transcripts(symbol),
        );

        report.steps.insert("price_history".to_string(), price_history);
        report.steps.insert("fundamentals".to_string(), fundamentals);
        report.steps.insert("financial_history".to_string(), financials);
        report.steps.insert("balance_sheet".to_string(), balance_sheet);
        report.steps.insert("cash_flows".to_string(), cash_flows);
        report.steps.insert("analyst_data".to_string(), analyst);
        report.steps.insert("insider_activity".to_string(), insider);
        report.steps.insert("earnings_calendar".to_string(), earnings);
        report.steps.insert("news".to_string(), news);
        report.steps.insert("transcripts".to_string(), transcripts);

        // Derived steps read the candles persisted above.
        let technicals = self.step_technicals(symbol).await;
        report.steps.insert("technicals".to_string(), technicals);
        let risk = self.step_risk_metrics(symbol).await;
        report.steps.insert("risk_metrics".to_string(), risk);

        tracing::info!(
            "collection for {symbol}: {} rows across {} steps (ready={})",
            report.total_rows(),
            report.steps.len(),
            report.ready_for_analysis()
        );
        Ok(report)
    }
}

fn ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}
