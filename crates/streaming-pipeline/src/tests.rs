#[cfg(test)]
mod pipeline_tests {
    use crate::{PipelineStats, StreamingPipeline};
    use agent_core::{
        AgentResult, ChatModel, ChatOptions, ChatResponse, DailyCandle, PipelineConfig,
        RiskConfig, ScoredTicker, StepOutcome, StepReport, TickerCollector, WatchlistConfig,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use deep_analysis::DeepAnalysisEngine;
    use market_store::{EventLog, MarketStore, RunContext};
    use paper_trader::{PaperTrader, SignalRouter};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use watchlist_manager::WatchlistManager;

    /// Collector stub: fundamentals fail for symbols listed in `degraded`.
    struct StubCollector {
        degraded: Vec<String>,
    }

    #[async_trait]
    impl TickerCollector for StubCollector {
        async fn validate_ticker(&self, _symbol: &str) -> AgentResult<bool> {
            Ok(true)
        }

        async fn collect_data(&self, symbol: &str) -> AgentResult<StepReport> {
            let mut report = StepReport::new(symbol);
            report
                .steps
                .insert("price_history".to_string(), StepOutcome::ok(250, 12));
            let fundamentals = if self.degraded.iter().any(|s| s == symbol) {
                StepOutcome::error("upstream 500", 8)
            } else {
                StepOutcome::ok(1, 9)
            };
            report.steps.insert("fundamentals".to_string(), fundamentals);
            report.steps.insert("news".to_string(), StepOutcome::ok(5, 20));
            Ok(report)
        }
    }

    /// One scripted reply per funnel stage, keyed off the system prompt.
    struct StageChat {
        conviction: f64,
    }

    #[async_trait]
    impl ChatModel for StageChat {
        async fn chat(
            &self,
            system: &str,
            _user: &str,
            _options: &ChatOptions,
        ) -> AgentResult<ChatResponse> {
            let content = if system.contains("follow-up questions") {
                serde_json::json!([
                    {"question": "q1", "target_source": "news", "priority": "high"},
                    {"question": "q2", "target_source": "fundamentals", "priority": "medium"},
                    {"question": "q3", "target_source": "technicals", "priority": "medium"},
                    {"question": "q4", "target_source": "insider", "priority": "low"},
                    {"question": "q5", "target_source": "transcripts", "priority": "low"},
                ])
                .to_string()
            } else if system.contains("strictly from the provided excerpts") {
                serde_json::json!({"answer": "from context", "confidence": "medium"}).to_string()
            } else {
                serde_json::json!({
                    "executive_summary": "s",
                    "bull_case": "b",
                    "bear_case": "r",
                    "key_catalysts": [],
                    "conviction_score": self.conviction,
                    "signal_summary": "summary"
                })
                .to_string()
            };
            Ok(ChatResponse {
                content,
                tokens_in: 100,
                tokens_out: 20,
            })
        }
    }

    async fn build(
        store: &MarketStore,
        degraded: Vec<String>,
        conviction: f64,
    ) -> (StreamingPipeline, Arc<PaperTrader>, RunContext) {
        let trader = Arc::new(PaperTrader::new(store.clone()));
        trader.init(10_000.0).await.unwrap();

        let llm: Arc<dyn ChatModel> = Arc::new(StageChat { conviction });
        let analysis = Arc::new(DeepAnalysisEngine::new(
            store.clone(),
            llm,
            0.045,
            0.5,
            "research_driven",
            "notes",
            12_000,
        ));
        let router = Arc::new(SignalRouter::new(store.clone(), RiskConfig::default()));
        let watchlist = Arc::new(WatchlistManager::new(
            store.clone(),
            WatchlistConfig::default(),
        ));
        let pipeline = StreamingPipeline::new(
            PipelineConfig::default(),
            Arc::new(StubCollector { degraded }),
            analysis,
            router,
            trader.clone(),
            watchlist,
        );
        let ctx = RunContext::new(EventLog::new(store.clone()));
        (pipeline, trader, ctx)
    }

    async fn seed_candle(store: &MarketStore, symbol: &str, close: f64) {
        store
            .upsert_candles(&[DailyCandle {
                symbol: symbol.to_string(),
                date: Utc::now().date_naive(),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000_000.0,
            }])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn full_run_buys_high_conviction_and_skips_degraded() {
        let store = MarketStore::in_memory().await.unwrap();
        seed_candle(&store, "NVDA", 145.20).await;
        seed_candle(&store, "YELP", 30.0).await;

        let (pipeline, trader, ctx) = build(&store, vec!["YELP".to_string()], 0.82).await;
        // Watchlist rows exist so the trading worker can record conviction
        let watchlist = WatchlistManager::new(store.clone(), WatchlistConfig::default());
        watchlist
            .import_from_discovery(
                &ctx,
                &[
                    ScoredTicker::new("NVDA", "forums", 8.5),
                    ScoredTicker::new("YELP", "forums", 5.0),
                ],
            )
            .await
            .unwrap();

        let stats: PipelineStats = pipeline
            .run(
                &ctx,
                vec!["NVDA".to_string(), "YELP".to_string()],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.collected, 1);
        assert_eq!(stats.analyzed, 1);
        assert_eq!(stats.orders, 1);
        assert_eq!(stats.dropped, 1);

        // The degraded symbol never reached analysis
        let incomplete = ctx
            .event_log()
            .query(20, Some("collection"), Some("YELP"), Some(ctx.run_id()))
            .await
            .unwrap();
        assert!(incomplete
            .iter()
            .any(|e| e.event_type == "collection_incomplete"));
        assert!(store.latest_dossier("YELP").await.is_err());

        // The healthy one traded: position open, cash reduced, stop installed
        let position = trader.position("NVDA").await.unwrap().unwrap();
        assert_eq!(position.qty, 6);
        let summary = trader.portfolio().await.unwrap();
        assert!((summary.cash - 9_128.80).abs() < 1e-6);
        assert!(!store.active_triggers().await.unwrap().is_empty());

        // Watchlist mirrored the outcome
        let entry = store.watchlist_entry("NVDA").await.unwrap().unwrap();
        assert!(entry.position_held);
        assert_eq!(entry.last_signal, Some(agent_core::Signal::Buy));
    }

    #[tokio::test]
    async fn cancelled_run_places_no_orders() {
        let store = MarketStore::in_memory().await.unwrap();
        seed_candle(&store, "NVDA", 145.20).await;

        let (pipeline, trader, ctx) = build(&store, vec![], 0.9).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = pipeline
            .run(&ctx, vec!["NVDA".to_string()], cancel)
            .await
            .unwrap();
        assert_eq!(stats.orders, 0);
        assert!(trader.portfolio().await.unwrap().positions.is_empty());

        let done = ctx
            .event_log()
            .query(5, Some("pipeline"), None, Some(ctx.run_id()))
            .await
            .unwrap();
        assert!(done
            .iter()
            .any(|e| e.event_type == "done" && e.detail.contains("cancelled")));
    }

    #[tokio::test]
    async fn hold_band_produces_no_position() {
        let store = MarketStore::in_memory().await.unwrap();
        seed_candle(&store, "AMD", 150.0).await;

        let (pipeline, trader, ctx) = build(&store, vec![], 0.5).await;
        let stats = pipeline
            .run(&ctx, vec!["AMD".to_string()], CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.analyzed, 1);
        assert_eq!(stats.orders, 0);
        assert!(trader.portfolio().await.unwrap().positions.is_empty());
        // Dossier still persisted for the hold
        assert!(store.latest_dossier("AMD").await.is_ok());
    }
}
