use crate::questions::QuestionGenerator;
use crate::rag::RagEngine;
use crate::synthesizer::DossierSynthesizer;
use agent_core::{
    AgentResult, ChatModel, EventStatus, PortfolioSummary, QuantScorecard, TickerDossier,
};
use chrono::{Duration, Utc};
use market_store::{MarketStore, RunContext};
use quant_engine::{QuantEngine, QuantInputs};
use std::sync::Arc;

/// Drives one ticker through the four analysis stages in order:
/// scorecard -> questions -> retrieval answers -> dossier synthesis.
///
/// Each stage completion (or failure) is recorded on the event log; stage
/// failures surface as errors so the pipeline can drop the ticker without
/// touching its batch siblings.
pub struct DeepAnalysisEngine {
    store: MarketStore,
    quant: QuantEngine,
    questions: QuestionGenerator,
    rag: RagEngine,
    synthesizer: DossierSynthesizer,
}

impl DeepAnalysisEngine {
    pub fn new(
        store: MarketStore,
        llm: Arc<dyn ChatModel>,
        risk_free_rate: f64,
        kelly_fraction: f64,
        strategist_mode: &str,
        strategy_text: &str,
        synthesis_token_budget: usize,
    ) -> Self {
        Self {
            quant: QuantEngine::new(risk_free_rate, kelly_fraction),
            questions: QuestionGenerator::new(Arc::clone(&llm)),
            rag: RagEngine::new(store.clone(), Arc::clone(&llm)),
            synthesizer: DossierSynthesizer::new(
                llm,
                strategist_mode,
                strategy_text,
                synthesis_token_budget,
            ),
            store,
        }
    }

    /// Assemble scorecard inputs from the store and run the math stage.
    pub async fn scorecard(&self, symbol: &str) -> AgentResult<QuantScorecard> {
        let today = Utc::now().date_naive();
        let inputs = QuantInputs {
            candles: self
                .store
                .candles(symbol, today - Duration::days(420), today)
                .await?,
            fundamentals: self.store.latest_fundamentals(symbol).await.ok(),
            financials: self.store.financials(symbol).await.unwrap_or_default(),
            balance: self.store.balance_rows(symbol).await.unwrap_or_default(),
            cash_flows: self.store.cash_flow_rows(symbol).await.unwrap_or_default(),
            insider: self.store.latest_insider(symbol).await.unwrap_or(None),
            next_earnings: self.store.next_earnings(symbol, today).await.unwrap_or(None),
        };
        let card = self.quant.compute(symbol, &inputs);
        self.store.save_scorecard(&card).await?;
        Ok(card)
    }

    /// Full four-stage funnel for one symbol.
    pub async fn analyze(
        &self,
        ctx: &RunContext,
        symbol: &str,
        portfolio: &PortfolioSummary,
    ) -> AgentResult<TickerDossier> {
        // Stage 1: pure-math scorecard
        let card = match self.scorecard(symbol).await {
            Ok(card) => card,
            Err(e) => {
                self.stage_error(ctx, symbol, "scorecard_error", &e).await;
                return Err(e);
            }
        };
        ctx.emit(
            "analysis",
            "scorecard_complete",
            &format!("{} flags", card.flags.len()),
            Some(symbol),
            Some(serde_json::json!({"flags": &card.flags})),
            EventStatus::Success,
        )
        .await;

        // Stage 2: typed follow-up questions
        let questions = match self.questions.generate(&card).await {
            Ok(questions) => questions,
            Err(e) => {
                self.stage_error(ctx, symbol, "questions_error", &e).await;
                return Err(e);
            }
        };
        ctx.emit(
            "analysis",
            "questions_complete",
            &format!("{} questions", questions.len()),
            Some(symbol),
            Some(serde_json::json!({
                "sources": questions.iter().map(|q| q.target_source.as_str()).collect::<Vec<_>>()
            })),
            EventStatus::Success,
        )
        .await;

        // Stage 3: retrieval-grounded answers (degrades per-question, never fails)
        let qa_pairs = self.rag.answer_all(symbol, &questions).await;
        ctx.emit(
            "analysis",
            "answers_complete",
            &format!("{} answers", qa_pairs.len()),
            Some(symbol),
            Some(serde_json::json!({
                "confidences": qa_pairs.iter().map(|p| p.confidence.as_str()).collect::<Vec<_>>()
            })),
            EventStatus::Success,
        )
        .await;

        // Stage 4: synthesis
        let version = self
            .store
            .latest_dossier(symbol)
            .await
            .map(|d| d.version + 1)
            .unwrap_or(1);
        let dossier = match self
            .synthesizer
            .synthesize(&card, &questions, &qa_pairs, portfolio, 0, version)
            .await
        {
            Ok(dossier) => dossier,
            Err(e) => {
                self.stage_error(ctx, symbol, "dossier_error", &e).await;
                return Err(e);
            }
        };

        self.store.save_dossier(&dossier).await?;
        ctx.emit(
            "analysis",
            "dossier_complete",
            &format!(
                "conviction {:.2} ({})",
                dossier.conviction_score,
                agent_core::conviction_band(dossier.conviction_score)
            ),
            Some(symbol),
            Some(serde_json::json!({
                "conviction": dossier.conviction_score,
                "version": dossier.version,
                "tokens": dossier.total_tokens,
            })),
            EventStatus::Success,
        )
        .await;
        Ok(dossier)
    }

    async fn stage_error(
        &self,
        ctx: &RunContext,
        symbol: &str,
        event_type: &str,
        error: &agent_core::AgentError,
    ) {
        ctx.emit(
            "analysis",
            event_type,
            &error.to_string(),
            Some(symbol),
            Some(serde_json::json!({"error_kind": error.error_kind()})),
            EventStatus::Error,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{AgentResult, ChatOptions, ChatResponse, DailyCandle};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use market_store::EventLog;

    /// Routes each funnel stage's call by its system prompt.
    struct FunnelChat;

    #[async_trait]
    impl ChatModel for FunnelChat {
        async fn chat(
            &self,
            system: &str,
            _user: &str,
            _options: &ChatOptions,
        ) -> AgentResult<ChatResponse> {
            let content = if system.contains("follow-up questions") {
                serde_json::json!([
                    {"question": "What moved the price?", "target_source": "news", "priority": "high"},
                    {"question": "Valuation vs growth?", "target_source": "fundamentals", "priority": "medium"},
                    {"question": "Trend intact?", "target_source": "technicals", "priority": "medium"},
                    {"question": "Insider signal?", "target_source": "insider", "priority": "low"},
                    {"question": "Video chatter?", "target_source": "transcripts", "priority": "low"},
                ])
                .to_string()
            } else if system.contains("strictly from the provided excerpts") {
                serde_json::json!({"answer": "covered in context", "confidence": "medium"})
                    .to_string()
            } else {
                serde_json::json!({
                    "executive_summary": "Setup is constructive.",
                    "bull_case": "Momentum and growth align.",
                    "bear_case": "Multiple compression risk.",
                    "key_catalysts": ["earnings"],
                    "conviction_score": 0.82,
                    "signal_summary": "Strong BUY"
                })
                .to_string()
            };
            Ok(ChatResponse {
                content,
                tokens_in: 800,
                tokens_out: 120,
            })
        }
    }

    async fn seeded_store() -> MarketStore {
        let store = MarketStore::in_memory().await.unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let candles: Vec<DailyCandle> = (0..260)
            .map(|i| {
                let close = 100.0 + i as f64 * 0.2;
                DailyCandle {
                    symbol: "NVDA".to_string(),
                    date: start + Duration::days(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000_000.0,
                }
            })
            .collect();
        store.upsert_candles(&candles).await.unwrap();
        store
    }

    fn empty_portfolio() -> PortfolioSummary {
        PortfolioSummary {
            cash: 10_000.0,
            positions_value: 0.0,
            total_value: 10_000.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            positions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn funnel_produces_and_persists_a_dossier() {
        let store = seeded_store().await;
        let ctx = RunContext::new(EventLog::new(store.clone()));
        let engine = DeepAnalysisEngine::new(
            store.clone(),
            Arc::new(FunnelChat),
            0.045,
            0.5,
            "research_driven",
            "corroborate before acting",
            12_000,
        );

        let dossier = engine
            .analyze(&ctx, "NVDA", &empty_portfolio())
            .await
            .unwrap();
        assert_eq!(dossier.qa_pairs.len(), 5);
        assert!((dossier.conviction_score - 0.82).abs() < 1e-9);
        assert_eq!(dossier.version, 1);

        // Persisted and superseding
        let loaded = store.latest_dossier("NVDA").await.unwrap();
        assert_eq!(loaded.generated_at, dossier.generated_at);

        // Scorecard persisted by stage 1
        assert!(store.latest_scorecard("NVDA").await.is_ok());

        // All four stage events on the log, newest first
        let events = ctx
            .event_log()
            .query(10, Some("analysis"), None, Some(ctx.run_id()))
            .await
            .unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "dossier_complete",
                "answers_complete",
                "questions_complete",
                "scorecard_complete"
            ]
        );
    }

    #[tokio::test]
    async fn second_dossier_bumps_version() {
        let store = seeded_store().await;
        let ctx = RunContext::new(EventLog::new(store.clone()));
        let engine = DeepAnalysisEngine::new(
            store.clone(),
            Arc::new(FunnelChat),
            0.045,
            0.5,
            "research_driven",
            "notes",
            12_000,
        );
        engine.analyze(&ctx, "NVDA", &empty_portfolio()).await.unwrap();
        let second = engine.analyze(&ctx, "NVDA", &empty_portfolio()).await.unwrap();
        assert_eq!(second.version, 2);
    }
}
