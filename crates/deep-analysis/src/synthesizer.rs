use agent_core::{
    AgentError, AgentResult, AnswerConfidence, ChatModel, ChatOptions, PortfolioSummary, QAPair,
    QuantScorecard, Question, TickerDossier,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct WireDossier {
    executive_summary: String,
    bull_case: String,
    bear_case: String,
    #[serde(default)]
    key_catalysts: Vec<String>,
    conviction_score: f64,
    signal_summary: String,
}

/// Final synthesis: one LLM call combining the scorecard, the answered
/// questions, and a compact portfolio context into the decision dossier.
pub struct DossierSynthesizer {
    llm: Arc<dyn ChatModel>,
    strategist_mode: String,
    strategy_text: String,
    /// Estimated-token ceiling for the prompt
    token_budget: usize,
}

impl DossierSynthesizer {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        strategist_mode: impl Into<String>,
        strategy_text: impl Into<String>,
        token_budget: usize,
    ) -> Self {
        Self {
            llm,
            strategist_mode: strategist_mode.into(),
            strategy_text: strategy_text.into(),
            token_budget,
        }
    }

    pub async fn synthesize(
        &self,
        card: &QuantScorecard,
        questions: &[Question],
        qa_pairs: &[QAPair],
        portfolio: &PortfolioSummary,
        tokens_so_far: i64,
        version: i64,
    ) -> AgentResult<TickerDossier> {
        let kept = fit_to_budget(questions, qa_pairs, self.token_budget, estimate_tokens);

        let system = self.system_prompt();
        let user = self.user_prompt(card, &kept, portfolio)?;

        let response = self.llm.chat(&system, &user, &ChatOptions::json()).await?;
        let wire: WireDossier = serde_json::from_str(&response.content)
            .map_err(|e| AgentError::SynthesisFailed(format!("bad dossier payload: {e}")))?;

        let conviction_score = wire.conviction_score.clamp(0.0, 1.0);
        let mut key_catalysts = wire.key_catalysts;
        key_catalysts.truncate(5);

        Ok(TickerDossier {
            symbol: card.symbol.clone(),
            generated_at: Utc::now(),
            version,
            scorecard: card.clone(),
            qa_pairs: qa_pairs.to_vec(),
            executive_summary: wire.executive_summary,
            bull_case: wire.bull_case,
            bear_case: wire.bear_case,
            key_catalysts,
            conviction_score,
            signal_summary: wire.signal_summary,
            total_tokens: tokens_so_far + response.tokens_in + response.tokens_out,
        })
    }

    fn system_prompt(&self) -> String {
        let framing = match self.strategist_mode.as_str() {
            "aggressive" => {
                "You are a decisive portfolio strategist. When the evidence leans positive, \
                 favor action over hesitation."
            }
            _ => {
                "You are a research-driven portfolio strategist. Only support action when the \
                 evidence is well-corroborated; default to caution otherwise."
            }
        };
        format!(
            "{framing}\n\nHouse strategy notes:\n{}\n\nProduce a decision dossier as JSON with \
             fields executive_summary (3-5 sentences), bull_case (2-3 sentences), bear_case \
             (2-3 sentences), key_catalysts (up to 5 strings), conviction_score (0.0-1.0), and \
             signal_summary (one line).",
            self.strategy_text
        )
    }

    fn user_prompt(
        &self,
        card: &QuantScorecard,
        qa_pairs: &[QAPair],
        portfolio: &PortfolioSummary,
    ) -> AgentResult<String> {
        let card_json =
            serde_json::to_string(card).map_err(|e| AgentError::SynthesisFailed(e.to_string()))?;
        let qa_text: String = qa_pairs
            .iter()
            .map(|p| {
                format!(
                    "Q ({}, {}): {}\nA: {}\n",
                    p.source.as_str(),
                    p.confidence.as_str(),
                    p.question,
                    p.answer
                )
            })
            .collect();
        let positions: Vec<String> = portfolio
            .positions
            .iter()
            .map(|p| format!("{} x{} @ {:.2} (uPnL {:.2})", p.symbol, p.qty, p.avg_entry_price, p.unrealized_pnl))
            .collect();

        Ok(format!(
            "Scorecard:\n{card_json}\n\nResearch Q&A:\n{qa_text}\nPortfolio: cash {:.2}, total \
             value {:.2}, positions: [{}]\n\nWrite the dossier JSON for {}.",
            portfolio.cash,
            portfolio.total_value,
            positions.join("; "),
            card.symbol
        ))
    }
}

/// ~4 characters per token, the usual rough estimate.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Token-budget degradation: drop whole QA pairs in ascending confidence
/// order; if one pair remains and the budget still fails, blank the lowest
/// priority question's text first, then its answer.
fn fit_to_budget(
    questions: &[Question],
    qa_pairs: &[QAPair],
    budget_tokens: usize,
    estimate: fn(&str) -> usize,
) -> Vec<QAPair> {
    let mut kept: Vec<QAPair> = qa_pairs.to_vec();

    let pair_tokens = |pairs: &[QAPair]| -> usize {
        pairs
            .iter()
            .map(|p| estimate(&p.question) + estimate(&p.answer))
            .sum()
    };

    while kept.len() > 1 && pair_tokens(&kept) > budget_tokens {
        let (drop_index, _) = kept
            .iter()
            .enumerate()
            .min_by_key(|(i, p)| (p.confidence, std::cmp::Reverse(*i)))
            .expect("non-empty");
        kept.remove(drop_index);
    }

    if pair_tokens(&kept) > budget_tokens {
        // A single oversized pair: strip the question text first, keyed off
        // the generated question priorities, then the answer.
        let lowest_priority_text = questions
            .iter()
            .max_by_key(|q| q.priority)
            .map(|q| q.text.clone());
        for pair in kept.iter_mut() {
            if Some(&pair.question) == lowest_priority_text.as_ref() {
                pair.question.clear();
            }
        }
        if pair_tokens(&kept) > budget_tokens {
            for pair in kept.iter_mut() {
                pair.answer.clear();
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{ChatResponse, Priority, QuestionSource};
    use async_trait::async_trait;

    struct ScriptedChat {
        reply: String,
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(
            &self,
            _system: &str,
            _user: &str,
            _options: &ChatOptions,
        ) -> AgentResult<ChatResponse> {
            Ok(ChatResponse {
                content: self.reply.clone(),
                tokens_in: 2000,
                tokens_out: 300,
            })
        }
    }

    fn pair(question: &str, answer: &str, confidence: AnswerConfidence) -> QAPair {
        QAPair {
            question: question.to_string(),
            answer: answer.to_string(),
            source: QuestionSource::News,
            confidence,
        }
    }

    fn portfolio() -> PortfolioSummary {
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
    async fn dossier_fields_come_from_the_model() {
        let reply = serde_json::json!({
            "executive_summary": "Strong setup across quant and news factors.",
            "bull_case": "Demand acceleration continues.",
            "bear_case": "Valuation is stretched.",
            "key_catalysts": ["earnings", "product launch", "a", "b", "c", "d", "e"],
            "conviction_score": 1.4,
            "signal_summary": "Strong BUY"
        })
        .to_string();
        let synthesizer = DossierSynthesizer::new(
            Arc::new(ScriptedChat { reply }),
            "research_driven",
            "prefer corroborated theses",
            12_000,
        );
        let card = QuantScorecard {
            symbol: "NVDA".to_string(),
            as_of: Utc::now(),
            ..Default::default()
        };
        let dossier = synthesizer
            .synthesize(&card, &[], &[], &portfolio(), 1000, 3)
            .await
            .unwrap();

        assert_eq!(dossier.symbol, "NVDA");
        assert_eq!(dossier.version, 3);
        // Clamped into [0,1] and catalysts capped at 5
        assert!((dossier.conviction_score - 1.0).abs() < 1e-9);
        assert_eq!(dossier.key_catalysts.len(), 5);
        assert_eq!(dossier.total_tokens, 1000 + 2000 + 300);
    }

    #[test]
    fn budget_drops_lowest_confidence_first() {
        let questions = vec![Question {
            text: "q-low".to_string(),
            target_source: QuestionSource::News,
            priority: Priority::Low,
        }];
        let pairs = vec![
            pair("q-high", &"x".repeat(400), AnswerConfidence::High),
            pair("q-low", &"x".repeat(400), AnswerConfidence::Low),
            pair("q-med", &"x".repeat(400), AnswerConfidence::Medium),
        ];
        // Each pair is ~100+ tokens; a 250-token budget fits two.
        let kept = fit_to_budget(&questions, &pairs, 250, estimate_tokens);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|p| p.confidence != AnswerConfidence::Low));
    }

    #[test]
    fn oversized_single_pair_loses_question_then_answer() {
        let questions = vec![Question {
            text: "the only question".to_string(),
            target_source: QuestionSource::News,
            priority: Priority::Low,
        }];
        let pairs = vec![pair("the only question", &"y".repeat(4000), AnswerConfidence::High)];
        let kept = fit_to_budget(&questions, &pairs, 10, estimate_tokens);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].question.is_empty());
        assert!(kept[0].answer.is_empty());
    }
}
