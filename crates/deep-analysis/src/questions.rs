use agent_core::{
    AgentError, AgentResult, ChatModel, ChatOptions, Priority, QuantScorecard, Question,
    QuestionSource,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

pub const QUESTION_COUNT: usize = 5;
pub const MIN_DISTINCT_SOURCES: usize = 3;

#[derive(Debug, Deserialize)]
struct WireQuestion {
    question: String,
    target_source: String,
    #[serde(default)]
    priority: Option<String>,
}

/// Produces exactly five typed follow-up questions for a scorecard.
///
/// The LLM proposes; a deterministic template bank keyed by the scorecard's
/// anomaly flags backfills whatever the model under-delivers. Generation only
/// fails when both paths produce nothing usable.
pub struct QuestionGenerator {
    llm: Arc<dyn ChatModel>,
}

impl QuestionGenerator {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }

    pub async fn generate(&self, card: &QuantScorecard) -> AgentResult<Vec<Question>> {
        let mut questions = match self.ask_llm(card).await {
            Ok(questions) => questions,
            Err(e) => {
                tracing::warn!("question generation LLM failed for {}: {e}", card.symbol);
                Vec::new()
            }
        };
        questions.truncate(QUESTION_COUNT);

        if questions.len() < QUESTION_COUNT {
            let needed = QUESTION_COUNT - questions.len();
            questions.extend(fallback_questions(card, &questions, needed));
        }

        if questions.len() < QUESTION_COUNT {
            return Err(AgentError::QuestionGenFailed(format!(
                "only {} questions available for {}",
                questions.len(),
                card.symbol
            )));
        }

        enforce_source_diversity(&mut questions);
        Ok(questions)
    }

    async fn ask_llm(&self, card: &QuantScorecard) -> AgentResult<Vec<Question>> {
        let system = "You are an equity research lead. Given a quantitative scorecard, write \
                      exactly 5 follow-up questions an analyst should answer before trading. \
                      Reply with a JSON array of {\"question\", \"target_source\", \"priority\"} \
                      where target_source is one of news, transcripts, fundamentals, technicals, \
                      insider and priority is high, medium, or low. Cover at least 3 distinct \
                      sources.";
        let payload = serde_json::to_string(card)
            .map_err(|e| AgentError::QuestionGenFailed(e.to_string()))?;
        let user = format!("Scorecard for {}:\n{}", card.symbol, payload);

        let response = self.llm.chat(system, &user, &ChatOptions::json()).await?;
        let wire: Vec<WireQuestion> = serde_json::from_str(&response.content)
            .map_err(|e| AgentError::LlmFatal(format!("bad question payload: {e}")))?;

        Ok(wire
            .into_iter()
            .filter_map(|w| {
                let target_source = QuestionSource::parse(&w.target_source)?;
                let text = w.question.trim().to_string();
                if text.is_empty() {
                    return None;
                }
                Some(Question {
                    text,
                    target_source,
                    priority: w.priority.as_deref().map(Priority::parse).unwrap_or(Priority::Medium),
                })
            })
            .collect())
    }
}

/// Deterministic fallback bank. Flag-keyed templates come first, generic
/// coverage questions pad the rest; anything already asked is skipped.
fn fallback_questions(
    card: &QuantScorecard,
    existing: &[Question],
    needed: usize,
) -> Vec<Question> {
    let mut bank: Vec<Question> = Vec::new();
    let date = card.as_of.date_naive();

    for flag in &card.flags {
        if flag == "volume_spike_95th" {
            bank.push(question(
                format!("What event caused the trading volume spike around {date}?"),
                QuestionSource::News,
                Priority::High,
            ));
        } else if flag.starts_with("earnings_in_") {
            bank.push(question(
                "What are consensus expectations for the upcoming earnings report?".to_string(),
                QuestionSource::Fundamentals,
                Priority::High,
            ));
        } else if flag == "drawdown_exceeds_20pct" {
            bank.push(question(
                "What drove the recent drawdown and has the cause been resolved?".to_string(),
                QuestionSource::News,
                Priority::High,
            ));
        } else if flag == "insider_buying_spike" || flag == "insider_selling_spike" {
            bank.push(question(
                "Which insiders transacted recently and at what sizes?".to_string(),
                QuestionSource::Insider,
                Priority::High,
            ));
        } else if flag == "z_score_high" || flag == "price_above_upper_band"
            || flag == "price_below_lower_band"
        {
            bank.push(question(
                "Is the current price extension supported by the technical picture?".to_string(),
                QuestionSource::Technicals,
                Priority::Medium,
            ));
        } else if flag == "negative_sortino" {
            bank.push(question(
                "Do the fundamentals justify holding through the downside volatility?".to_string(),
                QuestionSource::Fundamentals,
                Priority::Medium,
            ));
        }
    }

    // Generic coverage, one per source
    bank.push(question(
        "What is the most significant recent news for this company?".to_string(),
        QuestionSource::News,
        Priority::Medium,
    ));
    bank.push(question(
        "How do current valuation multiples compare with the company's growth?".to_string(),
        QuestionSource::Fundamentals,
        Priority::Medium,
    ));
    bank.push(question(
        "What do the trend and momentum indicators say about entry timing?".to_string(),
        QuestionSource::Technicals,
        Priority::Medium,
    ));
    bank.push(question(
        "What are commentators saying about this stock in recent videos?".to_string(),
        QuestionSource::Transcripts,
        Priority::Low,
    ));
    bank.push(question(
        "Does recent insider activity signal conviction or caution?".to_string(),
        QuestionSource::Insider,
        Priority::Low,
    ));

    let asked: HashSet<String> = existing.iter().map(|q| q.text.clone()).collect();
    let mut out = Vec::with_capacity(needed);
    let mut seen = asked;
    for q in bank {
        if out.len() == needed {
            break;
        }
        if seen.insert(q.text.clone()) {
            out.push(q);
        }
    }
    out
}

/// The five questions must cover at least three distinct sources; re-target
/// the lowest-priority duplicates onto missing sources when they do not.
fn enforce_source_diversity(questions: &mut [Question]) {
    let distinct = |qs: &[Question]| {
        qs.iter().map(|q| q.target_source).collect::<HashSet<_>>().len()
    };
    if distinct(questions) >= MIN_DISTINCT_SOURCES {
        return;
    }

    let all_sources = [
        QuestionSource::News,
        QuestionSource::Fundamentals,
        QuestionSource::Technicals,
        QuestionSource::Transcripts,
        QuestionSource::Insider,
    ];
    let mut missing: Vec<QuestionSource> = all_sources
        .into_iter()
        .filter(|s| !questions.iter().any(|q| q.target_source == *s))
        .collect();

    // Walk lowest priority first, last index first, retargeting duplicates.
    let mut order: Vec<usize> = (0..questions.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse((questions[i].priority, i)));
    for i in order {
        if distinct(questions) >= MIN_DISTINCT_SOURCES || missing.is_empty() {
            break;
        }
        let source = questions[i].target_source;
        let duplicated = questions
            .iter()
            .filter(|q| q.target_source == source)
            .count()
            > 1;
        if duplicated {
            questions[i].target_source = missing.remove(0);
        }
    }
}

fn question(text: String, target_source: QuestionSource, priority: Priority) -> Question {
    Question {
        text,
        target_source,
        priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::ChatResponse;
    use async_trait::async_trait;
    use chrono::Utc;

    struct ScriptedChat {
        reply: Result<String, ()>,
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(
            &self,
            _system: &str,
            _user: &str,
            _options: &ChatOptions,
        ) -> AgentResult<ChatResponse> {
            match &self.reply {
                Ok(content) => Ok(ChatResponse {
                    content: content.clone(),
                    tokens_in: 100,
                    tokens_out: 50,
                }),
                Err(()) => Err(AgentError::LlmTransient("backend down".to_string())),
            }
        }
    }

    fn card(flags: &[&str]) -> QuantScorecard {
        QuantScorecard {
            symbol: "TEST".to_string(),
            as_of: Utc::now(),
            flags: flags.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    fn generator(reply: Result<String, ()>) -> QuestionGenerator {
        QuestionGenerator::new(Arc::new(ScriptedChat { reply }))
    }

    #[tokio::test]
    async fn short_llm_reply_is_backfilled_from_flag_templates() {
        // The fallback scenario: model returns only 3 questions while the
        // scorecard carries a volume spike and imminent earnings.
        let reply = serde_json::json!([
            {"question": "Why did margins fall?", "target_source": "fundamentals", "priority": "high"},
            {"question": "Any guidance changes?", "target_source": "news", "priority": "medium"},
            {"question": "Is RSI overbought?", "target_source": "technicals", "priority": "low"},
        ])
        .to_string();
        let generator = generator(Ok(reply));
        let questions = generator
            .generate(&card(&["volume_spike_95th", "earnings_in_3_days"]))
            .await
            .unwrap();

        assert_eq!(questions.len(), 5);
        let sources: HashSet<_> = questions.iter().map(|q| q.target_source).collect();
        assert!(sources.len() >= 3);
        assert!(questions
            .iter()
            .any(|q| q.text.contains("volume spike") && q.target_source == QuestionSource::News));
        assert!(questions
            .iter()
            .any(|q| q.text.contains("earnings") && q.target_source == QuestionSource::Fundamentals));
    }

    #[tokio::test]
    async fn llm_failure_falls_back_entirely() {
        let generator = generator(Err(()));
        let questions = generator.generate(&card(&[])).await.unwrap();
        assert_eq!(questions.len(), 5);
        let sources: HashSet<_> = questions.iter().map(|q| q.target_source).collect();
        assert!(sources.len() >= 3);
    }

    #[tokio::test]
    async fn single_source_answers_are_diversified() {
        let reply = serde_json::json!([
            {"question": "q1", "target_source": "news", "priority": "high"},
            {"question": "q2", "target_source": "news", "priority": "medium"},
            {"question": "q3", "target_source": "news", "priority": "medium"},
            {"question": "q4", "target_source": "news", "priority": "low"},
            {"question": "q5", "target_source": "news", "priority": "low"},
        ])
        .to_string();
        let generator = generator(Ok(reply));
        let questions = generator.generate(&card(&[])).await.unwrap();
        let sources: HashSet<_> = questions.iter().map(|q| q.target_source).collect();
        assert!(sources.len() >= 3, "got {sources:?}");
        // High-priority question keeps its original target
        assert_eq!(questions[0].target_source, QuestionSource::News);
    }

    #[tokio::test]
    async fn oversized_reply_is_truncated_to_five() {
        let items: Vec<_> = (0..8)
            .map(|i| {
                serde_json::json!({
                    "question": format!("q{i}"),
                    "target_source": "news",
                    "priority": "medium"
                })
            })
            .collect();
        let generator = generator(Ok(serde_json::Value::Array(items).to_string()));
        let questions = generator.generate(&card(&[])).await.unwrap();
        assert_eq!(questions.len(), 5);
    }
}
