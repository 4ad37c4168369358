use crate::bm25;
use crate::chunk::chunk_text;
use agent_core::{
    AgentResult, AnswerConfidence, ChatModel, ChatOptions, QAPair, Question, QuestionSource,
};
use market_store::MarketStore;
use serde::Deserialize;
use std::sync::Arc;

const TOP_CHUNKS: usize = 3;
const NO_DATA_ANSWER: &str = "no data available";

#[derive(Debug, Deserialize)]
struct WireAnswer {
    answer: String,
    #[serde(default)]
    confidence: Option<String>,
}

/// Retrieval-augmented answering: route each question to its store-backed
/// corpus, chunk, BM25-rank, and extract an answer constrained to the
/// retrieved text.
///
/// Always returns exactly one QAPair per question, in input order.
pub struct RagEngine {
    store: MarketStore,
    llm: Arc<dyn ChatModel>,
}

impl RagEngine {
    pub fn new(store: MarketStore, llm: Arc<dyn ChatModel>) -> Self {
        Self { store, llm }
    }

    pub async fn answer_all(&self, symbol: &str, questions: &[Question]) -> Vec<QAPair> {
        let mut pairs = Vec::with_capacity(questions.len());
        for question in questions {
            pairs.push(self.answer_one(symbol, question).await);
        }
        pairs
    }

    async fn answer_one(&self, symbol: &str, question: &Question) -> QAPair {
        let documents = match self.route(symbol, question.target_source).await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!("retrieval failed for {symbol}/{:?}: {e}", question.target_source);
                Vec::new()
            }
        };

        let chunks: Vec<String> = documents.iter().flat_map(|d| chunk_text(d)).collect();
        let ranked = bm25::rank(&question.text, &chunks, TOP_CHUNKS);

        if ranked.is_empty() {
            return QAPair {
                question: question.text.clone(),
                answer: NO_DATA_ANSWER.to_string(),
                source: question.target_source,
                confidence: AnswerConfidence::Low,
            };
        }

        let context: Vec<&str> = ranked.iter().map(|(i, _)| chunks[*i].as_str()).collect();
        match self.extract(symbol, question, &context).await {
            Ok((answer, confidence)) => QAPair {
                question: question.text.clone(),
                answer,
                source: question.target_source,
                confidence,
            },
            Err(e) => {
                tracing::warn!("answer extraction failed for {symbol}: {e}");
                QAPair {
                    question: question.text.clone(),
                    answer: NO_DATA_ANSWER.to_string(),
                    source: question.target_source,
                    confidence: AnswerConfidence::Low,
                }
            }
        }
    }

    /// Source routing: each question target maps to one store query.
    async fn route(&self, symbol: &str, source: QuestionSource) -> AgentResult<Vec<String>> {
        match source {
            QuestionSource::News => {
                let articles = self.store.news_for(symbol, 50).await?;
                Ok(articles
                    .into_iter()
                    .map(|a| format!("{} — {} ({})", a.title, a.summary, a.published_at.date_naive()))
                    .collect())
            }
            QuestionSource::Transcripts => {
                let transcripts = self.store.transcripts_for(symbol, 5).await?;
                Ok(transcripts
                    .into_iter()
                    .map(|t| format!("[{} — {}] {}", t.channel, t.title, t.text))
                    .collect())
            }
            QuestionSource::Fundamentals => {
                let mut docs = Vec::new();
                if let Ok(snapshot) = self.store.latest_fundamentals(symbol).await {
                    docs.push(render_json("fundamentals snapshot", &snapshot));
                }
                let financials = self.store.financials(symbol).await.unwrap_or_default();
                if !financials.is_empty() {
                    docs.push(render_json("income statements by year", &financials));
                }
                let balance = self.store.balance_rows(symbol).await.unwrap_or_default();
                if !balance.is_empty() {
                    docs.push(render_json("balance sheets by year", &balance));
                }
                Ok(docs)
            }
            QuestionSource::Technicals => {
                let rows = self.store.recent_technicals(symbol, 10).await?;
                Ok(rows
                    .iter()
                    .map(|r| render_json(&format!("technical indicators {}", r.date), r))
                    .collect())
            }
            QuestionSource::Insider => {
                let mut docs = Vec::new();
                if let Ok(Some(summary)) = self.store.latest_insider(symbol).await {
                    docs.push(render_json("insider activity 90d", &summary));
                }
                Ok(docs)
            }
        }
    }

    async fn extract(
        &self,
        symbol: &str,
        question: &Question,
        context: &[&str],
    ) -> AgentResult<(String, AnswerConfidence)> {
        let system = "You answer equity research questions strictly from the provided excerpts. \
                      If the excerpts do not contain the answer, say \"insufficient data\". \
                      Reply with JSON {\"answer\", \"confidence\"} where confidence is high, \
                      medium, or low.";
        let user = format!(
            "Symbol: {symbol}\nQuestion: {}\n\nExcerpts:\n---\n{}\n---",
            question.text,
            context.join("\n---\n")
        );

        let response = self.llm.chat(system, &user, &ChatOptions::json()).await?;
        let wire: WireAnswer = serde_json::from_str(&response.content)
            .map_err(|e| agent_core::AgentError::LlmFatal(format!("bad answer payload: {e}")))?;

        let confidence = wire
            .confidence
            .as_deref()
            .map(AnswerConfidence::parse)
            .unwrap_or(AnswerConfidence::Low);
        Ok((wire.answer, confidence))
    }
}

fn render_json<T: serde::Serialize>(label: &str, value: &T) -> String {
    format!(
        "{label}: {}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{AgentError, ChatResponse, NewsArticle, Priority};
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
                    tokens_in: 500,
                    tokens_out: 60,
                }),
                Err(()) => Err(AgentError::LlmTransient("down".to_string())),
            }
        }
    }

    fn q(text: &str, source: QuestionSource) -> Question {
        Question {
            text: text.to_string(),
            target_source: source,
            priority: Priority::Medium,
        }
    }

    async fn store_with_news() -> MarketStore {
        let store = MarketStore::in_memory().await.unwrap();
        store
            .insert_news(&[NewsArticle {
                id: "h1".to_string(),
                symbol: "NVDA".to_string(),
                title: "Volume surged after earnings beat".to_string(),
                source: "wire".to_string(),
                url: "https://example.com".to_string(),
                published_at: Utc::now(),
                summary: "Data-center revenue drove a large beat and raised guidance.".to_string(),
            }])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn empty_retrieval_yields_low_confidence_no_data() {
        let store = MarketStore::in_memory().await.unwrap();
        let engine = RagEngine::new(
            store,
            Arc::new(ScriptedChat {
                reply: Ok("should never be called".to_string()),
            }),
        );
        let questions = vec![q("what happened?", QuestionSource::News)];
        let pairs = engine.answer_all("GHOST", &questions).await;
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].answer, "no data available");
        assert_eq!(pairs[0].confidence, AnswerConfidence::Low);
    }

    #[tokio::test]
    async fn answers_preserve_question_order_and_count() {
        let store = store_with_news().await;
        let reply = serde_json::json!({"answer": "Earnings beat drove it", "confidence": "high"})
            .to_string();
        let engine = RagEngine::new(store, Arc::new(ScriptedChat { reply: Ok(reply) }));

        let questions = vec![
            q("why did volume spike?", QuestionSource::News),
            q("what are margins doing?", QuestionSource::Fundamentals),
            q("trend health?", QuestionSource::Technicals),
            q("insider activity?", QuestionSource::Insider),
            q("video commentary?", QuestionSource::Transcripts),
        ];
        let pairs = engine.answer_all("NVDA", &questions).await;
        assert_eq!(pairs.len(), 5);
        for (pair, question) in pairs.iter().zip(&questions) {
            assert_eq!(pair.question, question.text);
            assert_eq!(pair.source, question.target_source);
        }
        // The news question had retrievable context and a scripted answer
        assert_eq!(pairs[0].answer, "Earnings beat drove it");
        assert_eq!(pairs[0].confidence, AnswerConfidence::High);
        // The fundamentals question had no rows and degrades cleanly
        assert_eq!(pairs[1].answer, "no data available");
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_no_data() {
        let store = store_with_news().await;
        let engine = RagEngine::new(store, Arc::new(ScriptedChat { reply: Err(()) }));
        let pairs = engine
            .answer_all("NVDA", &[q("why did volume spike?", QuestionSource::News)])
            .await;
        assert_eq!(pairs[0].answer, "no data available");
        assert_eq!(pairs[0].confidence, AnswerConfidence::Low);
    }
}
