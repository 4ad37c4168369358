use crate::{AgentResult, Quote, ScoredTicker, StepReport};
use async_trait::async_trait;
use std::collections::HashMap;

/// Options for a single chat call
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Override the configured model for this call
    pub model: Option<String>,
    pub temperature: Option<f64>,
    /// Strip fences/prose and require the content to parse as JSON
    pub expect_json: bool,
    pub max_tokens: Option<u32>,
}

impl ChatOptions {
    pub fn json() -> Self {
        Self {
            expect_json: true,
            ..Default::default()
        }
    }
}

/// Result of a chat call
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
}

/// Backend-agnostic chat interface.
///
/// Implemented by the HTTP client and by scripted fakes in tests.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, system: &str, user: &str, options: &ChatOptions)
        -> AgentResult<ChatResponse>;
}

/// Live quote source shared by the validation probe and the price monitor
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Batched snapshot for many symbols; missing symbols are absent from
    /// the returned map rather than an error.
    async fn batch_quotes(&self, symbols: &[String]) -> AgentResult<HashMap<String, Quote>>;
}

/// Contract the pipeline consumes data collection through
#[async_trait]
pub trait TickerCollector: Send + Sync {
    /// Three-layer validation: denylist, live probe, LLM confirmation.
    async fn validate_ticker(&self, symbol: &str) -> AgentResult<bool>;

    /// Drop cached validation verdicts at the start of a new run.
    fn reset_validation_cache(&self) {}

    /// Run the collection steps for one symbol; individual step failures are
    /// reported in the result, never propagated as an error.
    async fn collect_data(&self, symbol: &str) -> AgentResult<StepReport>;
}

/// One discovery source (forum scan, transcript scan, ...)
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn scan(&self) -> AgentResult<Vec<ScoredTicker>>;
}
