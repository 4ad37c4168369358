use agent_core::{AgentResult, ChatModel, ChatOptions};
use dashmap::DashMap;
use market_data::MarketDataClient;
use std::collections::HashSet;
use std::sync::Arc;

/// Three-layer ticker validation:
/// 1. static noise-word denylist,
/// 2. live market-data probe,
/// 3. LLM confirmation.
///
/// Results are cached so a symbol is validated at most once per run.
pub struct TickerValidator {
    denylist: HashSet<String>,
    market: Arc<MarketDataClient>,
    llm: Arc<dyn ChatModel>,
    cache: DashMap<String, bool>,
}

impl TickerValidator {
    pub fn new(
        denylist: impl IntoIterator<Item = String>,
        market: Arc<MarketDataClient>,
        llm: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            denylist: denylist.into_iter().map(|t| t.to_uppercase()).collect(),
            market,
            llm,
            cache: DashMap::new(),
        }
    }

    /// Drop cached verdicts at the start of a new pipeline run.
    pub fn reset_cache(&self) {
        self.cache.clear();
    }

    pub fn is_denylisted(&self, symbol: &str) -> bool {
        self.denylist.contains(&symbol.to_uppercase())
    }

    pub async fn validate(&self, symbol: &str) -> AgentResult<bool> {
        let symbol = symbol.to_uppercase();
        if let Some(cached) = self.cache.get(&symbol) {
            return Ok(*cached);
        }

        let verdict = self.validate_uncached(&symbol).await?;
        self.cache.insert(symbol, verdict);
        Ok(verdict)
    }

    async fn validate_uncached(&self, symbol: &str) -> AgentResult<bool> {
        // Shape + denylist
        let shape_ok = (2..=5).contains(&symbol.len())
            && symbol.chars().all(|c| c.is_ascii_uppercase());
        if !shape_ok || self.denylist.contains(symbol) {
            return Ok(false);
        }

        // Live probe
        match self.market.probe(symbol).await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) => {
                tracing::warn!("validation probe failed for {symbol}: {e}");
                return Ok(false);
            }
        }

        // LLM confirmation. A broken backend fails open: the probe already
        // confirmed the symbol trades.
        let system = "You verify stock ticker symbols. Answer with exactly YES or NO.";
        let user = format!(
            "Is \"{symbol}\" a legitimate publicly traded equity ticker symbol \
             (not a common word, abbreviation, or internet slang)? Answer YES or NO."
        );
        match self.llm.chat(system, &user, &ChatOptions::default()).await {
            Ok(response) => Ok(response.content.trim().to_uppercase().starts_with("YES")),
            Err(e) => {
                tracing::warn!("LLM validation unavailable for {symbol}: {e}");
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{AgentError, ChatResponse, SourcesConfig};
    use async_trait::async_trait;

    struct ScriptedChat {
        reply: Option<String>,
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
                Some(content) => Ok(ChatResponse {
                    content: content.clone(),
                    tokens_in: 10,
                    tokens_out: 1,
                }),
                None => Err(AgentError::LlmTransient("down".to_string())),
            }
        }
    }

    fn validator(reply: Option<&str>) -> TickerValidator {
        TickerValidator::new(
            SourcesConfig::default().denylist,
            Arc::new(MarketDataClient::new(5)),
            Arc::new(ScriptedChat {
                reply: reply.map(str::to_string),
            }),
        )
    }

    #[tokio::test]
    async fn denylisted_tokens_are_rejected_without_io() {
        let v = validator(Some("YES"));
        for token in ["YOLO", "DD", "CEO", "AI", "USA"] {
            assert!(!v.validate(token).await.unwrap(), "{token}");
        }
    }

    #[tokio::test]
    async fn malformed_shapes_are_rejected() {
        let v = validator(Some("YES"));
        assert!(!v.validate("A").await.unwrap());
        assert!(!v.validate("TOOLONG").await.unwrap());
    }
}
