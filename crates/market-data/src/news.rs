use crate::client::MarketDataClient;
use agent_core::{AgentResult, NewsArticle};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

impl MarketDataClient {
    /// Recent news for a symbol via the search endpoint. Articles are keyed
    /// by a content hash so repeat collection never duplicates rows.
    pub async fn news(&self, symbol: &str, limit: usize) -> AgentResult<Vec<NewsArticle>> {
        let url = format!(
            "{}/v1/finance/search?q={}&newsCount={}&quotesCount=0",
            self.base_url, symbol, limit
        );
        let value = self.get_json(&url).await?;
        let items = value
            .get("news")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(items
            .iter()
            .filter_map(|item| {
                let title = item.get("title").and_then(Value::as_str)?.to_string();
                let url = item
                    .get("link")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let published_at = item
                    .get("providerPublishTime")
                    .and_then(Value::as_i64)
                    .and_then(|ts| DateTime::from_timestamp(ts, 0))
                    .unwrap_or_else(Utc::now);
                Some(NewsArticle {
                    id: content_hash(&title, &url),
                    symbol: symbol.to_string(),
                    title,
                    source: item
                        .get("publisher")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    url,
                    published_at,
                    summary: item
                        .get("summary")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                })
            })
            .collect())
    }
}

/// Stable article identity: hex SHA-256 over title + url.
pub fn content_hash(title: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_and_distinct() {
        let a = content_hash("NVDA beats", "https://example.com/1");
        let b = content_hash("NVDA beats", "https://example.com/1");
        let c = content_hash("NVDA beats", "https://example.com/2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
