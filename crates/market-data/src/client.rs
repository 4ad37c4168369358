use agent_core::{AgentError, AgentResult, DailyCandle, Quote, QuoteProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Sliding-window rate limiter: at most `max_requests` per `window`.
#[derive(Clone)]
pub(crate) struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests,
            window,
        }
    }

    pub(crate) async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            let wait_until = ts.front().unwrap().checked_add(self.window).unwrap();
            let sleep_dur = wait_until.duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!("rate limiter: waiting {:.1}s for a slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// HTTP adapter for live quotes and historical market data.
#[derive(Clone)]
pub struct MarketDataClient {
    pub(crate) base_url: String,
    pub(crate) client: Client,
    rate_limiter: RateLimiter,
}

impl MarketDataClient {
    pub fn new(timeout_secs: u64) -> Self {
        let base_url =
            std::env::var("MARKET_DATA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let rate_limit: usize = std::env::var("MARKET_DATA_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("Mozilla/5.0 (compatible; research-agent/0.1)")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url,
            client,
            rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
        }
    }

    /// Rate-limited GET with bounded exponential backoff on 429/5xx.
    pub(crate) async fn get_json(&self, url: &str) -> AgentResult<serde_json::Value> {
        let mut backoff = Duration::from_secs(2);
        for attempt in 0..3u32 {
            self.rate_limiter.acquire().await;
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| AgentError::Collector {
                    step: "http".to_string(),
                    message: e.to_string(),
                })?;

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                tracing::warn!(
                    "upstream {} from {url}, retry {}/3 in {:?}",
                    status,
                    attempt + 1,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }
            if !status.is_success() {
                return Err(AgentError::Collector {
                    step: "http".to_string(),
                    message: format!("HTTP {status} from {url}"),
                });
            }
            return response.json().await.map_err(|e| AgentError::Collector {
                step: "http".to_string(),
                message: format!("bad JSON from {url}: {e}"),
            });
        }
        Err(AgentError::Collector {
            step: "http".to_string(),
            message: format!("rate limited after 3 retries: {url}"),
        })
    }

    /// Daily candles for the trailing `days` calendar days.
    pub async fn daily_candles(&self, symbol: &str, days: i64) -> AgentResult<Vec<DailyCandle>> {
        let range = if days <= 30 {
            "1mo"
        } else if days <= 95 {
            "3mo"
        } else if days <= 190 {
            "6mo"
        } else if days <= 370 {
            "1y"
        } else {
            "2y"
        };
        let url = format!(
            "{}/v8/finance/chart/{}?range={}&interval=1d&events=div%2Csplit",
            self.base_url, symbol, range
        );
        let value = self.get_json(&url).await?;
        let envelope: ChartEnvelope = serde_json::from_value(value).map_err(|e| {
            AgentError::Collector {
                step: "price_history".to_string(),
                message: format!("chart decode: {e}"),
            }
        })?;

        let result = envelope
            .chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .ok_or_else(|| AgentError::Collector {
                step: "price_history".to_string(),
                message: format!("no chart data for {symbol}"),
            })?;

        let quote = result
            .indicators
            .quote
            .into_iter()
            .next()
            .unwrap_or_default();

        let mut candles = Vec::with_capacity(result.timestamp.len());
        for (i, ts) in result.timestamp.iter().enumerate() {
            let (open, high, low, close, volume) = (
                quote.open.get(i).copied().flatten(),
                quote.high.get(i).copied().flatten(),
                quote.low.get(i).copied().flatten(),
                quote.close.get(i).copied().flatten(),
                quote.volume.get(i).copied().flatten(),
            );
            // Skip half-formed rows (halts, partial sessions)
            if let (Some(open), Some(high), Some(low), Some(close)) = (open, high, low, close) {
                let date = DateTime::from_timestamp(*ts, 0)
                    .unwrap_or_else(Utc::now)
                    .date_naive();
                candles.push(DailyCandle {
                    symbol: symbol.to_string(),
                    date,
                    open,
                    high,
                    low,
                    close,
                    volume: volume.unwrap_or(0.0),
                });
            }
        }
        Ok(candles)
    }

    /// Batched live snapshot for many symbols. Unknown symbols are simply
    /// absent from the result.
    pub async fn quotes(&self, symbols: &[String]) -> AgentResult<HashMap<String, Quote>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let joined = symbols.join(",");
        let url = format!("{}/v7/finance/quote?symbols={}", self.base_url, joined);
        let value = self.get_json(&url).await?;
        let envelope: QuoteEnvelope =
            serde_json::from_value(value).map_err(|e| AgentError::Collector {
                step: "quotes".to_string(),
                message: format!("quote decode: {e}"),
            })?;

        let mut quotes = HashMap::new();
        for q in envelope.quote_response.result {
            if let Some(price) = q.regular_market_price {
                quotes.insert(
                    q.symbol.clone(),
                    Quote {
                        symbol: q.symbol,
                        price,
                        prev_close: q.regular_market_previous_close,
                        volume: q.regular_market_volume,
                        timestamp: Utc::now(),
                    },
                );
            }
        }
        Ok(quotes)
    }

    /// Cheap existence probe used by ticker validation.
    pub async fn probe(&self, symbol: &str) -> AgentResult<bool> {
        let quotes = self.quotes(&[symbol.to_string()]).await?;
        Ok(quotes.contains_key(symbol))
    }
}

#[async_trait]
impl QuoteProvider for MarketDataClient {
    async fn batch_quotes(&self, symbols: &[String]) -> AgentResult<HashMap<String, Quote>> {
        self.quotes(symbols).await
    }
}

// ---- wire formats ----------------------------------------------------------

#[derive(Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
}

#[derive(Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Deserialize)]
struct QuoteEnvelope {
    #[serde(rename = "quoteResponse")]
    quote_response: QuoteBody,
}

#[derive(Deserialize)]
struct QuoteBody {
    #[serde(default)]
    result: Vec<WireQuote>,
}

#[derive(Deserialize)]
struct WireQuote {
    symbol: String,
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(rename = "regularMarketPreviousClose")]
    regular_market_previous_close: Option<f64>,
    #[serde(rename = "regularMarketVolume")]
    regular_market_volume: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_envelope_decodes_and_skips_null_rows() {
        let raw = serde_json::json!({
            "chart": {"result": [{
                "timestamp": [1710000000, 1710086400],
                "indicators": {"quote": [{
                    "open": [100.0, null],
                    "high": [103.0, null],
                    "low": [99.0, null],
                    "close": [102.0, null],
                    "volume": [1000000.0, null]
                }]}
            }]}
        });
        let envelope: ChartEnvelope = serde_json::from_value(raw).unwrap();
        let result = &envelope.chart.result.as_ref().unwrap()[0];
        assert_eq!(result.timestamp.len(), 2);
        assert_eq!(result.indicators.quote[0].close[1], None);
    }

    #[test]
    fn quote_envelope_decodes() {
        let raw = serde_json::json!({
            "quoteResponse": {"result": [
                {"symbol": "NVDA", "regularMarketPrice": 145.2,
                 "regularMarketPreviousClose": 143.0, "regularMarketVolume": 5.0e7}
            ]}
        });
        let envelope: QuoteEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.quote_response.result[0].symbol, "NVDA");
        assert_eq!(envelope.quote_response.result[0].regular_market_price, Some(145.2));
    }
}
