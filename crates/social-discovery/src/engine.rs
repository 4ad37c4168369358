use agent_core::{AgentResult, DiscoverySource, EventStatus, ScoredTicker};
use futures_util::future::join_all;
use market_store::{MarketStore, RunContext};
use std::collections::HashMap;
use std::sync::Arc;

/// Score decay: a symbol last mentioned `days` ago keeps
/// `max(0.1, 1.0 - 0.15 * days)` of its fresh score.
pub fn decay_factor(days_since_last_mention: i64) -> f64 {
    (1.0 - 0.15 * days_since_last_mention as f64).max(0.1)
}

/// Runs every configured discovery source in parallel, merges hits by
/// symbol, applies decay, persists, and returns the ranked candidates.
pub struct DiscoveryEngine {
    sources: Vec<Arc<dyn DiscoverySource>>,
    store: MarketStore,
}

impl DiscoveryEngine {
    pub fn new(sources: Vec<Arc<dyn DiscoverySource>>, store: MarketStore) -> Self {
        Self { sources, store }
    }

    pub async fn run(&self, ctx: &RunContext) -> AgentResult<Vec<ScoredTicker>> {
        ctx.emit(
            "discovery",
            "discovery_start",
            &format!("{} sources", self.sources.len()),
            None,
            None,
            EventStatus::Success,
        )
        .await;

        let scans = join_all(self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            async move { (source.name(), source.scan().await) }
        }))
        .await;

        let mut merged: HashMap<String, ScoredTicker> = HashMap::new();
        for (name, result) in scans {
            match result {
                Ok(tickers) => {
                    ctx.emit(
                        "discovery",
                        "source_complete",
                        &format!("{name}: {} candidates", tickers.len()),
                        None,
                        Some(serde_json::json!({"source": name, "count": tickers.len()})),
                        EventStatus::Success,
                    )
                    .await;
                    for ticker in tickers {
                        match merged.entry(ticker.symbol.clone()) {
                            std::collections::hash_map::Entry::Occupied(mut entry) => {
                                entry.get_mut().merge(&ticker)
                            }
                            std::collections::hash_map::Entry::Vacant(entry) => {
                                entry.insert(ticker);
                            }
                        }
                    }
                }
                Err(e) => {
                    ctx.emit(
                        "discovery",
                        "source_error",
                        &e.to_string(),
                        None,
                        Some(serde_json::json!({"source": name})),
                        EventStatus::Error,
                    )
                    .await;
                }
            }
        }

        // Decay against the last time each symbol showed up in any earlier
        // run, before this run's rows are persisted.
        let mut results: Vec<ScoredTicker> = Vec::with_capacity(merged.len());
        for (symbol, mut ticker) in merged {
            if let Ok(Some(days)) = self.store.days_since_last_mention(&symbol).await {
                if days > 0 {
                    ticker.total_score *= decay_factor(days);
                }
            }
            results.push(ticker);
        }

        results.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        self.store.save_scored_tickers(ctx.run_id(), &results).await?;
        ctx.emit(
            "discovery",
            "discovery_complete",
            &format!("{} unique candidates", results.len()),
            None,
            Some(serde_json::json!({"count": results.len()})),
            EventStatus::Success,
        )
        .await;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::SentimentHint;
    use async_trait::async_trait;
    use market_store::EventLog;

    struct FixedSource {
        name: &'static str,
        tickers: Vec<ScoredTicker>,
    }

    #[async_trait]
    impl DiscoverySource for FixedSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn scan(&self) -> AgentResult<Vec<ScoredTicker>> {
            Ok(self.tickers.clone())
        }
    }

    #[test]
    fn decay_floor_is_one_tenth() {
        assert!((decay_factor(0) - 1.0).abs() < 1e-9);
        assert!((decay_factor(2) - 0.7).abs() < 1e-9);
        assert!((decay_factor(6) - 0.1).abs() < 1e-9);
        assert!((decay_factor(30) - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sources_merge_by_symbol() {
        let store = MarketStore::in_memory().await.unwrap();
        let log = EventLog::new(store.clone());
        let ctx = RunContext::new(log);

        let mut forum_hit = ScoredTicker::new("NVDA", "forums", 5.0);
        forum_hit.sentiment = SentimentHint::Bullish;
        let transcript_hit = ScoredTicker::new("NVDA", "transcripts", 3.5);
        let lone = ScoredTicker::new("AMD", "forums", 2.0);

        let engine = DiscoveryEngine::new(
            vec![
                Arc::new(FixedSource {
                    name: "forums",
                    tickers: vec![forum_hit, lone],
                }),
                Arc::new(FixedSource {
                    name: "transcripts",
                    tickers: vec![transcript_hit],
                }),
            ],
            store.clone(),
        );

        let results = engine.run(&ctx).await.unwrap();
        assert_eq!(results[0].symbol, "NVDA");
        assert!((results[0].total_score - 8.5).abs() < 1e-9);
        assert_eq!(results[0].sources.len(), 2);
        assert_eq!(results[1].symbol, "AMD");

        // Persisted under the run id
        let persisted = store.discovery_results(ctx.run_id()).await.unwrap();
        assert_eq!(persisted.len(), 2);
    }
}
