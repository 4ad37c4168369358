use crate::db::{fmt_date, fmt_ts, parse_ts, parse_ts_opt, MarketStore};
use agent_core::{
    AgentError, AgentResult, QuantScorecard, ScoredTicker, Signal, TickerDossier, WatchlistEntry,
    WatchlistSource, WatchlistStatus,
};
use chrono::{NaiveDate, Utc};

impl MarketStore {
    // ---- discovery results -------------------------------------------------

    pub async fn save_scored_tickers(
        &self,
        run_id: &str,
        tickers: &[ScoredTicker],
    ) -> AgentResult<i64> {
        if tickers.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_guard("discovered_tickers").await;
        for t in tickers {
            let payload = serde_json::to_string(t)
                .map_err(|e| AgentError::Store(format!("serialize scored ticker: {e}")))?;
            sqlx::query(
                "INSERT INTO discovered_tickers
                 (run_id, symbol, total_score, mention_count, first_seen, last_seen, sentiment, payload)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(run_id, symbol) DO UPDATE SET
                    total_score = excluded.total_score, mention_count = excluded.mention_count,
                    last_seen = excluded.last_seen, sentiment = excluded.sentiment,
                    payload = excluded.payload",
            )
            .bind(run_id)
            .bind(&t.symbol)
            .bind(t.total_score)
            .bind(t.mention_count as i64)
            .bind(fmt_ts(t.first_seen))
            .bind(fmt_ts(t.last_seen))
            .bind(t.sentiment.as_str())
            .bind(payload)
            .execute(self.pool())
            .await?;
        }
        Ok(tickers.len() as i64)
    }

    pub async fn discovery_results(&self, run_id: &str) -> AgentResult<Vec<ScoredTicker>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT payload FROM discovered_tickers WHERE run_id = ? ORDER BY total_score DESC",
        )
        .bind(run_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|(payload,)| {
                serde_json::from_str(&payload)
                    .map_err(|e| AgentError::Store(format!("decode scored ticker: {e}")))
            })
            .collect()
    }

    /// All discovery rows, newest runs first.
    pub async fn discovery_history(&self, limit: i64) -> AgentResult<Vec<ScoredTicker>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT payload FROM discovered_tickers ORDER BY last_seen DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|(payload,)| {
                serde_json::from_str(&payload)
                    .map_err(|e| AgentError::Store(format!("decode scored ticker: {e}")))
            })
            .collect()
    }

    pub async fn clear_discovery(&self) -> AgentResult<()> {
        let _guard = self.write_guard("discovered_tickers").await;
        sqlx::query("DELETE FROM discovered_tickers")
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Days since the symbol was last mentioned by any discovery run, if ever.
    pub async fn days_since_last_mention(&self, symbol: &str) -> AgentResult<Option<i64>> {
        let row: (Option<String>,) = sqlx::query_as(
            "SELECT MAX(last_seen) FROM discovered_tickers WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_one(self.pool())
        .await?;

        Ok(row
            .0
            .map(|last_seen| (Utc::now() - parse_ts(&last_seen)).num_days()))
    }

    // ---- watchlist rows ----------------------------------------------------

    pub async fn upsert_watchlist_entry(&self, entry: &WatchlistEntry) -> AgentResult<()> {
        let _guard = self.write_guard("watchlist").await;
        sqlx::query(
            "INSERT INTO watchlist
             (symbol, source, added_at, discovery_score, conviction_score, last_analyzed,
              times_analyzed, status, position_held, last_signal, consecutive_low, removed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol) DO UPDATE SET
                source = excluded.source, added_at = excluded.added_at,
                discovery_score = excluded.discovery_score,
                conviction_score = excluded.conviction_score,
                last_analyzed = excluded.last_analyzed,
                times_analyzed = excluded.times_analyzed, status = excluded.status,
                position_held = excluded.position_held, last_signal = excluded.last_signal,
                consecutive_low = excluded.consecutive_low, removed_at = excluded.removed_at",
        )
        .bind(&entry.symbol)
        .bind(entry.source.as_str())
        .bind(fmt_ts(entry.added_at))
        .bind(entry.discovery_score)
        .bind(entry.conviction_score)
        .bind(entry.last_analyzed.map(fmt_ts))
        .bind(entry.times_analyzed)
        .bind(entry.status.as_str())
        .bind(entry.position_held as i64)
        .bind(entry.last_signal.map(|s| s.as_str()))
        .bind(entry.consecutive_low)
        .bind(entry.removed_at.map(fmt_ts))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn watchlist_entry(&self, symbol: &str) -> AgentResult<Option<WatchlistEntry>> {
        let row: Option<WatchlistRow> = sqlx::query_as(
            "SELECT symbol, source, added_at, discovery_score, conviction_score, last_analyzed,
                    times_analyzed, status, position_held, last_signal, consecutive_low, removed_at
             FROM watchlist WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(WatchlistRow::into_entry))
    }

    pub async fn watchlist_entries(&self) -> AgentResult<Vec<WatchlistEntry>> {
        let rows: Vec<WatchlistRow> = sqlx::query_as(
            "SELECT symbol, source, added_at, discovery_score, conviction_score, last_analyzed,
                    times_analyzed, status, position_held, last_signal, consecutive_low, removed_at
             FROM watchlist ORDER BY added_at ASC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(WatchlistRow::into_entry).collect())
    }

    // ---- scorecards --------------------------------------------------------

    pub async fn save_scorecard(&self, card: &QuantScorecard) -> AgentResult<()> {
        let _guard = self.write_guard("scorecards").await;
        let payload = serde_json::to_string(card)
            .map_err(|e| AgentError::Store(format!("serialize scorecard: {e}")))?;
        sqlx::query(
            "INSERT INTO scorecards (symbol, as_of_date, as_of, payload) VALUES (?, ?, ?, ?)
             ON CONFLICT(symbol, as_of_date) DO UPDATE SET
                as_of = excluded.as_of, payload = excluded.payload",
        )
        .bind(&card.symbol)
        .bind(fmt_date(card.as_of.date_naive()))
        .bind(fmt_ts(card.as_of))
        .bind(payload)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn latest_scorecard(&self, symbol: &str) -> AgentResult<QuantScorecard> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT payload FROM scorecards WHERE symbol = ? ORDER BY as_of_date DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;

        let (payload,) =
            row.ok_or_else(|| AgentError::NotFound(format!("no scorecard for {symbol}")))?;
        serde_json::from_str(&payload)
            .map_err(|e| AgentError::Store(format!("decode scorecard: {e}")))
    }

    // ---- dossiers ----------------------------------------------------------

    pub async fn save_dossier(&self, dossier: &TickerDossier) -> AgentResult<()> {
        let _guard = self.write_guard("dossiers").await;
        let payload = serde_json::to_string(dossier)
            .map_err(|e| AgentError::Store(format!("serialize dossier: {e}")))?;
        sqlx::query(
            "INSERT INTO dossiers
             (symbol, generated_at, generated_date, version, conviction_score, payload)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol, generated_at) DO NOTHING",
        )
        .bind(&dossier.symbol)
        .bind(fmt_ts(dossier.generated_at))
        .bind(fmt_date(dossier.generated_at.date_naive()))
        .bind(dossier.version)
        .bind(dossier.conviction_score)
        .bind(payload)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Newest dossier for the symbol (supersedes any prior ones).
    pub async fn latest_dossier(&self, symbol: &str) -> AgentResult<TickerDossier> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT payload FROM dossiers WHERE symbol = ? ORDER BY generated_at DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;

        let (payload,) =
            row.ok_or_else(|| AgentError::NotFound(format!("no dossier for {symbol}")))?;
        serde_json::from_str(&payload)
            .map_err(|e| AgentError::Store(format!("decode dossier: {e}")))
    }

    /// True if a dossier already exists for the symbol on the given calendar
    /// date. Used by the scheduler to keep same-day re-runs idempotent.
    pub async fn dossier_exists_on(&self, symbol: &str, date: NaiveDate) -> AgentResult<bool> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM dossiers WHERE symbol = ? AND generated_date = ?",
        )
        .bind(symbol)
        .bind(fmt_date(date))
        .fetch_one(self.pool())
        .await?;
        Ok(row.0 > 0)
    }
}

#[derive(sqlx::FromRow)]
struct WatchlistRow {
    symbol: String,
    source: String,
    added_at: String,
    discovery_score: f64,
    conviction_score: f64,
    last_analyzed: Option<String>,
    times_analyzed: i64,
    status: String,
    position_held: i64,
    last_signal: Option<String>,
    consecutive_low: i64,
    removed_at: Option<String>,
}

impl WatchlistRow {
    fn into_entry(self) -> WatchlistEntry {
        WatchlistEntry {
            symbol: self.symbol,
            source: WatchlistSource::parse(&self.source),
            added_at: parse_ts(&self.added_at),
            discovery_score: self.discovery_score,
            conviction_score: self.conviction_score,
            last_analyzed: parse_ts_opt(self.last_analyzed),
            times_analyzed: self.times_analyzed,
            status: WatchlistStatus::parse(&self.status),
            position_held: self.position_held != 0,
            last_signal: self.last_signal.as_deref().map(Signal::parse),
            consecutive_low: self.consecutive_low,
            removed_at: parse_ts_opt(self.removed_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{AnswerConfidence, QAPair, QuestionSource};

    #[tokio::test]
    async fn watchlist_entry_round_trip() {
        let store = MarketStore::in_memory().await.unwrap();
        let mut entry = WatchlistEntry::new("PLTR", WatchlistSource::AutoDiscovery, 6.5);
        entry.conviction_score = 0.72;
        entry.last_signal = Some(Signal::Buy);
        store.upsert_watchlist_entry(&entry).await.unwrap();

        let loaded = store.watchlist_entry("PLTR").await.unwrap().unwrap();
        assert_eq!(loaded.source, WatchlistSource::AutoDiscovery);
        assert_eq!(loaded.status, WatchlistStatus::PendingAnalysis);
        assert_eq!(loaded.last_signal, Some(Signal::Buy));
        assert!((loaded.conviction_score - 0.72).abs() < 1e-9);
    }

    #[tokio::test]
    async fn dossier_round_trip_and_same_day_dedupe() {
        let store = MarketStore::in_memory().await.unwrap();
        let dossier = TickerDossier {
            symbol: "NVDA".to_string(),
            generated_at: Utc::now(),
            version: 1,
            scorecard: QuantScorecard {
                symbol: "NVDA".to_string(),
                as_of: Utc::now(),
                sharpe: Some(1.8),
                flags: vec!["volume_spike_95th".to_string()],
                ..Default::default()
            },
            qa_pairs: vec![QAPair {
                question: "What drove the volume spike?".to_string(),
                answer: "Earnings beat and guidance raise.".to_string(),
                source: QuestionSource::News,
                confidence: AnswerConfidence::High,
            }],
            executive_summary: "Strong momentum with improving fundamentals.".to_string(),
            bull_case: "Data-center demand continues to accelerate.".to_string(),
            bear_case: "Valuation leaves little room for execution slips.".to_string(),
            key_catalysts: vec!["Next earnings".to_string()],
            conviction_score: 0.82,
            signal_summary: "Strong BUY on momentum and demand".to_string(),
            total_tokens: 4200,
        };
        store.save_dossier(&dossier).await.unwrap();

        let loaded = store.latest_dossier("NVDA").await.unwrap();
        assert_eq!(loaded.qa_pairs.len(), 1);
        assert!((loaded.conviction_score - 0.82).abs() < 1e-9);
        assert!(store
            .dossier_exists_on("NVDA", dossier.generated_at.date_naive())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn discovery_results_ordered_by_score() {
        let store = MarketStore::in_memory().await.unwrap();
        let tickers = vec![
            ScoredTicker::new("AMD", "forum:stocks", 4.0),
            ScoredTicker::new("NVDA", "forum:stocks", 8.5),
        ];
        store.save_scored_tickers("run-1", &tickers).await.unwrap();
        let loaded = store.discovery_results("run-1").await.unwrap();
        assert_eq!(loaded[0].symbol, "NVDA");
        assert_eq!(loaded[1].symbol, "AMD");
    }
}
