use crate::db::{fmt_date, fmt_ts, parse_date, parse_ts, MarketStore};
use agent_core::{
    AgentError, AgentResult, AnalystSnapshot, BalanceRow, CashFlowRow, DailyCandle, EarningsEvent,
    FinancialRow, FundamentalsSnapshot, InsiderSummary, NewsArticle, RiskRow, TechnicalRow,
    Transcript,
};
use chrono::NaiveDate;

impl MarketStore {
    // ---- price history -----------------------------------------------------

    pub async fn upsert_candles(&self, candles: &[DailyCandle]) -> AgentResult<i64> {
        if candles.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_guard("price_history").await;
        let mut written = 0i64;
        for c in candles {
            sqlx::query(
                "INSERT INTO price_history (symbol, date, open, high, low, close, volume)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(symbol, date) DO UPDATE SET
                    open = excluded.open, high = excluded.high, low = excluded.low,
                    close = excluded.close, volume = excluded.volume",
            )
            .bind(&c.symbol)
            .bind(fmt_date(c.date))
            .bind(c.open)
            .bind(c.high)
            .bind(c.low)
            .bind(c.close)
            .bind(c.volume)
            .execute(self.pool())
            .await?;
            written += 1;
        }
        Ok(written)
    }

    pub async fn candles(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AgentResult<Vec<DailyCandle>> {
        let rows: Vec<(String, String, f64, f64, f64, f64, f64)> = sqlx::query_as(
            "SELECT symbol, date, open, high, low, close, volume FROM price_history
             WHERE symbol = ? AND date >= ? AND date <= ? ORDER BY date ASC",
        )
        .bind(symbol)
        .bind(fmt_date(from))
        .bind(fmt_date(to))
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(symbol, date, open, high, low, close, volume)| DailyCandle {
                symbol,
                date: parse_date(&date),
                open,
                high,
                low,
                close,
                volume,
            })
            .collect())
    }

    pub async fn latest_candle(&self, symbol: &str) -> AgentResult<DailyCandle> {
        let row: Option<(String, String, f64, f64, f64, f64, f64)> = sqlx::query_as(
            "SELECT symbol, date, open, high, low, close, volume FROM price_history
             WHERE symbol = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;

        row.map(|(symbol, date, open, high, low, close, volume)| DailyCandle {
            symbol,
            date: parse_date(&date),
            open,
            high,
            low,
            close,
            volume,
        })
        .ok_or_else(|| AgentError::NotFound(format!("no candles for {symbol}")))
    }

    pub async fn candle_count_on(&self, symbol: &str, date: NaiveDate) -> AgentResult<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM price_history WHERE symbol = ? AND date = ?")
                .bind(symbol)
                .bind(fmt_date(date))
                .fetch_one(self.pool())
                .await?;
        Ok(row.0)
    }

    // ---- fundamentals ------------------------------------------------------

    pub async fn upsert_fundamentals(&self, snapshot: &FundamentalsSnapshot) -> AgentResult<()> {
        let _guard = self.write_guard("fundamentals").await;
        let payload = serde_json::to_string(snapshot)
            .map_err(|e| AgentError::Store(format!("serialize fundamentals: {e}")))?;
        sqlx::query(
            "INSERT INTO fundamentals (symbol, snapshot_date, payload) VALUES (?, ?, ?)
             ON CONFLICT(symbol, snapshot_date) DO UPDATE SET payload = excluded.payload",
        )
        .bind(&snapshot.symbol)
        .bind(fmt_date(snapshot.snapshot_date))
        .bind(payload)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn latest_fundamentals(&self, symbol: &str) -> AgentResult<FundamentalsSnapshot> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT payload FROM fundamentals WHERE symbol = ?
             ORDER BY snapshot_date DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;

        let (payload,) =
            row.ok_or_else(|| AgentError::NotFound(format!("no fundamentals for {symbol}")))?;
        serde_json::from_str(&payload)
            .map_err(|e| AgentError::Store(format!("decode fundamentals: {e}")))
    }

    // ---- financial statements ---------------------------------------------

    pub async fn upsert_financials(&self, rows: &[FinancialRow]) -> AgentResult<i64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_guard("financials").await;
        for r in rows {
            sqlx::query(
                "INSERT INTO financials
                 (symbol, fiscal_year, revenue, gross_profit, operating_income, net_income, eps)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(symbol, fiscal_year) DO UPDATE SET
                    revenue = excluded.revenue, gross_profit = excluded.gross_profit,
                    operating_income = excluded.operating_income,
                    net_income = excluded.net_income, eps = excluded.eps",
            )
            .bind(&r.symbol)
            .bind(r.fiscal_year)
            .bind(r.revenue)
            .bind(r.gross_profit)
            .bind(r.operating_income)
            .bind(r.net_income)
            .bind(r.eps)
            .execute(self.pool())
            .await?;
        }
        Ok(rows.len() as i64)
    }

    pub async fn financials(&self, symbol: &str) -> AgentResult<Vec<FinancialRow>> {
        let rows: Vec<(String, i32, Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>)> =
            sqlx::query_as(
                "SELECT symbol, fiscal_year, revenue, gross_profit, operating_income, net_income, eps
                 FROM financials WHERE symbol = ? ORDER BY fiscal_year DESC",
            )
            .bind(symbol)
            .fetch_all(self.pool())
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(symbol, fiscal_year, revenue, gross_profit, operating_income, net_income, eps)| {
                    FinancialRow {
                        symbol,
                        fiscal_year,
                        revenue,
                        gross_profit,
                        operating_income,
                        net_income,
                        eps,
                    }
                },
            )
            .collect())
    }

    pub async fn upsert_balance_rows(&self, rows: &[BalanceRow]) -> AgentResult<i64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_guard("balance_sheet").await;
        for r in rows {
            sqlx::query(
                "INSERT INTO balance_sheet
                 (symbol, fiscal_year, total_assets, total_liabilities, current_assets,
                  current_liabilities, total_equity, cash_and_equivalents, long_term_debt,
                  retained_earnings)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(symbol, fiscal_year) DO UPDATE SET
                    total_assets = excluded.total_assets,
                    total_liabilities = excluded.total_liabilities,
                    current_assets = excluded.current_assets,
                    current_liabilities = excluded.current_liabilities,
                    total_equity = excluded.total_equity,
                    cash_and_equivalents = excluded.cash_and_equivalents,
                    long_term_debt = excluded.long_term_debt,
                    retained_earnings = excluded.retained_earnings",
            )
            .bind(&r.symbol)
            .bind(r.fiscal_year)
            .bind(r.total_assets)
            .bind(r.total_liabilities)
            .bind(r.current_assets)
            .bind(r.current_liabilities)
            .bind(r.total_equity)
            .bind(r.cash_and_equivalents)
            .bind(r.long_term_debt)
            .bind(r.retained_earnings)
            .execute(self.pool())
            .await?;
        }
        Ok(rows.len() as i64)
    }

    pub async fn balance_rows(&self, symbol: &str) -> AgentResult<Vec<BalanceRow>> {
        let rows: Vec<(
            String,
            i32,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
        )> = sqlx::query_as(
            "SELECT symbol, fiscal_year, total_assets, total_liabilities, current_assets,
                    current_liabilities, total_equity, cash_and_equivalents, long_term_debt,
                    retained_earnings
             FROM balance_sheet WHERE symbol = ? ORDER BY fiscal_year DESC",
        )
        .bind(symbol)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| BalanceRow {
                symbol: r.0,
                fiscal_year: r.1,
                total_assets: r.2,
                total_liabilities: r.3,
                current_assets: r.4,
                current_liabilities: r.5,
                total_equity: r.6,
                cash_and_equivalents: r.7,
                long_term_debt: r.8,
                retained_earnings: r.9,
            })
            .collect())
    }

    pub async fn upsert_cash_flow_rows(&self, rows: &[CashFlowRow]) -> AgentResult<i64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_guard("cash_flows").await;
        for r in rows {
            sqlx::query(
                "INSERT INTO cash_flows
                 (symbol, fiscal_year, operating_cash_flow, capital_expenditures, free_cash_flow,
                  dividends_paid, net_borrowings)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(symbol, fiscal_year) DO UPDATE SET
                    operating_cash_flow = excluded.operating_cash_flow,
                    capital_expenditures = excluded.capital_expenditures,
                    free_cash_flow = excluded.free_cash_flow,
                    dividends_paid = excluded.dividends_paid,
                    net_borrowings = excluded.net_borrowings",
            )
            .bind(&r.symbol)
            .bind(r.fiscal_year)
            .bind(r.operating_cash_flow)
            .bind(r.capital_expenditures)
            .bind(r.free_cash_flow)
            .bind(r.dividends_paid)
            .bind(r.net_borrowings)
            .execute(self.pool())
            .await?;
        }
        Ok(rows.len() as i64)
    }

    pub async fn cash_flow_rows(&self, symbol: &str) -> AgentResult<Vec<CashFlowRow>> {
        let rows: Vec<(String, i32, Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>)> =
            sqlx::query_as(
                "SELECT symbol, fiscal_year, operating_cash_flow, capital_expenditures,
                        free_cash_flow, dividends_paid, net_borrowings
                 FROM cash_flows WHERE symbol = ? ORDER BY fiscal_year DESC",
            )
            .bind(symbol)
            .fetch_all(self.pool())
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| CashFlowRow {
                symbol: r.0,
                fiscal_year: r.1,
                operating_cash_flow: r.2,
                capital_expenditures: r.3,
                free_cash_flow: r.4,
                dividends_paid: r.5,
                net_borrowings: r.6,
            })
            .collect())
    }

    // ---- analyst / insider / earnings -------------------------------------

    pub async fn upsert_analyst(&self, snapshot: &AnalystSnapshot) -> AgentResult<()> {
        let _guard = self.write_guard("analyst_data").await;
        sqlx::query(
            "INSERT INTO analyst_data
             (symbol, snapshot_date, rating_mean, target_mean, target_high, target_low,
              buy_count, hold_count, sell_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol, snapshot_date) DO UPDATE SET
                rating_mean = excluded.rating_mean, target_mean = excluded.target_mean,
                target_high = excluded.target_high, target_low = excluded.target_low,
                buy_count = excluded.buy_count, hold_count = excluded.hold_count,
                sell_count = excluded.sell_count",
        )
        .bind(&snapshot.symbol)
        .bind(fmt_date(snapshot.snapshot_date))
        .bind(snapshot.rating_mean)
        .bind(snapshot.target_mean)
        .bind(snapshot.target_high)
        .bind(snapshot.target_low)
        .bind(snapshot.buy_count)
        .bind(snapshot.hold_count)
        .bind(snapshot.sell_count)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn latest_analyst(&self, symbol: &str) -> AgentResult<Option<AnalystSnapshot>> {
        let row: Option<(
            String,
            String,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<i64>,
            Option<i64>,
            Option<i64>,
        )> = sqlx::query_as(
            "SELECT symbol, snapshot_date, rating_mean, target_mean, target_high, target_low,
                    buy_count, hold_count, sell_count
             FROM analyst_data WHERE symbol = ? ORDER BY snapshot_date DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| AnalystSnapshot {
            symbol: r.0,
            snapshot_date: parse_date(&r.1),
            rating_mean: r.2,
            target_mean: r.3,
            target_high: r.4,
            target_low: r.5,
            buy_count: r.6,
            hold_count: r.7,
            sell_count: r.8,
        }))
    }

    pub async fn upsert_insider(&self, summary: &InsiderSummary) -> AgentResult<()> {
        let _guard = self.write_guard("insider_summary").await;
        sqlx::query(
            "INSERT INTO insider_summary
             (symbol, snapshot_date, net_shares_90d, net_value_90d, buy_count_90d, sell_count_90d)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol, snapshot_date) DO UPDATE SET
                net_shares_90d = excluded.net_shares_90d,
                net_value_90d = excluded.net_value_90d,
                buy_count_90d = excluded.buy_count_90d,
                sell_count_90d = excluded.sell_count_90d",
        )
        .bind(&summary.symbol)
        .bind(fmt_date(summary.snapshot_date))
        .bind(summary.net_shares_90d)
        .bind(summary.net_value_90d)
        .bind(summary.buy_count_90d)
        .bind(summary.sell_count_90d)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn latest_insider(&self, symbol: &str) -> AgentResult<Option<InsiderSummary>> {
        let row: Option<(String, String, f64, f64, i64, i64)> = sqlx::query_as(
            "SELECT symbol, snapshot_date, net_shares_90d, net_value_90d, buy_count_90d,
                    sell_count_90d
             FROM insider_summary WHERE symbol = ? ORDER BY snapshot_date DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| InsiderSummary {
            symbol: r.0,
            snapshot_date: parse_date(&r.1),
            net_shares_90d: r.2,
            net_value_90d: r.3,
            buy_count_90d: r.4,
            sell_count_90d: r.5,
        }))
    }

    pub async fn upsert_earnings(&self, events: &[EarningsEvent]) -> AgentResult<i64> {
        if events.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_guard("earnings_calendar").await;
        for e in events {
            sqlx::query(
                "INSERT INTO earnings_calendar (symbol, event_date, period, eps_estimate, confirmed)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(symbol, event_date) DO UPDATE SET
                    period = excluded.period, eps_estimate = excluded.eps_estimate,
                    confirmed = excluded.confirmed",
            )
            .bind(&e.symbol)
            .bind(fmt_date(e.event_date))
            .bind(&e.period)
            .bind(e.eps_estimate)
            .bind(e.confirmed as i64)
            .execute(self.pool())
            .await?;
        }
        Ok(events.len() as i64)
    }

    pub async fn next_earnings(
        &self,
        symbol: &str,
        from: NaiveDate,
    ) -> AgentResult<Option<EarningsEvent>> {
        let row: Option<(String, String, String, Option<f64>, i64)> = sqlx::query_as(
            "SELECT symbol, event_date, period, eps_estimate, confirmed
             FROM earnings_calendar WHERE symbol = ? AND event_date >= ?
             ORDER BY event_date ASC LIMIT 1",
        )
        .bind(symbol)
        .bind(fmt_date(from))
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| EarningsEvent {
            symbol: r.0,
            event_date: parse_date(&r.1),
            period: r.2,
            eps_estimate: r.3,
            confirmed: r.4 != 0,
        }))
    }

    // ---- technicals / risk metrics -----------------------------------------

    pub async fn upsert_technicals(&self, row: &TechnicalRow) -> AgentResult<()> {
        let _guard = self.write_guard("technicals").await;
        let payload = serde_json::to_string(row)
            .map_err(|e| AgentError::Store(format!("serialize technicals: {e}")))?;
        sqlx::query(
            "INSERT INTO technicals (symbol, date, payload) VALUES (?, ?, ?)
             ON CONFLICT(symbol, date) DO UPDATE SET payload = excluded.payload",
        )
        .bind(&row.symbol)
        .bind(fmt_date(row.date))
        .bind(payload)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn recent_technicals(&self, symbol: &str, limit: i64) -> AgentResult<Vec<TechnicalRow>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT payload FROM technicals WHERE symbol = ? ORDER BY date DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|(payload,)| {
                serde_json::from_str(&payload)
                    .map_err(|e| AgentError::Store(format!("decode technicals: {e}")))
            })
            .collect()
    }

    pub async fn upsert_risk_row(&self, row: &RiskRow) -> AgentResult<()> {
        let _guard = self.write_guard("risk_metrics").await;
        let payload = serde_json::to_string(row)
            .map_err(|e| AgentError::Store(format!("serialize risk row: {e}")))?;
        sqlx::query(
            "INSERT INTO risk_metrics (symbol, date, payload) VALUES (?, ?, ?)
             ON CONFLICT(symbol, date) DO UPDATE SET payload = excluded.payload",
        )
        .bind(&row.symbol)
        .bind(fmt_date(row.date))
        .bind(payload)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn latest_risk_row(&self, symbol: &str) -> AgentResult<Option<RiskRow>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT payload FROM risk_metrics WHERE symbol = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;

        row.map(|(payload,)| {
            serde_json::from_str(&payload)
                .map_err(|e| AgentError::Store(format!("decode risk row: {e}")))
        })
        .transpose()
    }

    // ---- news / transcripts ------------------------------------------------

    /// Insert articles, skipping ones whose content hash is already present.
    /// Returns the number of new rows.
    pub async fn insert_news(&self, articles: &[NewsArticle]) -> AgentResult<i64> {
        if articles.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_guard("news_articles").await;
        let mut inserted = 0i64;
        for a in articles {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO news_articles
                 (id, symbol, title, source, url, published_at, summary)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&a.id)
            .bind(&a.symbol)
            .bind(&a.title)
            .bind(&a.source)
            .bind(&a.url)
            .bind(fmt_ts(a.published_at))
            .bind(&a.summary)
            .execute(self.pool())
            .await?;
            inserted += result.rows_affected() as i64;
        }
        Ok(inserted)
    }

    pub async fn news_for(&self, symbol: &str, limit: i64) -> AgentResult<Vec<NewsArticle>> {
        let rows: Vec<(String, String, String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, symbol, title, source, url, published_at, summary
             FROM news_articles WHERE symbol = ? ORDER BY published_at DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| NewsArticle {
                id: r.0,
                symbol: r.1,
                title: r.2,
                source: r.3,
                url: r.4,
                published_at: parse_ts(&r.5),
                summary: r.6,
            })
            .collect())
    }

    /// Insert transcripts, skipping already-seen video ids.
    pub async fn insert_transcripts(&self, transcripts: &[Transcript]) -> AgentResult<i64> {
        if transcripts.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_guard("transcripts").await;
        let mut inserted = 0i64;
        for t in transcripts {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO transcripts
                 (video_id, symbol, title, channel, published_at, duration_secs, text)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&t.video_id)
            .bind(&t.symbol)
            .bind(&t.title)
            .bind(&t.channel)
            .bind(fmt_ts(t.published_at))
            .bind(t.duration_secs)
            .bind(&t.text)
            .execute(self.pool())
            .await?;
            inserted += result.rows_affected() as i64;
        }
        Ok(inserted)
    }

    pub async fn transcripts_for(&self, symbol: &str, limit: i64) -> AgentResult<Vec<Transcript>> {
        let rows: Vec<(String, String, String, String, String, i64, String)> = sqlx::query_as(
            "SELECT video_id, symbol, title, channel, published_at, duration_secs, text
             FROM transcripts WHERE symbol = ? ORDER BY published_at DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Transcript {
                video_id: r.0,
                symbol: r.1,
                title: r.2,
                channel: r.3,
                published_at: parse_ts(&r.4),
                duration_secs: r.5,
                text: r.6,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(symbol: &str, date: &str, close: f64) -> DailyCandle {
        DailyCandle {
            symbol: symbol.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1_000_000.0,
        }
    }

    #[tokio::test]
    async fn candle_upsert_is_idempotent() {
        let store = MarketStore::in_memory().await.unwrap();
        let candles = vec![candle("AAPL", "2024-03-01", 180.0), candle("AAPL", "2024-03-04", 182.5)];
        store.upsert_candles(&candles).await.unwrap();
        store.upsert_candles(&candles).await.unwrap();

        let from = NaiveDate::parse_from_str("2024-01-01", "%Y-%m-%d").unwrap();
        let to = NaiveDate::parse_from_str("2024-12-31", "%Y-%m-%d").unwrap();
        let loaded = store.candles("AAPL", from, to).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!((loaded[1].close - 182.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn latest_candle_not_found_for_unknown_symbol() {
        let store = MarketStore::in_memory().await.unwrap();
        let err = store.latest_candle("ZZZZ").await.unwrap_err();
        assert_eq!(err.error_kind(), "not_found");
    }

    #[tokio::test]
    async fn fundamentals_round_trip() {
        let store = MarketStore::in_memory().await.unwrap();
        let snapshot = FundamentalsSnapshot {
            symbol: "NVDA".to_string(),
            snapshot_date: Utc::now().date_naive(),
            pe_ratio: Some(65.2),
            market_cap: Some(2.2e12),
            ..Default::default()
        };
        store.upsert_fundamentals(&snapshot).await.unwrap();
        let loaded = store.latest_fundamentals("NVDA").await.unwrap();
        assert_eq!(loaded.symbol, "NVDA");
        assert!((loaded.pe_ratio.unwrap() - 65.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn news_dedupes_by_content_hash() {
        let store = MarketStore::in_memory().await.unwrap();
        let article = NewsArticle {
            id: "abc123".to_string(),
            symbol: "TSLA".to_string(),
            title: "Deliveries beat estimates".to_string(),
            source: "wire".to_string(),
            url: "https://example.com/a".to_string(),
            published_at: Utc::now(),
            summary: "Q2 deliveries came in ahead of consensus.".to_string(),
        };
        assert_eq!(store.insert_news(&[article.clone()]).await.unwrap(), 1);
        assert_eq!(store.insert_news(&[article]).await.unwrap(), 0);
    }
}
