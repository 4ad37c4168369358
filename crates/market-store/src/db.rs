use agent_core::{AgentError, AgentResult};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Durable tabular store shared by every component.
///
/// Readers run concurrently off the pool; writers to the same table are
/// serialized through a per-table mutex so distinct tables can still make
/// progress in parallel.
#[derive(Clone)]
pub struct MarketStore {
    pool: SqlitePool,
    write_locks: Arc<DashMap<&'static str, Arc<Mutex<()>>>>,
}

impl MarketStore {
    /// Open (creating if missing) and apply the schema.
    pub async fn open(database_url: &str) -> AgentResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AgentError::Store(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| AgentError::Store(e.to_string()))?;

        let store = Self {
            pool,
            write_locks: Arc::new(DashMap::new()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn in_memory() -> AgentResult<Self> {
        // Single connection keeps the in-memory database alive and shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| AgentError::Store(e.to_string()))?;

        let store = Self {
            pool,
            write_locks: Arc::new(DashMap::new()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> AgentResult<()> {
        let schema = include_str!("../schema.sql");
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| AgentError::Store(format!("schema: {e}")))?;
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquire the write lock for a table. Held for the duration of a
    /// multi-statement write so same-table writers never interleave.
    pub async fn write_guard(&self, table: &'static str) -> OwnedMutexGuard<()> {
        let lock = self
            .write_locks
            .entry(table)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub fn parse_ts_opt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().map(parse_ts)
}

pub fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap_or_else(|_| Utc::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_applies_schema() {
        let store = MarketStore::in_memory().await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watchlist")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[test]
    fn timestamp_round_trip() {
        let now = Utc::now();
        let parsed = parse_ts(&fmt_ts(now));
        assert!((parsed - now).num_milliseconds().abs() < 1000);
    }
}
