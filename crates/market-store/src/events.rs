use crate::db::{fmt_ts, parse_ts, MarketStore};
use agent_core::{AgentResult, EventStatus, PipelineEvent};
use chrono::Utc;
use uuid::Uuid;

/// Append-only pipeline audit trail.
///
/// Writes are best-effort: a failed insert is logged at debug level and
/// swallowed so an ailing event table can never stall the pipeline.
#[derive(Clone)]
pub struct EventLog {
    store: MarketStore,
}

impl EventLog {
    pub fn new(store: MarketStore) -> Self {
        Self { store }
    }

    /// Start a new pipeline run; the returned id groups all its events.
    pub fn begin_run(&self) -> String {
        Uuid::new_v4().to_string()
    }

    pub async fn log(
        &self,
        run_id: &str,
        phase: &str,
        event_type: &str,
        detail: &str,
        symbol: Option<&str>,
        metadata: Option<serde_json::Value>,
        status: EventStatus,
    ) {
        let metadata = metadata.unwrap_or_else(|| serde_json::json!({}));
        let result = sqlx::query(
            "INSERT INTO pipeline_events
             (timestamp, phase, event_type, symbol, detail, metadata, run_id, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(phase)
        .bind(event_type)
        .bind(symbol)
        .bind(detail)
        .bind(metadata.to_string())
        .bind(run_id)
        .bind(status.as_str())
        .execute(self.store.pool())
        .await;

        if let Err(e) = result {
            tracing::debug!("event log write failed ({phase}/{event_type}): {e}");
        }
    }

    /// Query events newest-first with optional filters.
    pub async fn query(
        &self,
        limit: i64,
        phase: Option<&str>,
        symbol: Option<&str>,
        run_id: Option<&str>,
    ) -> AgentResult<Vec<PipelineEvent>> {
        let rows: Vec<(i64, String, String, String, Option<String>, String, String, String, String)> =
            sqlx::query_as(
                "SELECT id, timestamp, phase, event_type, symbol, detail, metadata, run_id, status
                 FROM pipeline_events
                 WHERE (?1 IS NULL OR phase = ?1)
                   AND (?2 IS NULL OR symbol = ?2)
                   AND (?3 IS NULL OR run_id = ?3)
                 ORDER BY id DESC LIMIT ?4",
            )
            .bind(phase)
            .bind(symbol)
            .bind(run_id)
            .bind(limit)
            .fetch_all(self.store.pool())
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| PipelineEvent {
                id: r.0,
                timestamp: parse_ts(&r.1),
                phase: r.2,
                event_type: r.3,
                symbol: r.4,
                detail: r.5,
                metadata: serde_json::from_str(&r.6).unwrap_or_else(|_| serde_json::json!({})),
                run_id: r.7,
                status: EventStatus::parse(&r.8),
            })
            .collect())
    }
}

/// Event-log handle bound to one run id, threaded through every stage of a
/// pipeline invocation so no component ever reads the run id from a global.
#[derive(Clone)]
pub struct RunContext {
    log: EventLog,
    run_id: String,
}

impl RunContext {
    pub fn new(log: EventLog) -> Self {
        let run_id = log.begin_run();
        Self { log, run_id }
    }

    pub fn with_run_id(log: EventLog, run_id: impl Into<String>) -> Self {
        Self {
            log,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub async fn success(&self, phase: &str, event_type: &str, detail: &str) {
        self.log
            .log(&self.run_id, phase, event_type, detail, None, None, EventStatus::Success)
            .await;
    }

    pub async fn emit(
        &self,
        phase: &str,
        event_type: &str,
        detail: &str,
        symbol: Option<&str>,
        metadata: Option<serde_json::Value>,
        status: EventStatus,
    ) {
        self.log
            .log(&self.run_id, phase, event_type, detail, symbol, metadata, status)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_group_by_run_and_filter_by_phase() {
        let store = MarketStore::in_memory().await.unwrap();
        let log = EventLog::new(store);

        let run_a = RunContext::new(log.clone());
        let run_b = RunContext::new(log.clone());
        run_a.success("discovery", "run_start", "starting").await;
        run_a
            .emit(
                "collection",
                "collection_incomplete",
                "fundamentals failed",
                Some("Y"),
                None,
                EventStatus::Warning,
            )
            .await;
        run_b.success("discovery", "run_start", "starting").await;

        let events = log.query(50, None, None, Some(run_a.run_id())).await.unwrap();
        assert_eq!(events.len(), 2);
        // Newest first
        assert_eq!(events[0].event_type, "collection_incomplete");
        assert_eq!(events[0].status, EventStatus::Warning);

        let collection = log.query(50, Some("collection"), None, None).await.unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection[0].symbol.as_deref(), Some("Y"));
    }
}
