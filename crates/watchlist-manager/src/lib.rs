use agent_core::{
    signal_for_conviction, AgentError, AgentResult, EventStatus, ScoredTicker, TickerDossier,
    WatchlistConfig, WatchlistEntry, WatchlistSource, WatchlistStatus,
};
use chrono::{Duration, Utc};
use market_store::{MarketStore, RunContext};

/// Lifecycle manager for tracked symbols: add/remove, cooldown, conviction
/// updates, and conviction-based auto-removal.
///
/// Invariants: manual entries are never auto-removed, entries holding a
/// position are never removed, and removed entries stay in cooldown for
/// `cooldown_days` before discovery may re-add them.
pub struct WatchlistManager {
    store: MarketStore,
    config: WatchlistConfig,
}

impl WatchlistManager {
    pub fn new(store: MarketStore, config: WatchlistConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &WatchlistConfig {
        &self.config
    }

    fn is_tracked(entry: &WatchlistEntry) -> bool {
        matches!(
            entry.status,
            WatchlistStatus::Active | WatchlistStatus::PendingAnalysis
        )
    }

    fn in_cooldown(&self, entry: &WatchlistEntry) -> bool {
        if entry.status != WatchlistStatus::Removed && entry.status != WatchlistStatus::Cooldown {
            return false;
        }
        match entry.removed_at {
            Some(removed_at) => {
                Utc::now() - removed_at < Duration::days(self.config.cooldown_days)
            }
            None => false,
        }
    }

    pub async fn entries(&self) -> AgentResult<Vec<WatchlistEntry>> {
        self.store.watchlist_entries().await
    }

    pub async fn active_entries(&self) -> AgentResult<Vec<WatchlistEntry>> {
        Ok(self
            .store
            .watchlist_entries()
            .await?
            .into_iter()
            .filter(Self::is_tracked)
            .collect())
    }

    pub async fn active_symbols(&self) -> AgentResult<Vec<String>> {
        Ok(self
            .active_entries()
            .await?
            .into_iter()
            .map(|e| e.symbol)
            .collect())
    }

    /// Manual add. Overrides cooldown, still subject to the active cap.
    pub async fn add_manual(&self, symbol: &str) -> AgentResult<WatchlistEntry> {
        let symbol = symbol.to_uppercase();
        let active = self.active_entries().await?;
        if active.iter().any(|e| e.symbol == symbol) {
            return Err(AgentError::Validation(format!("{symbol} already tracked")));
        }
        if active.len() >= self.config.max_active {
            return Err(AgentError::Validation(format!(
                "watchlist full ({} active)",
                active.len()
            )));
        }

        let entry = match self.store.watchlist_entry(&symbol).await? {
            Some(mut existing) => {
                existing.source = WatchlistSource::Manual;
                existing.status = WatchlistStatus::PendingAnalysis;
                existing.removed_at = None;
                existing.consecutive_low = 0;
                existing.added_at = Utc::now();
                existing
            }
            None => WatchlistEntry::new(symbol.clone(), WatchlistSource::Manual, 0.0),
        };
        self.store.upsert_watchlist_entry(&entry).await?;
        Ok(entry)
    }

    pub async fn remove_manual(&self, symbol: &str) -> AgentResult<()> {
        let symbol = symbol.to_uppercase();
        let mut entry = self
            .store
            .watchlist_entry(&symbol)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("{symbol} not on watchlist")))?;
        if entry.position_held {
            return Err(AgentError::Validation(format!(
                "{symbol} holds an open position; close it before removing"
            )));
        }
        entry.status = WatchlistStatus::Removed;
        entry.removed_at = Some(Utc::now());
        self.store.upsert_watchlist_entry(&entry).await
    }

    /// Promote discovery candidates: highest decayed score first, skipping
    /// already-tracked and cooldown-bound symbols, until the cap is reached.
    /// Candidates below the minimum score never qualify.
    pub async fn import_from_discovery(
        &self,
        ctx: &RunContext,
        scored: &[ScoredTicker],
    ) -> AgentResult<Vec<String>> {
        let mut active_count = self.active_entries().await?.len();
        let mut imported = Vec::new();

        let mut ranked: Vec<&ScoredTicker> = scored.iter().collect();
        ranked.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        for candidate in ranked {
            if active_count >= self.config.max_active {
                break;
            }
            if candidate.total_score < self.config.min_discovery_score {
                continue;
            }
            if let Some(existing) = self.store.watchlist_entry(&candidate.symbol).await? {
                if Self::is_tracked(&existing) || self.in_cooldown(&existing) {
                    continue;
                }
            }

            let mut entry = WatchlistEntry::new(
                candidate.symbol.clone(),
                WatchlistSource::AutoDiscovery,
                candidate.total_score,
            );
            entry.status = WatchlistStatus::PendingAnalysis;
            self.store.upsert_watchlist_entry(&entry).await?;
            active_count += 1;

            ctx.emit(
                "watchlist",
                "watchlist_import",
                &format!("imported {} (score {:.1})", candidate.symbol, candidate.total_score),
                Some(&candidate.symbol),
                Some(serde_json::json!({
                    "score": candidate.total_score,
                    "sources": &candidate.sources,
                    "sentiment": candidate.sentiment.as_str(),
                })),
                EventStatus::Success,
            )
            .await;
            imported.push(candidate.symbol.clone());
        }
        Ok(imported)
    }

    /// Fold a fresh dossier into the entry: conviction, analysis bookkeeping,
    /// signal label, and the consecutive-low-conviction removal rule.
    pub async fn apply_dossier(
        &self,
        ctx: &RunContext,
        symbol: &str,
        dossier: &TickerDossier,
    ) -> AgentResult<WatchlistEntry> {
        let mut entry = self
            .store
            .watchlist_entry(symbol)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("{symbol} not on watchlist")))?;

        entry.conviction_score = dossier.conviction_score;
        entry.last_analyzed = Some(dossier.generated_at);
        entry.times_analyzed += 1;
        entry.last_signal = Some(signal_for_conviction(dossier.conviction_score));
        if entry.status == WatchlistStatus::PendingAnalysis {
            entry.status = WatchlistStatus::Active;
        }

        if dossier.conviction_score < self.config.low_conviction_threshold {
            entry.consecutive_low += 1;
        } else {
            entry.consecutive_low = 0;
        }

        let should_remove = entry.consecutive_low >= self.config.consecutive_low_to_remove
            && !entry.position_held
            && entry.source == WatchlistSource::AutoDiscovery;
        if should_remove {
            entry.status = WatchlistStatus::Removed;
            entry.removed_at = Some(Utc::now());
            ctx.emit(
                "watchlist",
                "watchlist_remove",
                &format!(
                    "{symbol} removed after {} consecutive low-conviction dossiers",
                    entry.consecutive_low
                ),
                Some(symbol),
                Some(serde_json::json!({
                    "reason": "consecutive_low_conviction",
                    "conviction": dossier.conviction_score,
                })),
                EventStatus::Success,
            )
            .await;
        }

        self.store.upsert_watchlist_entry(&entry).await?;
        Ok(entry)
    }

    /// EOD sweep: auto-discovery entries with no analysis in `stale_days`
    /// are rotated out to make room for fresher candidates.
    pub async fn remove_stale(&self, ctx: &RunContext) -> AgentResult<Vec<String>> {
        let cutoff = Utc::now() - Duration::days(self.config.stale_days);
        let mut removed = Vec::new();

        for mut entry in self.active_entries().await? {
            if entry.source != WatchlistSource::AutoDiscovery || entry.position_held {
                continue;
            }
            let reference = entry.last_analyzed.unwrap_or(entry.added_at);
            if reference < cutoff {
                entry.status = WatchlistStatus::Removed;
                entry.removed_at = Some(Utc::now());
                self.store.upsert_watchlist_entry(&entry).await?;
                ctx.emit(
                    "watchlist",
                    "watchlist_remove",
                    &format!("{} stale since {}", entry.symbol, reference.date_naive()),
                    Some(&entry.symbol),
                    Some(serde_json::json!({"reason": "stale"})),
                    EventStatus::Success,
                )
                .await;
                removed.push(entry.symbol);
            }
        }
        Ok(removed)
    }

    /// Position-held flag is owned by the trading side; the watchlist mirror
    /// gates removal rules.
    pub async fn set_position_held(&self, symbol: &str, held: bool) -> AgentResult<()> {
        if let Some(mut entry) = self.store.watchlist_entry(symbol).await? {
            entry.position_held = held;
            self.store.upsert_watchlist_entry(&entry).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{QAPair, QuantScorecard};
    use market_store::EventLog;

    async fn setup() -> (MarketStore, WatchlistManager, RunContext) {
        let store = MarketStore::in_memory().await.unwrap();
        let manager = WatchlistManager::new(store.clone(), WatchlistConfig::default());
        let ctx = RunContext::new(EventLog::new(store.clone()));
        (store, manager, ctx)
    }

    fn dossier(symbol: &str, conviction: f64) -> TickerDossier {
        TickerDossier {
            symbol: symbol.to_string(),
            generated_at: Utc::now(),
            version: 1,
            scorecard: QuantScorecard::default(),
            qa_pairs: Vec::<QAPair>::new(),
            executive_summary: String::new(),
            bull_case: String::new(),
            bear_case: String::new(),
            key_catalysts: Vec::new(),
            conviction_score: conviction,
            signal_summary: String::new(),
            total_tokens: 0,
        }
    }

    #[tokio::test]
    async fn cap_enforced_on_manual_add() {
        let store = MarketStore::in_memory().await.unwrap();
        let manager = WatchlistManager::new(
            store.clone(),
            WatchlistConfig {
                max_active: 2,
                ..Default::default()
            },
        );
        manager.add_manual("AAPL").await.unwrap();
        manager.add_manual("MSFT").await.unwrap();
        let err = manager.add_manual("NVDA").await.unwrap_err();
        assert_eq!(err.error_kind(), "validation_error");
    }

    #[tokio::test]
    async fn import_skips_low_scores_cooldown_and_active() {
        let (_store, manager, ctx) = setup().await;
        manager.add_manual("AAPL").await.unwrap();
        // Removed entry within cooldown window
        manager.add_manual("GME").await.unwrap();
        manager.remove_manual("GME").await.unwrap();

        let scored = vec![
            ScoredTicker::new("NVDA", "forums", 8.5),
            ScoredTicker::new("AAPL", "forums", 7.0),
            ScoredTicker::new("GME", "forums", 6.0),
            ScoredTicker::new("XYZ", "forums", 1.0),
        ];
        let imported = manager.import_from_discovery(&ctx, &scored).await.unwrap();
        assert_eq!(imported, vec!["NVDA"]);
    }

    #[tokio::test]
    async fn two_low_conviction_dossiers_remove_auto_entry() {
        let (store, manager, ctx) = setup().await;
        let scored = vec![ScoredTicker::new("XCOM", "forums", 5.0)];
        manager.import_from_discovery(&ctx, &scored).await.unwrap();

        manager.apply_dossier(&ctx, "XCOM", &dossier("XCOM", 0.22)).await.unwrap();
        let entry = store.watchlist_entry("XCOM").await.unwrap().unwrap();
        assert_eq!(entry.consecutive_low, 1);
        assert_eq!(entry.status, WatchlistStatus::Active);

        manager.apply_dossier(&ctx, "XCOM", &dossier("XCOM", 0.18)).await.unwrap();
        let entry = store.watchlist_entry("XCOM").await.unwrap().unwrap();
        assert_eq!(entry.status, WatchlistStatus::Removed);
        assert!(entry.removed_at.is_some());

        // Cooldown blocks re-import for the next 7 days
        let imported = manager.import_from_discovery(&ctx, &scored).await.unwrap();
        assert!(imported.is_empty());
    }

    #[tokio::test]
    async fn position_held_blocks_auto_removal() {
        let (store, manager, ctx) = setup().await;
        let scored = vec![ScoredTicker::new("HODL", "forums", 5.0)];
        manager.import_from_discovery(&ctx, &scored).await.unwrap();
        manager.set_position_held("HODL", true).await.unwrap();

        manager.apply_dossier(&ctx, "HODL", &dossier("HODL", 0.1)).await.unwrap();
        manager.apply_dossier(&ctx, "HODL", &dossier("HODL", 0.1)).await.unwrap();

        let entry = store.watchlist_entry("HODL").await.unwrap().unwrap();
        assert_eq!(entry.status, WatchlistStatus::Active);
        assert_eq!(entry.consecutive_low, 2);
    }

    #[tokio::test]
    async fn manual_entries_never_auto_removed() {
        let (store, manager, ctx) = setup().await;
        manager.add_manual("BRK").await.unwrap();
        manager.apply_dossier(&ctx, "BRK", &dossier("BRK", 0.1)).await.unwrap();
        manager.apply_dossier(&ctx, "BRK", &dossier("BRK", 0.1)).await.unwrap();
        let entry = store.watchlist_entry("BRK").await.unwrap().unwrap();
        assert_ne!(entry.status, WatchlistStatus::Removed);
    }

    #[tokio::test]
    async fn signal_follows_conviction_bands() {
        let (store, manager, ctx) = setup().await;
        manager.add_manual("SIG").await.unwrap();
        manager.apply_dossier(&ctx, "SIG", &dossier("SIG", 0.82)).await.unwrap();
        let entry = store.watchlist_entry("SIG").await.unwrap().unwrap();
        assert_eq!(entry.last_signal, Some(agent_core::Signal::Buy));
        assert_eq!(entry.times_analyzed, 1);
    }
}
