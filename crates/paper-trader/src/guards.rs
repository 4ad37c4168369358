use agent_core::{AgentResult, PortfolioSummary, RiskConfig};
use chrono::{Duration, Utc};
use market_store::MarketStore;

/// Risk-guard verdict: every failed guard is named so the router can report
/// why an order was blocked without raising.
#[derive(Debug, Default)]
pub struct GuardReport {
    pub failed: Vec<String>,
}

impl GuardReport {
    pub fn passed(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Evaluate the buy-side risk guards for a proposed order.
pub async fn check_buy_guards(
    store: &MarketStore,
    risk: &RiskConfig,
    portfolio: &PortfolioSummary,
    symbol: &str,
    qty: i64,
    price: f64,
    conviction: f64,
) -> AgentResult<GuardReport> {
    let mut report = GuardReport::default();
    let order_value = qty as f64 * price;
    let total = portfolio.total_value.max(1e-9);

    // Per-position cap
    let existing_value = portfolio
        .positions
        .iter()
        .find(|p| p.symbol == symbol)
        .map(|p| p.current_price * p.qty as f64)
        .unwrap_or(0.0);
    if (existing_value + order_value) / total > risk.max_position_pct + 1e-9 {
        report.failed.push("per_position_cap".to_string());
    }

    // Total allocation cap
    if (portfolio.positions_value + order_value) / total
        > risk.max_portfolio_allocation_pct + 1e-9
    {
        report.failed.push("total_allocation_cap".to_string());
    }

    // Daily order count cap
    let today = Utc::now().date_naive();
    if store.order_count_on(today).await? >= risk.max_orders_per_day {
        report.failed.push("daily_order_cap".to_string());
    }

    // Daily loss limit against the first snapshot of the day
    if let Some(open_snapshot) = store.first_snapshot_on(today).await? {
        if open_snapshot.total_value > 1e-9 {
            let day_return =
                (portfolio.total_value - open_snapshot.total_value) / open_snapshot.total_value;
            if day_return < -risk.daily_loss_limit_pct {
                report.failed.push("daily_loss_limit".to_string());
            }
        }
    }

    // Re-buy cooldown after a sell
    if let Some(last_sell) = store.last_sell_at(symbol).await? {
        if Utc::now() - last_sell < Duration::days(risk.rebuy_cooldown_days) {
            report.failed.push("rebuy_cooldown".to_string());
        }
    }

    // Conviction floor
    if conviction < risk.min_conviction {
        report.failed.push("min_conviction".to_string());
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{Order, OrderSide, OrderStatus, Position};

    fn portfolio(cash: f64, positions: Vec<Position>) -> PortfolioSummary {
        let positions_value: f64 = positions.iter().map(|p| p.current_price * p.qty as f64).sum();
        PortfolioSummary {
            cash,
            positions_value,
            total_value: cash + positions_value,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            positions,
        }
    }

    fn position(symbol: &str, qty: i64, price: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            qty,
            avg_entry_price: price,
            current_price: price,
            unrealized_pnl: 0.0,
            stop_loss: None,
            take_profit: None,
            trailing_stop_pct: None,
            opened_at: Utc::now(),
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn clean_slate_passes_all_guards() {
        let store = MarketStore::in_memory().await.unwrap();
        let report = check_buy_guards(
            &store,
            &RiskConfig::default(),
            &portfolio(10_000.0, vec![]),
            "NVDA",
            6,
            145.20,
            0.82,
        )
        .await
        .unwrap();
        assert!(report.passed(), "{:?}", report.failed);
    }

    #[tokio::test]
    async fn oversized_order_trips_position_cap() {
        let store = MarketStore::in_memory().await.unwrap();
        let report = check_buy_guards(
            &store,
            &RiskConfig::default(),
            &portfolio(10_000.0, vec![]),
            "NVDA",
            20,
            145.20,
            0.82,
        )
        .await
        .unwrap();
        assert!(report.failed.contains(&"per_position_cap".to_string()));
    }

    #[tokio::test]
    async fn allocation_cap_counts_existing_positions() {
        let store = MarketStore::in_memory().await.unwrap();
        let mut risk = RiskConfig::default();
        risk.max_position_pct = 0.5;
        risk.max_portfolio_allocation_pct = 0.5;
        let held = position("AAPL", 45, 100.0); // 4500 of 10k total
        let report = check_buy_guards(
            &store,
            &risk,
            &portfolio(5_500.0, vec![held]),
            "NVDA",
            10,
            100.0, // +1000 -> 5500/10000 = 55% allocated
            0.82,
        )
        .await
        .unwrap();
        assert!(report.failed.contains(&"total_allocation_cap".to_string()));
    }

    #[tokio::test]
    async fn rebuy_cooldown_blocks_fresh_sell() {
        let store = MarketStore::in_memory().await.unwrap();
        store
            .insert_order(&Order {
                id: "s1".to_string(),
                symbol: "NVDA".to_string(),
                side: OrderSide::Sell,
                qty: 5,
                price: 140.0,
                order_type: "market".to_string(),
                status: OrderStatus::Filled,
                created_at: Utc::now() - Duration::days(2),
                filled_at: Some(Utc::now() - Duration::days(2)),
                conviction_score: None,
                signal_label: None,
            })
            .await
            .unwrap();

        let report = check_buy_guards(
            &store,
            &RiskConfig::default(),
            &portfolio(10_000.0, vec![]),
            "NVDA",
            6,
            145.20,
            0.82,
        )
        .await
        .unwrap();
        assert!(report.failed.contains(&"rebuy_cooldown".to_string()));
    }

    #[tokio::test]
    async fn conviction_floor_blocks_weak_signals() {
        let store = MarketStore::in_memory().await.unwrap();
        let report = check_buy_guards(
            &store,
            &RiskConfig::default(),
            &portfolio(10_000.0, vec![]),
            "NVDA",
            1,
            100.0,
            0.40,
        )
        .await
        .unwrap();
        assert!(report.failed.contains(&"min_conviction".to_string()));
    }
}
