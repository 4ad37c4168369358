use agent_core::{
    AgentError, AgentResult, Order, OrderSide, OrderStatus, PortfolioSnapshot, PortfolioSummary,
    Position, Quote,
};
use chrono::Utc;
use market_store::MarketStore;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

/// Simulated broker over the store: cash, positions, orders, realized P&L.
///
/// All mutations flow through the single trading worker, so the methods here
/// assume external serialization and only guard the bookkeeping invariants:
/// cash never goes negative, sells never exceed the held quantity, and a
/// position whose quantity reaches zero is deleted.
pub struct PaperTrader {
    store: MarketStore,
}

impl PaperTrader {
    pub fn new(store: MarketStore) -> Self {
        Self { store }
    }

    pub async fn init(&self, starting_balance: f64) -> AgentResult<()> {
        self.store.init_portfolio_state(starting_balance).await
    }

    pub async fn positions(&self) -> AgentResult<Vec<Position>> {
        self.store.positions().await
    }

    pub async fn position(&self, symbol: &str) -> AgentResult<Option<Position>> {
        self.store.position(symbol).await
    }

    /// Market-fill a buy: decrement cash, add to (or open) the position with
    /// a weighted-average entry price, persist the filled order.
    pub async fn buy(
        &self,
        symbol: &str,
        qty: i64,
        price: f64,
        conviction: Option<f64>,
        signal_label: Option<&str>,
    ) -> AgentResult<Order> {
        if qty < 1 {
            return Err(AgentError::Validation(format!("buy qty must be >= 1, got {qty}")));
        }
        let (cash, realized) = self.store.portfolio_state().await?;

        let cash_dec = Decimal::from_f64(cash).unwrap_or_default();
        let cost = Decimal::from(qty) * Decimal::from_f64(price).unwrap_or_default();
        let remaining = cash_dec - cost;
        if remaining < Decimal::ZERO {
            return Err(AgentError::InsufficientCash {
                needed: cost.to_f64().unwrap_or(0.0),
                available: cash,
            });
        }

        let now = Utc::now();
        let position = match self.store.position(symbol).await? {
            Some(mut existing) => {
                // Weighted-average entry across the old and new lots
                let old_qty = Decimal::from(existing.qty);
                let new_qty = Decimal::from(existing.qty + qty);
                let old_cost = old_qty * Decimal::from_f64(existing.avg_entry_price).unwrap_or_default();
                let avg = (old_cost + cost) / new_qty;
                existing.qty += qty;
                existing.avg_entry_price = avg.to_f64().unwrap_or(existing.avg_entry_price);
                existing.current_price = price;
                existing.unrealized_pnl =
                    (price - existing.avg_entry_price) * existing.qty as f64;
                existing.last_updated = now;
                existing
            }
            None => Position {
                symbol: symbol.to_string(),
                qty,
                avg_entry_price: price,
                current_price: price,
                unrealized_pnl: 0.0,
                stop_loss: None,
                take_profit: None,
                trailing_stop_pct: None,
                opened_at: now,
                last_updated: now,
            },
        };

        self.store.upsert_position(&position).await?;
        self.store
            .set_portfolio_state(remaining.to_f64().unwrap_or(0.0), realized)
            .await?;

        let order = Order {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            qty,
            price,
            order_type: "market".to_string(),
            status: OrderStatus::Filled,
            created_at: now,
            filled_at: Some(now),
            conviction_score: conviction,
            signal_label: signal_label.map(str::to_string),
        };
        self.store.insert_order(&order).await?;
        tracing::info!("BUY {symbol} x{qty} @ {price:.2} (cash {:.2})", remaining);
        Ok(order)
    }

    /// Market-fill a sell: credit cash, accumulate realized P&L, shrink or
    /// delete the position row.
    pub async fn sell(
        &self,
        symbol: &str,
        qty: i64,
        price: f64,
        conviction: Option<f64>,
        signal_label: Option<&str>,
    ) -> AgentResult<Order> {
        if qty < 1 {
            return Err(AgentError::Validation(format!("sell qty must be >= 1, got {qty}")));
        }
        let mut position = self
            .store
            .position(symbol)
            .await?
            .ok_or_else(|| AgentError::PositionNotFound(symbol.to_string()))?;
        if qty > position.qty {
            return Err(AgentError::Validation(format!(
                "sell qty {qty} exceeds held {}",
                position.qty
            )));
        }

        let (cash, realized) = self.store.portfolio_state().await?;
        let proceeds = Decimal::from(qty) * Decimal::from_f64(price).unwrap_or_default();
        let entry = Decimal::from_f64(position.avg_entry_price).unwrap_or_default();
        let pnl = Decimal::from(qty) * (Decimal::from_f64(price).unwrap_or_default() - entry);

        let new_cash = Decimal::from_f64(cash).unwrap_or_default() + proceeds;
        let new_realized = Decimal::from_f64(realized).unwrap_or_default() + pnl;

        let now = Utc::now();
        if qty == position.qty {
            self.store.delete_position(symbol).await?;
        } else {
            position.qty -= qty;
            position.current_price = price;
            position.unrealized_pnl = (price - position.avg_entry_price) * position.qty as f64;
            position.last_updated = now;
            self.store.upsert_position(&position).await?;
        }
        self.store
            .set_portfolio_state(
                new_cash.to_f64().unwrap_or(0.0),
                new_realized.to_f64().unwrap_or(0.0),
            )
            .await?;

        let order = Order {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side: OrderSide::Sell,
            qty,
            price,
            order_type: "market".to_string(),
            status: OrderStatus::Filled,
            created_at: now,
            filled_at: Some(now),
            conviction_score: conviction,
            signal_label: signal_label.map(str::to_string),
        };
        self.store.insert_order(&order).await?;
        tracing::info!(
            "SELL {symbol} x{qty} @ {price:.2} (pnl {:.2})",
            pnl.to_f64().unwrap_or(0.0)
        );
        Ok(order)
    }

    /// Refresh position marks from a live quote batch.
    pub async fn update_prices(&self, quotes: &HashMap<String, Quote>) -> AgentResult<()> {
        for mut position in self.store.positions().await? {
            if let Some(quote) = quotes.get(&position.symbol) {
                position.current_price = quote.price;
                position.unrealized_pnl =
                    (quote.price - position.avg_entry_price) * position.qty as f64;
                position.last_updated = Utc::now();
                self.store.upsert_position(&position).await?;
            }
        }
        Ok(())
    }

    /// Consistent read of cash + positions for API responses and prompts.
    pub async fn portfolio(&self) -> AgentResult<PortfolioSummary> {
        let (cash, realized_pnl) = self.store.portfolio_state().await?;
        let positions = self.store.positions().await?;
        let positions_value: f64 = positions
            .iter()
            .map(|p| p.current_price * p.qty as f64)
            .sum();
        let unrealized_pnl: f64 = positions.iter().map(|p| p.unrealized_pnl).sum();
        Ok(PortfolioSummary {
            cash,
            positions_value,
            total_value: cash + positions_value,
            realized_pnl,
            unrealized_pnl,
            positions,
        })
    }

    /// Persist a timestamped snapshot of the current totals.
    pub async fn snapshot(&self) -> AgentResult<PortfolioSnapshot> {
        let summary = self.portfolio().await?;
        let snapshot = PortfolioSnapshot {
            taken_at: Utc::now(),
            cash: summary.cash,
            positions_value: summary.positions_value,
            total_value: summary.total_value,
            realized_pnl: summary.realized_pnl,
            unrealized_pnl: summary.unrealized_pnl,
        };
        self.store.insert_snapshot(&snapshot).await?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn trader_with(balance: f64) -> (MarketStore, PaperTrader) {
        let store = MarketStore::in_memory().await.unwrap();
        let trader = PaperTrader::new(store.clone());
        trader.init(balance).await.unwrap();
        (store, trader)
    }

    #[tokio::test]
    async fn buy_decrements_cash_and_opens_position() {
        let (_store, trader) = trader_with(10_000.0).await;
        trader.buy("NVDA", 6, 145.20, Some(0.82), None).await.unwrap();

        let summary = trader.portfolio().await.unwrap();
        assert!((summary.cash - 9_128.80).abs() < 1e-6);
        let position = trader.position("NVDA").await.unwrap().unwrap();
        assert_eq!(position.qty, 6);
        assert!((position.avg_entry_price - 145.20).abs() < 1e-9);
    }

    #[tokio::test]
    async fn buy_never_lets_cash_go_negative() {
        let (_store, trader) = trader_with(100.0).await;
        let err = trader.buy("NVDA", 1, 145.20, None, None).await.unwrap_err();
        assert_eq!(err.error_kind(), "insufficient_cash");
        let summary = trader.portfolio().await.unwrap();
        assert!((summary.cash - 100.0).abs() < 1e-9);
        assert!(summary.positions.is_empty());
    }

    #[tokio::test]
    async fn adds_use_weighted_average_entry() {
        let (_store, trader) = trader_with(100_000.0).await;
        trader.buy("AAPL", 10, 100.0, None, None).await.unwrap();
        trader.buy("AAPL", 10, 110.0, None, None).await.unwrap();

        let position = trader.position("AAPL").await.unwrap().unwrap();
        assert_eq!(position.qty, 20);
        assert!((position.avg_entry_price - 105.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn full_sell_closes_position_and_realizes_pnl() {
        let (_store, trader) = trader_with(10_000.0).await;
        trader.buy("AAPL", 10, 100.0, None, None).await.unwrap();
        trader.sell("AAPL", 10, 104.5, None, Some("trailing_stop")).await.unwrap();

        let summary = trader.portfolio().await.unwrap();
        assert!((summary.realized_pnl - 45.0).abs() < 1e-9);
        assert!((summary.cash - 10_045.0).abs() < 1e-9);
        assert!(trader.position("AAPL").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_sell_shrinks_position() {
        let (_store, trader) = trader_with(10_000.0).await;
        trader.buy("AAPL", 10, 100.0, None, None).await.unwrap();
        trader.sell("AAPL", 4, 110.0, None, None).await.unwrap();

        let position = trader.position("AAPL").await.unwrap().unwrap();
        assert_eq!(position.qty, 6);
        let summary = trader.portfolio().await.unwrap();
        assert!((summary.realized_pnl - 40.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sell_without_position_fails() {
        let (_store, trader) = trader_with(10_000.0).await;
        let err = trader.sell("GHOST", 1, 10.0, None, None).await.unwrap_err();
        assert_eq!(err.error_kind(), "position_not_found");
    }

    #[tokio::test]
    async fn oversized_sell_is_rejected() {
        let (_store, trader) = trader_with(10_000.0).await;
        trader.buy("AAPL", 5, 100.0, None, None).await.unwrap();
        let err = trader.sell("AAPL", 6, 100.0, None, None).await.unwrap_err();
        assert_eq!(err.error_kind(), "validation_error");
    }

    #[tokio::test]
    async fn snapshot_round_trips_totals() {
        let (store, trader) = trader_with(10_000.0).await;
        trader.buy("AAPL", 10, 100.0, None, None).await.unwrap();
        let snapshot = trader.snapshot().await.unwrap();
        assert!((snapshot.total_value - 10_000.0).abs() < 1e-6);

        let loaded = store.snapshots(1).await.unwrap();
        assert!((loaded[0].total_value - snapshot.total_value).abs() < 1e-9);
    }
}
