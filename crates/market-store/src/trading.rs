use crate::db::{fmt_ts, parse_ts, parse_ts_opt, MarketStore};
use agent_core::{
    AgentError, AgentResult, Order, OrderSide, OrderStatus, PortfolioSnapshot, Position,
    PriceTrigger, TriggerKind, TriggerStatus,
};
use chrono::{NaiveDate, Utc};

impl MarketStore {
    // ---- portfolio state ---------------------------------------------------

    /// Seed cash/realized P&L once; later calls are no-ops.
    pub async fn init_portfolio_state(&self, starting_balance: f64) -> AgentResult<()> {
        let _guard = self.write_guard("portfolio_state").await;
        sqlx::query(
            "INSERT INTO portfolio_state (id, cash, realized_pnl) VALUES (1, ?, 0)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(starting_balance)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn portfolio_state(&self) -> AgentResult<(f64, f64)> {
        let row: Option<(f64, f64)> =
            sqlx::query_as("SELECT cash, realized_pnl FROM portfolio_state WHERE id = 1")
                .fetch_optional(self.pool())
                .await?;
        row.ok_or_else(|| AgentError::NotFound("portfolio state not initialized".to_string()))
    }

    pub async fn set_portfolio_state(&self, cash: f64, realized_pnl: f64) -> AgentResult<()> {
        let _guard = self.write_guard("portfolio_state").await;
        sqlx::query("UPDATE portfolio_state SET cash = ?, realized_pnl = ? WHERE id = 1")
            .bind(cash)
            .bind(realized_pnl)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    // ---- positions ---------------------------------------------------------

    pub async fn upsert_position(&self, position: &Position) -> AgentResult<()> {
        let _guard = self.write_guard("positions").await;
        sqlx::query(
            "INSERT INTO positions
             (symbol, qty, avg_entry_price, current_price, unrealized_pnl, stop_loss,
              take_profit, trailing_stop_pct, opened_at, last_updated)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol) DO UPDATE SET
                qty = excluded.qty, avg_entry_price = excluded.avg_entry_price,
                current_price = excluded.current_price,
                unrealized_pnl = excluded.unrealized_pnl, stop_loss = excluded.stop_loss,
                take_profit = excluded.take_profit,
                trailing_stop_pct = excluded.trailing_stop_pct,
                last_updated = excluded.last_updated",
        )
        .bind(&position.symbol)
        .bind(position.qty)
        .bind(position.avg_entry_price)
        .bind(position.current_price)
        .bind(position.unrealized_pnl)
        .bind(position.stop_loss)
        .bind(position.take_profit)
        .bind(position.trailing_stop_pct)
        .bind(fmt_ts(position.opened_at))
        .bind(fmt_ts(position.last_updated))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn position(&self, symbol: &str) -> AgentResult<Option<Position>> {
        let row: Option<PositionRow> = sqlx::query_as(
            "SELECT symbol, qty, avg_entry_price, current_price, unrealized_pnl, stop_loss,
                    take_profit, trailing_stop_pct, opened_at, last_updated
             FROM positions WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(PositionRow::into_position))
    }

    pub async fn positions(&self) -> AgentResult<Vec<Position>> {
        let rows: Vec<PositionRow> = sqlx::query_as(
            "SELECT symbol, qty, avg_entry_price, current_price, unrealized_pnl, stop_loss,
                    take_profit, trailing_stop_pct, opened_at, last_updated
             FROM positions ORDER BY symbol",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(PositionRow::into_position).collect())
    }

    pub async fn delete_position(&self, symbol: &str) -> AgentResult<()> {
        let _guard = self.write_guard("positions").await;
        sqlx::query("DELETE FROM positions WHERE symbol = ?")
            .bind(symbol)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    // ---- orders ------------------------------------------------------------

    pub async fn insert_order(&self, order: &Order) -> AgentResult<()> {
        let _guard = self.write_guard("orders").await;
        sqlx::query(
            "INSERT INTO orders
             (id, symbol, side, qty, price, order_type, status, created_at, filled_at,
              conviction_score, signal_label)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.qty)
        .bind(order.price)
        .bind(&order.order_type)
        .bind(order.status.as_str())
        .bind(fmt_ts(order.created_at))
        .bind(order.filled_at.map(fmt_ts))
        .bind(order.conviction_score)
        .bind(order.signal_label.as_deref())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> AgentResult<()> {
        let _guard = self.write_guard("orders").await;
        let filled_at = if status == OrderStatus::Filled {
            Some(fmt_ts(Utc::now()))
        } else {
            None
        };
        sqlx::query("UPDATE orders SET status = ?, filled_at = COALESCE(?, filled_at) WHERE id = ?")
            .bind(status.as_str())
            .bind(filled_at)
            .bind(order_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn cancel_pending_orders(&self) -> AgentResult<i64> {
        let _guard = self.write_guard("orders").await;
        let result = sqlx::query("UPDATE orders SET status = 'cancelled' WHERE status = 'pending'")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() as i64)
    }

    pub async fn orders(&self, limit: i64) -> AgentResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            "SELECT id, symbol, side, qty, price, order_type, status, created_at, filled_at,
                    conviction_score, signal_label
             FROM orders ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(OrderRow::into_order).collect())
    }

    /// Count of orders created on the given calendar date (UTC).
    pub async fn order_count_on(&self, date: NaiveDate) -> AgentResult<i64> {
        let prefix = format!("{}%", date.format("%Y-%m-%d"));
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE created_at LIKE ?")
            .bind(prefix)
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    /// Most recent filled sell for a symbol, for the re-buy cooldown guard.
    pub async fn last_sell_at(&self, symbol: &str) -> AgentResult<Option<chrono::DateTime<Utc>>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT created_at FROM orders
             WHERE symbol = ? AND side = 'sell' AND status = 'filled'
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(ts,)| parse_ts(&ts)))
    }

    // ---- price triggers ----------------------------------------------------

    pub async fn insert_trigger(&self, trigger: &PriceTrigger) -> AgentResult<()> {
        let _guard = self.write_guard("price_triggers").await;
        sqlx::query(
            "INSERT INTO price_triggers
             (id, symbol, kind, trigger_price, high_water_mark, trailing_pct, qty, status,
              created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trigger.id)
        .bind(&trigger.symbol)
        .bind(trigger.kind.as_str())
        .bind(trigger.trigger_price)
        .bind(trigger.high_water_mark)
        .bind(trigger.trailing_pct)
        .bind(trigger.qty)
        .bind(trigger.status.as_str())
        .bind(fmt_ts(trigger.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn active_triggers(&self) -> AgentResult<Vec<PriceTrigger>> {
        let rows: Vec<TriggerRow> = sqlx::query_as(
            "SELECT id, symbol, kind, trigger_price, high_water_mark, trailing_pct, qty, status,
                    created_at
             FROM price_triggers WHERE status = 'active' ORDER BY created_at",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(TriggerRow::into_trigger).collect())
    }

    pub async fn triggers(&self, limit: i64) -> AgentResult<Vec<PriceTrigger>> {
        let rows: Vec<TriggerRow> = sqlx::query_as(
            "SELECT id, symbol, kind, trigger_price, high_water_mark, trailing_pct, qty, status,
                    created_at
             FROM price_triggers ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(TriggerRow::into_trigger).collect())
    }

    /// Ratchet the trailing high-water mark. Only moves upward.
    pub async fn update_trigger_hwm(&self, trigger_id: &str, hwm: f64) -> AgentResult<()> {
        let _guard = self.write_guard("price_triggers").await;
        sqlx::query(
            "UPDATE price_triggers SET high_water_mark = ?
             WHERE id = ? AND status = 'active'
               AND (high_water_mark IS NULL OR high_water_mark < ?)",
        )
        .bind(hwm)
        .bind(trigger_id)
        .bind(hwm)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Compare-and-set `active -> triggered`. Returns false if the trigger
    /// was already fired or cancelled, which guarantees at-most-once firing.
    pub async fn fire_trigger(&self, trigger_id: &str) -> AgentResult<bool> {
        let _guard = self.write_guard("price_triggers").await;
        let result = sqlx::query(
            "UPDATE price_triggers SET status = 'triggered'
             WHERE id = ? AND status = 'active'",
        )
        .bind(trigger_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn cancel_triggers_for(&self, symbol: &str) -> AgentResult<i64> {
        let _guard = self.write_guard("price_triggers").await;
        let result = sqlx::query(
            "UPDATE price_triggers SET status = 'cancelled'
             WHERE symbol = ? AND status = 'active'",
        )
        .bind(symbol)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() as i64)
    }

    pub async fn cancel_all_active_triggers(&self) -> AgentResult<i64> {
        let _guard = self.write_guard("price_triggers").await;
        let result =
            sqlx::query("UPDATE price_triggers SET status = 'cancelled' WHERE status = 'active'")
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected() as i64)
    }

    // ---- snapshots ---------------------------------------------------------

    pub async fn insert_snapshot(&self, snapshot: &PortfolioSnapshot) -> AgentResult<()> {
        let _guard = self.write_guard("portfolio_snapshots").await;
        sqlx::query(
            "INSERT INTO portfolio_snapshots
             (taken_at, cash, positions_value, total_value, realized_pnl, unrealized_pnl)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(fmt_ts(snapshot.taken_at))
        .bind(snapshot.cash)
        .bind(snapshot.positions_value)
        .bind(snapshot.total_value)
        .bind(snapshot.realized_pnl)
        .bind(snapshot.unrealized_pnl)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn snapshots(&self, limit: i64) -> AgentResult<Vec<PortfolioSnapshot>> {
        let rows: Vec<(String, f64, f64, f64, f64, f64)> = sqlx::query_as(
            "SELECT taken_at, cash, positions_value, total_value, realized_pnl, unrealized_pnl
             FROM portfolio_snapshots ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| PortfolioSnapshot {
                taken_at: parse_ts(&r.0),
                cash: r.1,
                positions_value: r.2,
                total_value: r.3,
                realized_pnl: r.4,
                unrealized_pnl: r.5,
            })
            .collect())
    }

    /// Earliest snapshot taken on the given date, for the daily-loss guard.
    pub async fn first_snapshot_on(&self, date: NaiveDate) -> AgentResult<Option<PortfolioSnapshot>> {
        let prefix = format!("{}%", date.format("%Y-%m-%d"));
        let row: Option<(String, f64, f64, f64, f64, f64)> = sqlx::query_as(
            "SELECT taken_at, cash, positions_value, total_value, realized_pnl, unrealized_pnl
             FROM portfolio_snapshots WHERE taken_at LIKE ? ORDER BY id ASC LIMIT 1",
        )
        .bind(prefix)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| PortfolioSnapshot {
            taken_at: parse_ts(&r.0),
            cash: r.1,
            positions_value: r.2,
            total_value: r.3,
            realized_pnl: r.4,
            unrealized_pnl: r.5,
        }))
    }
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    symbol: String,
    qty: i64,
    avg_entry_price: f64,
    current_price: f64,
    unrealized_pnl: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    trailing_stop_pct: Option<f64>,
    opened_at: String,
    last_updated: String,
}

impl PositionRow {
    fn into_position(self) -> Position {
        Position {
            symbol: self.symbol,
            qty: self.qty,
            avg_entry_price: self.avg_entry_price,
            current_price: self.current_price,
            unrealized_pnl: self.unrealized_pnl,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            trailing_stop_pct: self.trailing_stop_pct,
            opened_at: parse_ts(&self.opened_at),
            last_updated: parse_ts(&self.last_updated),
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    symbol: String,
    side: String,
    qty: i64,
    price: f64,
    order_type: String,
    status: String,
    created_at: String,
    filled_at: Option<String>,
    conviction_score: Option<f64>,
    signal_label: Option<String>,
}

impl OrderRow {
    fn into_order(self) -> Order {
        Order {
            id: self.id,
            symbol: self.symbol,
            side: OrderSide::parse(&self.side),
            qty: self.qty,
            price: self.price,
            order_type: self.order_type,
            status: OrderStatus::parse(&self.status),
            created_at: parse_ts(&self.created_at),
            filled_at: parse_ts_opt(self.filled_at),
            conviction_score: self.conviction_score,
            signal_label: self.signal_label,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TriggerRow {
    id: String,
    symbol: String,
    kind: String,
    trigger_price: f64,
    high_water_mark: Option<f64>,
    trailing_pct: Option<f64>,
    qty: i64,
    status: String,
    created_at: String,
}

impl TriggerRow {
    fn into_trigger(self) -> PriceTrigger {
        PriceTrigger {
            id: self.id,
            symbol: self.symbol,
            kind: TriggerKind::parse(&self.kind),
            trigger_price: self.trigger_price,
            high_water_mark: self.high_water_mark,
            trailing_pct: self.trailing_pct,
            qty: self.qty,
            status: TriggerStatus::parse(&self.status),
            created_at: parse_ts(&self.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trigger(id: &str) -> PriceTrigger {
        PriceTrigger {
            id: id.to_string(),
            symbol: "AAPL".to_string(),
            kind: TriggerKind::TrailingStop,
            trigger_price: 95.0,
            high_water_mark: Some(100.0),
            trailing_pct: Some(0.05),
            qty: 10,
            status: TriggerStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn trigger_fires_exactly_once() {
        let store = MarketStore::in_memory().await.unwrap();
        store.insert_trigger(&sample_trigger("t1")).await.unwrap();

        assert!(store.fire_trigger("t1").await.unwrap());
        assert!(!store.fire_trigger("t1").await.unwrap());
        assert!(store.active_triggers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hwm_only_ratchets_upward() {
        let store = MarketStore::in_memory().await.unwrap();
        store.insert_trigger(&sample_trigger("t2")).await.unwrap();

        store.update_trigger_hwm("t2", 110.0).await.unwrap();
        store.update_trigger_hwm("t2", 104.0).await.unwrap();

        let triggers = store.active_triggers().await.unwrap();
        assert!((triggers[0].high_water_mark.unwrap() - 110.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn portfolio_state_initializes_once() {
        let store = MarketStore::in_memory().await.unwrap();
        store.init_portfolio_state(10_000.0).await.unwrap();
        store.set_portfolio_state(9_000.0, 50.0).await.unwrap();
        store.init_portfolio_state(10_000.0).await.unwrap();

        let (cash, realized) = store.portfolio_state().await.unwrap();
        assert!((cash - 9_000.0).abs() < 1e-9);
        assert!((realized - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn order_round_trip() {
        let store = MarketStore::in_memory().await.unwrap();
        let order = Order {
            id: "o1".to_string(),
            symbol: "NVDA".to_string(),
            side: OrderSide::Buy,
            qty: 6,
            price: 145.20,
            order_type: "market".to_string(),
            status: OrderStatus::Filled,
            created_at: Utc::now(),
            filled_at: Some(Utc::now()),
            conviction_score: Some(0.82),
            signal_label: Some("strong_buy".to_string()),
        };
        store.insert_order(&order).await.unwrap();

        let loaded = store.orders(10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].side, OrderSide::Buy);
        assert_eq!(loaded[0].qty, 6);
        assert!((loaded[0].price - 145.20).abs() < 1e-9);
        assert_eq!(store.order_count_on(Utc::now().date_naive()).await.unwrap(), 1);
    }
}
