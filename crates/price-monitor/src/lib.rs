use agent_core::{
    AgentResult, EventStatus, PriceTrigger, Quote, QuoteProvider, TriggerKind,
};
use market_store::{MarketStore, RunContext};
use paper_trader::PaperTrader;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Polls live prices and enforces stop-loss / take-profit / trailing-stop
/// triggers against open positions.
///
/// A trigger fires at most once: the store transition `active -> triggered`
/// is a compare-and-set, and the sell executes only when that CAS wins. The
/// fill price is the polled price that caused the firing.
pub struct PriceMonitor {
    store: MarketStore,
    trader: Arc<PaperTrader>,
    quotes: Arc<dyn QuoteProvider>,
}

impl PriceMonitor {
    pub fn new(store: MarketStore, trader: Arc<PaperTrader>, quotes: Arc<dyn QuoteProvider>) -> Self {
        Self {
            store,
            trader,
            quotes,
        }
    }

    /// One monitor tick. Refreshes position marks regardless of market
    /// hours; trigger evaluation is skipped (and logged) when closed.
    pub async fn tick(&self, ctx: &RunContext, market_open: bool) -> AgentResult<usize> {
        let positions = self.trader.positions().await?;
        let triggers = self.store.active_triggers().await?;
        if positions.is_empty() && triggers.is_empty() {
            return Ok(0);
        }

        let symbols: Vec<String> = positions
            .iter()
            .map(|p| p.symbol.clone())
            .chain(triggers.iter().map(|t| t.symbol.clone()))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let quotes = self.quotes.batch_quotes(&symbols).await?;
        self.trader.update_prices(&quotes).await?;

        if !market_open {
            ctx.emit(
                "monitor",
                "market_closed_skip",
                &format!("{} active triggers held", triggers.len()),
                None,
                None,
                EventStatus::Skipped,
            )
            .await;
            return Ok(0);
        }

        let mut fired = 0usize;
        for trigger in triggers {
            let Some(quote) = quotes.get(&trigger.symbol) else {
                continue;
            };
            if self.evaluate(ctx, &trigger, quote).await? {
                fired += 1;
            }
        }
        Ok(fired)
    }

    async fn evaluate(
        &self,
        ctx: &RunContext,
        trigger: &PriceTrigger,
        quote: &Quote,
    ) -> AgentResult<bool> {
        let price = quote.price;
        let should_fire = match trigger.kind {
            TriggerKind::StopLoss => price <= trigger.trigger_price,
            TriggerKind::TakeProfit => price >= trigger.trigger_price,
            TriggerKind::TrailingStop => {
                // Ratchet the high-water mark, then test the effective stop.
                let hwm = trigger.high_water_mark.unwrap_or(price).max(price);
                if Some(hwm) != trigger.high_water_mark {
                    self.store.update_trigger_hwm(&trigger.id, hwm).await?;
                }
                let trailing_pct = trigger.trailing_pct.unwrap_or(0.0);
                let effective_stop = hwm * (1.0 - trailing_pct);
                price <= effective_stop
            }
        };
        if !should_fire {
            return Ok(false);
        }

        // At-most-once: lose the CAS, skip the sell.
        if !self.store.fire_trigger(&trigger.id).await? {
            return Ok(false);
        }

        let held = self.trader.position(&trigger.symbol).await?;
        let sell_qty = match &held {
            Some(position) => trigger.qty.min(position.qty),
            None => 0,
        };
        if sell_qty > 0 {
            self.trader
                .sell(
                    &trigger.symbol,
                    sell_qty,
                    price,
                    None,
                    Some(trigger.kind.as_str()),
                )
                .await?;
        }
        // Sibling protections are moot once the exit executes.
        self.store.cancel_triggers_for(&trigger.symbol).await?;

        ctx.emit(
            "monitor",
            "trigger_fired",
            &format!(
                "{} {} fired at {price:.2} (sold {sell_qty})",
                trigger.kind.as_str(),
                trigger.symbol
            ),
            Some(&trigger.symbol),
            Some(serde_json::json!({
                "trigger_id": &trigger.id,
                "kind": trigger.kind.as_str(),
                "price": price,
                "qty": sell_qty,
            })),
            EventStatus::Success,
        )
        .await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{AgentResult, TriggerStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use market_store::EventLog;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Quote source that replays a scripted price sequence per tick.
    struct ScriptedQuotes {
        prices: Mutex<Vec<f64>>,
        symbol: String,
    }

    #[async_trait]
    impl QuoteProvider for ScriptedQuotes {
        async fn batch_quotes(&self, _symbols: &[String]) -> AgentResult<HashMap<String, Quote>> {
            let mut prices = self.prices.lock().unwrap();
            let price = if prices.is_empty() { 0.0 } else { prices.remove(0) };
            let mut map = HashMap::new();
            map.insert(
                self.symbol.clone(),
                Quote {
                    symbol: self.symbol.clone(),
                    price,
                    prev_close: None,
                    volume: None,
                    timestamp: Utc::now(),
                },
            );
            Ok(map)
        }
    }

    async fn setup(
        prices: Vec<f64>,
    ) -> (MarketStore, Arc<PaperTrader>, PriceMonitor, RunContext) {
        let store = MarketStore::in_memory().await.unwrap();
        let trader = Arc::new(PaperTrader::new(store.clone()));
        trader.init(10_000.0).await.unwrap();
        let quotes = Arc::new(ScriptedQuotes {
            prices: Mutex::new(prices),
            symbol: "AAPL".to_string(),
        });
        let monitor = PriceMonitor::new(store.clone(), Arc::clone(&trader), quotes);
        let ctx = RunContext::new(EventLog::new(store.clone()));
        (store, trader, monitor, ctx)
    }

    fn trailing_trigger(qty: i64, entry: f64, pct: f64) -> PriceTrigger {
        PriceTrigger {
            id: Uuid::new_v4().to_string(),
            symbol: "AAPL".to_string(),
            kind: TriggerKind::TrailingStop,
            trigger_price: entry * (1.0 - pct),
            high_water_mark: Some(entry),
            trailing_pct: Some(pct),
            qty,
            status: TriggerStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn trailing_stop_ratchets_then_fires() {
        // Price walk 102, 108, 110, 107, 104.5 against a 5% trail from 100:
        // hwm tops out at 110; the effective stop 104.5 catches the last tick.
        let (store, trader, monitor, ctx) =
            setup(vec![102.0, 108.0, 110.0, 107.0, 104.5]).await;
        trader.buy("AAPL", 10, 100.0, None, None).await.unwrap();
        store
            .insert_trigger(&trailing_trigger(10, 100.0, 0.05))
            .await
            .unwrap();

        for expected_fired in [0usize, 0, 0, 0, 1] {
            let fired = monitor.tick(&ctx, true).await.unwrap();
            assert_eq!(fired, expected_fired);
        }

        // Position closed at 104.5, realized pnl 10 * 4.5
        assert!(trader.position("AAPL").await.unwrap().is_none());
        let summary = trader.portfolio().await.unwrap();
        assert!((summary.realized_pnl - 45.0).abs() < 1e-6);

        // Ratchet was monotone and the trigger fired exactly once
        let all = store.triggers(10).await.unwrap();
        assert_eq!(all[0].status, TriggerStatus::Triggered);
        assert!((all[0].high_water_mark.unwrap() - 110.0).abs() < 1e-9);

        // No further firing on later ticks
        let fired = monitor.tick(&ctx, true).await.unwrap();
        assert_eq!(fired, 0);
    }

    #[tokio::test]
    async fn stop_loss_fires_at_or_below_threshold() {
        let (store, trader, monitor, ctx) = setup(vec![96.0]).await;
        trader.buy("AAPL", 5, 100.0, None, None).await.unwrap();
        store
            .insert_trigger(&PriceTrigger {
                id: "stop1".to_string(),
                symbol: "AAPL".to_string(),
                kind: TriggerKind::StopLoss,
                trigger_price: 96.0,
                high_water_mark: None,
                trailing_pct: None,
                qty: 5,
                status: TriggerStatus::Active,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(monitor.tick(&ctx, true).await.unwrap(), 1);
        assert!(trader.position("AAPL").await.unwrap().is_none());
        // Fill at the polled price that caused the firing
        let orders = store.orders(5).await.unwrap();
        assert!((orders[0].price - 96.0).abs() < 1e-9);
        assert_eq!(orders[0].signal_label.as_deref(), Some("stop_loss"));
    }

    #[tokio::test]
    async fn take_profit_fires_at_or_above_threshold() {
        let (store, trader, monitor, ctx) = setup(vec![120.0]).await;
        trader.buy("AAPL", 5, 100.0, None, None).await.unwrap();
        store
            .insert_trigger(&PriceTrigger {
                id: "tp1".to_string(),
                symbol: "AAPL".to_string(),
                kind: TriggerKind::TakeProfit,
                trigger_price: 120.0,
                high_water_mark: None,
                trailing_pct: None,
                qty: 5,
                status: TriggerStatus::Active,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(monitor.tick(&ctx, true).await.unwrap(), 1);
        let summary = trader.portfolio().await.unwrap();
        assert!((summary.realized_pnl - 100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn closed_market_skips_firing_but_updates_marks() {
        let (store, trader, monitor, ctx) = setup(vec![90.0]).await;
        trader.buy("AAPL", 5, 100.0, None, None).await.unwrap();
        store
            .insert_trigger(&PriceTrigger {
                id: "stop2".to_string(),
                symbol: "AAPL".to_string(),
                kind: TriggerKind::StopLoss,
                trigger_price: 95.0,
                high_water_mark: None,
                trailing_pct: None,
                qty: 5,
                status: TriggerStatus::Active,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(monitor.tick(&ctx, false).await.unwrap(), 0);
        // Trigger survives, position mark refreshed
        assert_eq!(store.active_triggers().await.unwrap().len(), 1);
        let position = trader.position("AAPL").await.unwrap().unwrap();
        assert!((position.current_price - 90.0).abs() < 1e-9);

        let events = ctx
            .event_log()
            .query(5, Some("monitor"), None, None)
            .await
            .unwrap();
        assert_eq!(events[0].event_type, "market_closed_skip");
    }
}
