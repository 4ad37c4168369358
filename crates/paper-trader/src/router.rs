use crate::guards::check_buy_guards;
use crate::trader::PaperTrader;
use agent_core::{
    conviction_band, AgentResult, EventStatus, PriceTrigger, RiskConfig, Signal, TickerDossier,
    TradeDecision, TriggerKind, TriggerStatus,
};
use chrono::Utc;
use market_store::{MarketStore, RunContext};
use uuid::Uuid;

/// Turns a fresh dossier into a sized order (or a reasoned no-op).
///
/// Policy decisions never raise: the returned decision carries the action,
/// the quantity, a rationale string, and the names of any guards that
/// blocked a would-be order.
pub struct SignalRouter {
    store: MarketStore,
    risk: RiskConfig,
}

impl SignalRouter {
    pub fn new(store: MarketStore, risk: RiskConfig) -> Self {
        Self { store, risk }
    }

    /// Evaluate the dossier against portfolio state and risk guards.
    pub async fn decide(
        &self,
        trader: &PaperTrader,
        dossier: &TickerDossier,
    ) -> AgentResult<TradeDecision> {
        let symbol = dossier.symbol.as_str();
        let conviction = dossier.conviction_score;
        let portfolio = trader.portfolio().await?;
        let held = portfolio.positions.iter().find(|p| p.symbol == symbol);

        let price = match dossier.scorecard.last_close {
            Some(price) if price > 0.0 => price,
            _ => {
                return Ok(TradeDecision {
                    symbol: symbol.to_string(),
                    action: Signal::Hold,
                    qty: 0,
                    rationale: "no reference price available".to_string(),
                    blocked_by: Vec::new(),
                })
            }
        };

        if conviction >= self.risk.buy_threshold && held.is_none() {
            let budget = self.risk.max_position_pct * portfolio.total_value;
            let qty = ((budget / price).floor() as i64).min(self.risk.max_position_shares);
            if qty < 1 {
                return Ok(TradeDecision {
                    symbol: symbol.to_string(),
                    action: Signal::Hold,
                    qty: 0,
                    rationale: format!(
                        "conviction {conviction:.2} qualifies but position budget {budget:.2} \
                         buys no shares at {price:.2}"
                    ),
                    blocked_by: Vec::new(),
                });
            }

            let guards = check_buy_guards(
                &self.store,
                &self.risk,
                &portfolio,
                symbol,
                qty,
                price,
                conviction,
            )
            .await?;
            if !guards.passed() {
                return Ok(TradeDecision {
                    symbol: symbol.to_string(),
                    action: Signal::Hold,
                    qty: 0,
                    rationale: format!(
                        "buy blocked by risk guards: {}",
                        guards.failed.join(", ")
                    ),
                    blocked_by: guards.failed,
                });
            }

            return Ok(TradeDecision {
                symbol: symbol.to_string(),
                action: Signal::Buy,
                qty,
                rationale: format!(
                    "conviction {conviction:.2} ({}) >= buy threshold {:.2}",
                    conviction_band(conviction),
                    self.risk.buy_threshold
                ),
                blocked_by: Vec::new(),
            });
        }

        if conviction <= self.risk.sell_threshold {
            if let Some(position) = held {
                return Ok(TradeDecision {
                    symbol: symbol.to_string(),
                    action: Signal::Sell,
                    qty: position.qty,
                    rationale: format!(
                        "conviction {conviction:.2} ({}) <= sell threshold {:.2}",
                        conviction_band(conviction),
                        self.risk.sell_threshold
                    ),
                    blocked_by: Vec::new(),
                });
            }
        }

        Ok(TradeDecision {
            symbol: symbol.to_string(),
            action: Signal::Hold,
            qty: 0,
            rationale: format!(
                "conviction {conviction:.2} ({}) inside hold band",
                conviction_band(conviction)
            ),
            blocked_by: Vec::new(),
        })
    }

    /// Decide and execute: fills go through the paper trader, protective
    /// triggers are installed after buys and cleared after closes, and every
    /// outcome is logged.
    pub async fn handle_dossier(
        &self,
        ctx: &RunContext,
        trader: &PaperTrader,
        dossier: &TickerDossier,
    ) -> AgentResult<TradeDecision> {
        let decision = self.decide(trader, dossier).await?;
        let symbol = decision.symbol.as_str();

        if !decision.blocked_by.is_empty() {
            ctx.emit(
                "trading",
                "signal_blocked",
                &decision.rationale,
                Some(symbol),
                Some(serde_json::json!({
                    "blocked_by": &decision.blocked_by,
                    "conviction": dossier.conviction_score,
                })),
                EventStatus::Warning,
            )
            .await;
            return Ok(decision);
        }

        match decision.action {
            Signal::Buy => {
                let price = dossier.scorecard.last_close.unwrap_or_default();
                let order = trader
                    .buy(
                        symbol,
                        decision.qty,
                        price,
                        Some(dossier.conviction_score),
                        Some(conviction_band(dossier.conviction_score)),
                    )
                    .await?;
                self.install_triggers(symbol, decision.qty, price).await?;
                ctx.emit(
                    "trading",
                    "order_filled",
                    &format!("BUY {symbol} x{} @ {price:.2}", decision.qty),
                    Some(symbol),
                    Some(serde_json::json!({
                        "order_id": order.id,
                        "side": "buy",
                        "qty": decision.qty,
                        "price": price,
                    })),
                    EventStatus::Success,
                )
                .await;
            }
            Signal::Sell => {
                let price = dossier.scorecard.last_close.unwrap_or_default();
                let order = trader
                    .sell(
                        symbol,
                        decision.qty,
                        price,
                        Some(dossier.conviction_score),
                        Some(conviction_band(dossier.conviction_score)),
                    )
                    .await?;
                self.store.cancel_triggers_for(symbol).await?;
                ctx.emit(
                    "trading",
                    "order_filled",
                    &format!("SELL {symbol} x{} @ {price:.2}", decision.qty),
                    Some(symbol),
                    Some(serde_json::json!({
                        "order_id": order.id,
                        "side": "sell",
                        "qty": decision.qty,
                        "price": price,
                    })),
                    EventStatus::Success,
                )
                .await;
            }
            Signal::Hold => {
                ctx.emit(
                    "trading",
                    "hold",
                    &decision.rationale,
                    Some(symbol),
                    None,
                    EventStatus::Success,
                )
                .await;
            }
        }
        Ok(decision)
    }

    /// Protective triggers from risk config: a hard stop below entry, a
    /// take-profit above, and a trailing stop seeded at the fill price.
    async fn install_triggers(&self, symbol: &str, qty: i64, fill_price: f64) -> AgentResult<()> {
        let now = Utc::now();
        let mut triggers = vec![PriceTrigger {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            kind: TriggerKind::StopLoss,
            trigger_price: fill_price * (1.0 - self.risk.stop_loss_pct_default),
            high_water_mark: None,
            trailing_pct: None,
            qty,
            status: TriggerStatus::Active,
            created_at: now,
        }];
        if self.risk.take_profit_pct_default > 0.0 {
            triggers.push(PriceTrigger {
                id: Uuid::new_v4().to_string(),
                symbol: symbol.to_string(),
                kind: TriggerKind::TakeProfit,
                trigger_price: fill_price * (1.0 + self.risk.take_profit_pct_default),
                high_water_mark: None,
                trailing_pct: None,
                qty,
                status: TriggerStatus::Active,
                created_at: now,
            });
        }
        if self.risk.trailing_stop_pct_default > 0.0 {
            triggers.push(PriceTrigger {
                id: Uuid::new_v4().to_string(),
                symbol: symbol.to_string(),
                kind: TriggerKind::TrailingStop,
                trigger_price: fill_price * (1.0 - self.risk.trailing_stop_pct_default),
                high_water_mark: Some(fill_price),
                trailing_pct: Some(self.risk.trailing_stop_pct_default),
                qty,
                status: TriggerStatus::Active,
                created_at: now,
            });
        }
        for trigger in &triggers {
            self.store.insert_trigger(trigger).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{QuantScorecard, TriggerKind};
    use market_store::EventLog;

    fn dossier(symbol: &str, conviction: f64, price: f64) -> TickerDossier {
        TickerDossier {
            symbol: symbol.to_string(),
            generated_at: Utc::now(),
            version: 1,
            scorecard: QuantScorecard {
                symbol: symbol.to_string(),
                as_of: Utc::now(),
                last_close: Some(price),
                ..Default::default()
            },
            qa_pairs: Vec::new(),
            executive_summary: String::new(),
            bull_case: String::new(),
            bear_case: String::new(),
            key_catalysts: Vec::new(),
            conviction_score: conviction,
            signal_summary: String::new(),
            total_tokens: 0,
        }
    }

    async fn setup(balance: f64) -> (MarketStore, PaperTrader, SignalRouter, RunContext) {
        let store = MarketStore::in_memory().await.unwrap();
        let trader = PaperTrader::new(store.clone());
        trader.init(balance).await.unwrap();
        let router = SignalRouter::new(store.clone(), RiskConfig::default());
        let ctx = RunContext::new(EventLog::new(store.clone()));
        (store, trader, router, ctx)
    }

    #[tokio::test]
    async fn happy_buy_fills_sizes_and_installs_stop() {
        let (store, trader, router, ctx) = setup(10_000.0).await;
        let decision = router
            .handle_dossier(&ctx, &trader, &dossier("NVDA", 0.82, 145.20))
            .await
            .unwrap();

        assert_eq!(decision.action, Signal::Buy);
        assert_eq!(decision.qty, 6); // floor(1000 / 145.20)

        let summary = trader.portfolio().await.unwrap();
        assert!((summary.cash - 9_128.80).abs() < 1e-6);

        let triggers = store.active_triggers().await.unwrap();
        let stop = triggers
            .iter()
            .find(|t| t.kind == TriggerKind::StopLoss)
            .expect("stop loss installed");
        let expected_stop = 145.20 * (1.0 - RiskConfig::default().stop_loss_pct_default);
        assert!((stop.trigger_price - expected_stop).abs() < 1e-9);
        assert_eq!(stop.qty, 6);
    }

    #[tokio::test]
    async fn low_conviction_with_position_sells_everything() {
        let (store, trader, router, ctx) = setup(10_000.0).await;
        trader.buy("AAPL", 10, 100.0, None, None).await.unwrap();

        let decision = router
            .handle_dossier(&ctx, &trader, &dossier("AAPL", 0.2, 110.0))
            .await
            .unwrap();
        assert_eq!(decision.action, Signal::Sell);
        assert_eq!(decision.qty, 10);
        assert!(trader.position("AAPL").await.unwrap().is_none());
        assert!(store.active_triggers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hold_band_changes_nothing() {
        let (store, trader, router, ctx) = setup(10_000.0).await;
        let decision = router
            .handle_dossier(&ctx, &trader, &dossier("AMD", 0.5, 150.0))
            .await
            .unwrap();
        assert_eq!(decision.action, Signal::Hold);
        assert!(trader.portfolio().await.unwrap().positions.is_empty());
        assert!(store.orders(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_position_is_not_doubled() {
        let (_store, trader, router, ctx) = setup(100_000.0).await;
        trader.buy("NVDA", 5, 145.20, None, None).await.unwrap();
        let decision = router
            .handle_dossier(&ctx, &trader, &dossier("NVDA", 0.9, 145.20))
            .await
            .unwrap();
        assert_eq!(decision.action, Signal::Hold);
        assert_eq!(trader.position("NVDA").await.unwrap().unwrap().qty, 5);
    }

    #[tokio::test]
    async fn blocked_buy_emits_signal_blocked() {
        let (store, trader, router, ctx) = setup(10_000.0).await;
        // Sell yesterday puts NVDA inside the re-buy cooldown window
        trader.buy("NVDA", 2, 100.0, None, None).await.unwrap();
        trader.sell("NVDA", 2, 110.0, None, None).await.unwrap();

        let decision = router
            .handle_dossier(&ctx, &trader, &dossier("NVDA", 0.9, 100.0))
            .await
            .unwrap();
        assert_eq!(decision.action, Signal::Hold);
        assert!(decision.blocked_by.contains(&"rebuy_cooldown".to_string()));

        let events = ctx
            .event_log()
            .query(10, Some("trading"), Some("NVDA"), None)
            .await
            .unwrap();
        assert!(events.iter().any(|e| e.event_type == "signal_blocked"));
        assert!(store.position("NVDA").await.unwrap().is_none());
    }
}
