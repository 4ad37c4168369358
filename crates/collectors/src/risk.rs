//! Risk-metric row assembly, reusing the scorecard engine's pure math.

use agent_core::{DailyCandle, RiskRow};
use quant_engine::{QuantEngine, QuantInputs};

/// Compute the dated risk row for a symbol from its candle history plus
/// whatever statement data is available.
pub fn compute_risk_row(
    symbol: &str,
    candles: &[DailyCandle],
    inputs_rest: QuantInputs,
    risk_free_rate: f64,
    kelly_fraction: f64,
) -> Option<RiskRow> {
    let last = candles.last()?;
    let inputs = QuantInputs {
        candles: candles.to_vec(),
        ..inputs_rest
    };
    let card = QuantEngine::new(risk_free_rate, kelly_fraction).compute(symbol, &inputs);

    Some(RiskRow {
        symbol: symbol.to_string(),
        date: last.date,
        sharpe: card.sharpe,
        sortino: card.sortino,
        calmar: card.calmar,
        omega: card.omega,
        kelly: card.kelly,
        var_95: card.var_95,
        cvar_95: card.cvar_95,
        max_drawdown: card.max_drawdown,
        percentile_rank_price: card.percentile_rank_price,
        percentile_rank_volume: card.percentile_rank_volume,
        hurst: card.hurst,
        momentum_12m: card.momentum_12m,
        altman_z: card.altman_z,
        piotroski_f: card.piotroski_f,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    #[test]
    fn risk_row_carries_scorecard_values() {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let candles: Vec<DailyCandle> = (0..300)
            .map(|i| {
                let close = 100.0 + (i as f64) * 0.05;
                DailyCandle {
                    symbol: "T".to_string(),
                    date: start + Duration::days(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 2_000_000.0,
                }
            })
            .collect();

        let row = compute_risk_row("T", &candles, QuantInputs::default(), 0.045, 0.5).unwrap();
        assert!(row.sharpe.is_some());
        assert!(row.max_drawdown.is_some());
        assert_eq!(row.date, candles.last().unwrap().date);
    }
}
