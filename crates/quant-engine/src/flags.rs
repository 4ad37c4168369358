use agent_core::QuantScorecard;

/// Deterministic anomaly flags derived from a finished scorecard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnomalyFlag {
    ZScoreHigh,
    PriceAboveUpperBand,
    PriceBelowLowerBand,
    VolumeSpike95th,
    DrawdownExceeds20Pct,
    NegativeSortino,
    InsiderBuyingSpike,
    InsiderSellingSpike,
    EarningsInDays(i64),
    MissingInput(&'static str),
}

impl AnomalyFlag {
    pub fn as_string(&self) -> String {
        match self {
            AnomalyFlag::ZScoreHigh => "z_score_high".to_string(),
            AnomalyFlag::PriceAboveUpperBand => "price_above_upper_band".to_string(),
            AnomalyFlag::PriceBelowLowerBand => "price_below_lower_band".to_string(),
            AnomalyFlag::VolumeSpike95th => "volume_spike_95th".to_string(),
            AnomalyFlag::DrawdownExceeds20Pct => "drawdown_exceeds_20pct".to_string(),
            AnomalyFlag::NegativeSortino => "negative_sortino".to_string(),
            AnomalyFlag::InsiderBuyingSpike => "insider_buying_spike".to_string(),
            AnomalyFlag::InsiderSellingSpike => "insider_selling_spike".to_string(),
            AnomalyFlag::EarningsInDays(n) => format!("earnings_in_{n}_days"),
            AnomalyFlag::MissingInput(field) => format!("missing_input_{field}"),
        }
    }
}

pub const Z_SCORE_FLAG_THRESHOLD: f64 = 2.0;
pub const VOLUME_SPIKE_PERCENTILE: f64 = 95.0;
pub const DRAWDOWN_FLAG_THRESHOLD: f64 = -0.20;
pub const INSIDER_SPIKE_USD: f64 = 500_000.0;
pub const EARNINGS_FLAG_WINDOW_DAYS: i64 = 5;

/// Flag emission is a pure function of the scorecard values plus the
/// thresholds above; identical inputs always produce identical flags in a
/// stable order.
pub fn emit_flags(
    card: &QuantScorecard,
    insider_net_value_90d: Option<f64>,
    days_to_earnings: Option<i64>,
) -> Vec<String> {
    let mut flags: Vec<AnomalyFlag> = Vec::new();

    if let Some(z) = card.z_score_20d {
        if z.abs() > Z_SCORE_FLAG_THRESHOLD {
            flags.push(AnomalyFlag::ZScoreHigh);
        }
    }
    if let Some(pct_b) = card.bollinger_pct_b {
        if pct_b > 1.0 {
            flags.push(AnomalyFlag::PriceAboveUpperBand);
        } else if pct_b < 0.0 {
            flags.push(AnomalyFlag::PriceBelowLowerBand);
        }
    }
    if let Some(rank) = card.percentile_rank_volume {
        if rank > VOLUME_SPIKE_PERCENTILE {
            flags.push(AnomalyFlag::VolumeSpike95th);
        }
    }
    if let Some(dd) = card.max_drawdown {
        if dd < DRAWDOWN_FLAG_THRESHOLD {
            flags.push(AnomalyFlag::DrawdownExceeds20Pct);
        }
    }
    if let Some(sortino) = card.sortino {
        if sortino < 0.0 {
            flags.push(AnomalyFlag::NegativeSortino);
        }
    }
    if let Some(net) = insider_net_value_90d {
        if net > INSIDER_SPIKE_USD {
            flags.push(AnomalyFlag::InsiderBuyingSpike);
        } else if net < -INSIDER_SPIKE_USD {
            flags.push(AnomalyFlag::InsiderSellingSpike);
        }
    }
    if let Some(days) = days_to_earnings {
        if (0..=EARNINGS_FLAG_WINDOW_DAYS).contains(&days) {
            flags.push(AnomalyFlag::EarningsInDays(days));
        }
    }

    flags.into_iter().map(|f| f.as_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_with(z: Option<f64>, pct_b: Option<f64>, vol_rank: Option<f64>) -> QuantScorecard {
        QuantScorecard {
            symbol: "T".to_string(),
            z_score_20d: z,
            bollinger_pct_b: pct_b,
            percentile_rank_volume: vol_rank,
            ..Default::default()
        }
    }

    #[test]
    fn thresholds_fire_exactly() {
        let flags = emit_flags(&card_with(Some(2.1), Some(1.01), Some(96.0)), None, None);
        assert_eq!(
            flags,
            vec!["z_score_high", "price_above_upper_band", "volume_spike_95th"]
        );

        let flags = emit_flags(&card_with(Some(1.9), Some(0.99), Some(95.0)), None, None);
        assert!(flags.is_empty());
    }

    #[test]
    fn insider_and_earnings_flags() {
        let flags = emit_flags(&card_with(None, None, None), Some(600_000.0), Some(3));
        assert_eq!(flags, vec!["insider_buying_spike", "earnings_in_3_days"]);

        let flags = emit_flags(&card_with(None, None, None), Some(-750_000.0), Some(9));
        assert_eq!(flags, vec!["insider_selling_spike"]);
    }

    #[test]
    fn emission_is_pure() {
        let card = card_with(Some(-2.5), Some(-0.1), None);
        let a = emit_flags(&card, None, Some(0));
        let b = emit_flags(&card, None, Some(0));
        assert_eq!(a, b);
        assert_eq!(a, vec!["z_score_high", "price_below_lower_band", "earnings_in_0_days"]);
    }
}
