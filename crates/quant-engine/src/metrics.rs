//! Pure statistical primitives over daily price series.
//!
//! Every function is deterministic for fixed inputs: sorts are stable and
//! float comparisons use a fixed epsilon.

use statrs::statistics::Statistics;

pub const TRADING_DAYS: f64 = 252.0;
pub const EPS: f64 = 1e-9;

pub fn simple_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0].abs() > EPS)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Standard z-score of the last value vs the trailing `window`.
pub fn z_score(values: &[f64], window: usize) -> Option<f64> {
    if values.len() < window {
        return None;
    }
    let tail = &values[values.len() - window..];
    let mean = tail.mean();
    let std = tail.std_dev();
    if std < EPS {
        return Some(0.0);
    }
    Some((tail[tail.len() - 1] - mean) / std)
}

/// Median/MAD-based z-score, robust to outliers in the window.
pub fn robust_z_score(values: &[f64], window: usize) -> Option<f64> {
    if values.len() < window {
        return None;
    }
    let tail = &values[values.len() - window..];
    let med = median(tail);
    let deviations: Vec<f64> = tail.iter().map(|v| (v - med).abs()).collect();
    let mad = median(&deviations);
    if mad < EPS {
        return Some(0.0);
    }
    // 1.4826 scales MAD to the stddev of a normal distribution
    Some((tail[tail.len() - 1] - med) / (1.4826 * mad))
}

pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// %B position within 20-day Bollinger bands (2 sigma).
pub fn bollinger_pct_b(closes: &[f64]) -> Option<f64> {
    if closes.len() < 20 {
        return None;
    }
    let tail = &closes[closes.len() - 20..];
    let mid = tail.mean();
    let std = tail.std_dev();
    if std < EPS {
        return Some(0.5);
    }
    let upper = mid + 2.0 * std;
    let lower = mid - 2.0 * std;
    Some((tail[tail.len() - 1] - lower) / (upper - lower))
}

/// Percentile rank (0..100) of the last value against the trailing window.
pub fn percentile_rank(values: &[f64], window: usize) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let tail = if values.len() > window {
        &values[values.len() - window..]
    } else {
        values
    };
    let last = tail[tail.len() - 1];
    let below = tail.iter().filter(|&&v| v <= last + EPS).count();
    Some(below as f64 / tail.len() as f64 * 100.0)
}

pub fn annualized_sharpe(returns: &[f64], risk_free_rate: f64) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let mean = returns.mean();
    let std = returns.std_dev();
    if std < EPS {
        return Some(0.0);
    }
    let annual_return = mean * TRADING_DAYS;
    let annual_vol = std * TRADING_DAYS.sqrt();
    Some((annual_return - risk_free_rate) / annual_vol)
}

pub fn annualized_sortino(returns: &[f64], risk_free_rate: f64) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let mean = returns.mean();
    let annual_return = mean * TRADING_DAYS;
    let daily_rf = risk_free_rate / TRADING_DAYS;

    let downside_sq: Vec<f64> = returns
        .iter()
        .filter(|&&r| r < daily_rf)
        .map(|&r| (r - daily_rf).powi(2))
        .collect();
    if downside_sq.is_empty() {
        return Some(3.0);
    }
    let downside_dev =
        (downside_sq.iter().sum::<f64>() / returns.len() as f64).sqrt() * TRADING_DAYS.sqrt();
    if downside_dev < EPS {
        return Some(3.0);
    }
    Some((annual_return - risk_free_rate) / downside_dev)
}

/// Max drawdown as a negative fraction (-0.25 = 25% peak-to-trough).
pub fn max_drawdown(closes: &[f64]) -> Option<f64> {
    if closes.is_empty() {
        return None;
    }
    let mut peak = closes[0];
    let mut worst = 0.0f64;
    for &price in closes {
        if price > peak {
            peak = price;
        }
        if peak > EPS {
            let dd = (price - peak) / peak;
            if dd < worst {
                worst = dd;
            }
        }
    }
    Some(worst)
}

pub fn calmar(returns: &[f64], closes: &[f64]) -> Option<f64> {
    let dd = max_drawdown(closes)?;
    if returns.is_empty() {
        return None;
    }
    if dd.abs() < EPS {
        return Some(0.0);
    }
    let annual_return = returns.mean() * TRADING_DAYS;
    Some(annual_return / dd.abs())
}

/// Omega ratio with a zero threshold: gains mass over losses mass.
pub fn omega(returns: &[f64]) -> Option<f64> {
    if returns.is_empty() {
        return None;
    }
    let gains: f64 = returns.iter().filter(|&&r| r > 0.0).sum();
    let losses: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| -r).sum();
    if losses < EPS {
        // All-gain windows cap at 10 rather than dividing by zero
        return Some(if gains > EPS { 10.0 } else { 0.0 });
    }
    Some(gains / losses)
}

/// Full Kelly estimate from the return distribution (mean over variance).
pub fn kelly_full(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let mean = returns.mean();
    let var = returns.variance();
    if var < EPS {
        return Some(0.0);
    }
    Some(mean / var)
}

/// Historical 95% VaR: the 5th-percentile daily return (negative for losses).
pub fn var_95(returns: &[f64]) -> Option<f64> {
    if returns.len() < 20 {
        return None;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let index = ((sorted.len() as f64) * 0.05).floor() as usize;
    Some(sorted[index.min(sorted.len() - 1)])
}

/// Expected shortfall: mean return at or below the 95% VaR cut.
pub fn cvar_95(returns: &[f64]) -> Option<f64> {
    let var = var_95(returns)?;
    let tail: Vec<f64> = returns.iter().copied().filter(|&r| r <= var + EPS).collect();
    if tail.is_empty() {
        return Some(var);
    }
    Some(tail.iter().sum::<f64>() / tail.len() as f64)
}

/// 12-month momentum with a one-month skip (Jegadeesh-Titman).
pub fn momentum_12m(closes: &[f64]) -> Option<f64> {
    if closes.len() < 252 {
        return None;
    }
    let start = closes[closes.len() - 252];
    let end = closes[closes.len() - 21];
    if start.abs() < EPS {
        return None;
    }
    Some((end - start) / start)
}

/// Hurst exponent via rescaled-range analysis over a set of lags.
/// ~0.5 random walk, >0.5 trending, <0.5 mean-reverting.
pub fn hurst_exponent(closes: &[f64]) -> Option<f64> {
    if closes.len() < 64 {
        return None;
    }
    let returns = simple_returns(closes);
    let lags: Vec<usize> = [8, 16, 32, 64]
        .into_iter()
        .filter(|&l| l <= returns.len())
        .collect();
    if lags.len() < 3 {
        return None;
    }

    let mut log_lags = Vec::with_capacity(lags.len());
    let mut log_rs = Vec::with_capacity(lags.len());
    for &lag in &lags {
        let mut rs_values = Vec::new();
        for chunk in returns.chunks_exact(lag) {
            let mean = chunk.mean();
            let mut cumulative = 0.0;
            let mut min_dev = f64::MAX;
            let mut max_dev = f64::MIN;
            for &r in chunk {
                cumulative += r - mean;
                min_dev = min_dev.min(cumulative);
                max_dev = max_dev.max(cumulative);
            }
            let range = max_dev - min_dev;
            let std = chunk.std_dev();
            if std > EPS {
                rs_values.push(range / std);
            }
        }
        if rs_values.is_empty() {
            continue;
        }
        let mean_rs = rs_values.iter().sum::<f64>() / rs_values.len() as f64;
        if mean_rs > EPS {
            log_lags.push((lag as f64).ln());
            log_rs.push(mean_rs.ln());
        }
    }
    if log_lags.len() < 3 {
        return None;
    }
    linear_slope(&log_lags, &log_rs)
}

fn linear_slope(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        num += (x - mean_x) * (y - mean_y);
        den += (x - mean_x).powi(2);
    }
    if den < EPS {
        return None;
    }
    Some(num / den)
}

/// Z of price vs SMA-50, the mean-reversion gauge.
pub fn mean_reversion_z(closes: &[f64]) -> Option<f64> {
    if closes.len() < 50 {
        return None;
    }
    let tail = &closes[closes.len() - 50..];
    let sma = tail.mean();
    let std = tail.std_dev();
    if std < EPS {
        return Some(0.0);
    }
    Some((tail[tail.len() - 1] - sma) / std)
}

/// Relative deviation of the last close from the 20-day volume-weighted
/// average price.
pub fn vwap_deviation(closes: &[f64], volumes: &[f64]) -> Option<f64> {
    let n = closes.len().min(volumes.len());
    if n < 20 {
        return None;
    }
    let closes = &closes[n - 20..n];
    let volumes = &volumes[n - 20..n];
    let total_volume: f64 = volumes.iter().sum();
    if total_volume < EPS {
        return None;
    }
    let vwap = closes
        .iter()
        .zip(volumes)
        .map(|(c, v)| c * v)
        .sum::<f64>()
        / total_volume;
    if vwap < EPS {
        return None;
    }
    Some((closes[closes.len() - 1] - vwap) / vwap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uptrend(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn drawdown_is_negative_fraction() {
        let closes = [100.0, 120.0, 90.0, 95.0];
        let dd = max_drawdown(&closes).unwrap();
        assert!((dd - (-0.25)).abs() < 1e-9);
    }

    #[test]
    fn flat_series_yields_zero_z() {
        let closes = vec![50.0; 30];
        assert_eq!(z_score(&closes, 20), Some(0.0));
        assert_eq!(robust_z_score(&closes, 20), Some(0.0));
    }

    #[test]
    fn var_is_fifth_percentile() {
        // 100 returns: -0.10, -0.09, ... ascending by 0.001
        let returns: Vec<f64> = (0..100).map(|i| -0.10 + i as f64 * 0.001).collect();
        let var = var_95(&returns).unwrap();
        assert!((var - (-0.095)).abs() < 1e-9);
        let cvar = cvar_95(&returns).unwrap();
        assert!(cvar <= var + EPS);
    }

    #[test]
    fn momentum_skips_last_month() {
        let closes = uptrend(260);
        let m = momentum_12m(&closes).unwrap();
        let start = closes[260 - 252];
        let end = closes[260 - 21];
        assert!((m - (end - start) / start).abs() < 1e-12);
    }

    #[test]
    fn hurst_of_trending_series_is_high() {
        let closes = uptrend(300);
        let h = hurst_exponent(&closes).unwrap();
        assert!(h > 0.5, "trending series should have H > 0.5, got {h}");
    }

    #[test]
    fn percentile_rank_of_max_is_100() {
        let values = uptrend(252);
        assert!((percentile_rank(&values, 252).unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn deterministic_for_fixed_inputs() {
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + ((i * 37) % 17) as f64 - 8.0)
            .collect();
        let a = (
            z_score(&closes, 20),
            bollinger_pct_b(&closes),
            omega(&simple_returns(&closes)),
        );
        let b = (
            z_score(&closes, 20),
            bollinger_pct_b(&closes),
            omega(&simple_returns(&closes)),
        );
        assert_eq!(a, b);
    }
}
