//! Standard indicator computation over daily candles.

use agent_core::{DailyCandle, TechnicalRow};

/// Build the dated indicator row for the most recent candle.
/// Fields whose warmup window is not covered stay `None`.
pub fn compute_technicals(symbol: &str, candles: &[DailyCandle]) -> Option<TechnicalRow> {
    let last = candles.last()?;
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let ema_12_series = ema_series(&closes, 12);
    let ema_26_series = ema_series(&closes, 26);
    let (macd, macd_signal, macd_histogram) = macd(&ema_12_series, &ema_26_series);
    let (bollinger_upper, bollinger_middle, bollinger_lower) = bollinger(&closes, 20, 2.0);
    let (stochastic_k, stochastic_d) = stochastic(&highs, &lows, &closes, 14, 3);

    Some(TechnicalRow {
        symbol: symbol.to_string(),
        date: last.date,
        sma_20: sma(&closes, 20),
        sma_50: sma(&closes, 50),
        sma_200: sma(&closes, 200),
        ema_12: ema_12_series.last().copied(),
        ema_26: ema_26_series.last().copied(),
        rsi_14: rsi(&closes, 14),
        macd,
        macd_signal,
        macd_histogram,
        bollinger_upper,
        bollinger_middle,
        bollinger_lower,
        atr_14: atr(&highs, &lows, &closes, 14),
        adx_14: adx(&highs, &lows, &closes, 14),
        stochastic_k,
        stochastic_d,
        obv: Some(obv(&closes, &volumes)),
        vwap_20: vwap(&closes, &volumes, 20),
    })
}

fn sma(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period {
        return None;
    }
    Some(values[values.len() - period..].iter().sum::<f64>() / period as f64)
}

/// Full EMA series (empty if not enough data for the seed SMA).
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.len() < period {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    let mut series = vec![seed];
    for &v in &values[period..] {
        let prev = *series.last().unwrap();
        series.push(prev + alpha * (v - prev));
    }
    series
}

/// Wilder-smoothed RSI.
fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 {
        return None;
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for w in closes[..period + 1].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for w in closes[period..].windows(2) {
        let change = w[1] - w[0];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss < 1e-12 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD(12,26) with a 9-period signal over the MACD line.
fn macd(ema_12: &[f64], ema_26: &[f64]) -> (Option<f64>, Option<f64>, Option<f64>) {
    if ema_12.is_empty() || ema_26.is_empty() {
        return (None, None, None);
    }
    // Align the tails: ema_26 starts 14 values later than ema_12.
    let n = ema_12.len().min(ema_26.len());
    let line: Vec<f64> = ema_12[ema_12.len() - n..]
        .iter()
        .zip(&ema_26[ema_26.len() - n..])
        .map(|(fast, slow)| fast - slow)
        .collect();
    let signal_series = ema_series(&line, 9);
    let macd = line.last().copied();
    let signal = signal_series.last().copied();
    let histogram = match (macd, signal) {
        (Some(m), Some(s)) => Some(m - s),
        _ => None,
    };
    (macd, signal, histogram)
}

fn bollinger(
    closes: &[f64],
    period: usize,
    sigma: f64,
) -> (Option<f64>, Option<f64>, Option<f64>) {
    if closes.len() < period {
        return (None, None, None);
    }
    let tail = &closes[closes.len() - period..];
    let mid = tail.iter().sum::<f64>() / period as f64;
    let variance = tail.iter().map(|v| (v - mid).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();
    (Some(mid + sigma * std), Some(mid), Some(mid - sigma * std))
}

fn true_ranges(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    (1..closes.len())
        .map(|i| {
            let high_low = highs[i] - lows[i];
            let high_close = (highs[i] - closes[i - 1]).abs();
            let low_close = (lows[i] - closes[i - 1]).abs();
            high_low.max(high_close).max(low_close)
        })
        .collect()
}

fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    let trs = true_ranges(highs, lows, closes);
    if trs.len() < period {
        return None;
    }
    // Wilder smoothing
    let mut atr = trs[..period].iter().sum::<f64>() / period as f64;
    for &tr in &trs[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }
    Some(atr)
}

/// Average Directional Index, Wilder-smoothed.
fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < 2 * period + 1 {
        return None;
    }
    let trs = true_ranges(highs, lows, closes);
    let mut plus_dm = Vec::with_capacity(trs.len());
    let mut minus_dm = Vec::with_capacity(trs.len());
    for i in 1..closes.len() {
        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    let smooth = |values: &[f64]| -> Vec<f64> {
        let mut out = vec![values[..period].iter().sum::<f64>()];
        for &v in &values[period..] {
            let prev = *out.last().unwrap();
            out.push(prev - prev / period as f64 + v);
        }
        out
    };

    let tr_s = smooth(&trs);
    let plus_s = smooth(&plus_dm);
    let minus_s = smooth(&minus_dm);

    let mut dx = Vec::new();
    for i in 0..tr_s.len() {
        if tr_s[i] < 1e-12 {
            continue;
        }
        let plus_di = 100.0 * plus_s[i] / tr_s[i];
        let minus_di = 100.0 * minus_s[i] / tr_s[i];
        let sum = plus_di + minus_di;
        if sum > 1e-12 {
            dx.push(100.0 * (plus_di - minus_di).abs() / sum);
        }
    }
    if dx.len() < period {
        return None;
    }
    let mut adx = dx[..period].iter().sum::<f64>() / period as f64;
    for &v in &dx[period..] {
        adx = (adx * (period as f64 - 1.0) + v) / period as f64;
    }
    Some(adx)
}

fn stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    smooth: usize,
) -> (Option<f64>, Option<f64>) {
    if closes.len() < period + smooth {
        return (None, None);
    }
    let k_at = |end: usize| -> Option<f64> {
        let start = end.checked_sub(period)?;
        let high = highs[start..end].iter().cloned().fold(f64::MIN, f64::max);
        let low = lows[start..end].iter().cloned().fold(f64::MAX, f64::min);
        if (high - low).abs() < 1e-12 {
            return Some(50.0);
        }
        Some(100.0 * (closes[end - 1] - low) / (high - low))
    };

    let n = closes.len();
    let ks: Vec<f64> = (0..smooth)
        .rev()
        .filter_map(|offset| k_at(n - offset))
        .collect();
    let k = ks.last().copied();
    let d = if ks.len() == smooth {
        Some(ks.iter().sum::<f64>() / smooth as f64)
    } else {
        None
    };
    (k, d)
}

fn obv(closes: &[f64], volumes: &[f64]) -> f64 {
    let mut obv = 0.0;
    for i in 1..closes.len().min(volumes.len()) {
        if closes[i] > closes[i - 1] {
            obv += volumes[i];
        } else if closes[i] < closes[i - 1] {
            obv -= volumes[i];
        }
    }
    obv
}

fn vwap(closes: &[f64], volumes: &[f64], period: usize) -> Option<f64> {
    let n = closes.len().min(volumes.len());
    if n < period {
        return None;
    }
    let closes = &closes[n - period..n];
    let volumes = &volumes[n - period..n];
    let total: f64 = volumes.iter().sum();
    if total < 1e-12 {
        return None;
    }
    Some(closes.iter().zip(volumes).map(|(c, v)| c * v).sum::<f64>() / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn candles(closes: &[f64]) -> Vec<DailyCandle> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| DailyCandle {
                symbol: "T".to_string(),
                date: start + Duration::days(i as i64),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000_000.0,
            })
            .collect()
    }

    #[test]
    fn short_history_leaves_long_windows_empty() {
        let row = compute_technicals("T", &candles(&[1.0; 30])).unwrap();
        assert!(row.sma_20.is_some());
        assert!(row.sma_200.is_none());
        assert!(row.adx_14.is_some() || row.adx_14.is_none()); // never panics
    }

    #[test]
    fn rsi_of_monotonic_rise_is_maximal() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let row = compute_technicals("T", &candles(&closes)).unwrap();
        assert!((row.rsi_14.unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn bollinger_bands_bracket_the_mean() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + ((i % 5) as f64)).collect();
        let row = compute_technicals("T", &candles(&closes)).unwrap();
        let (upper, mid, lower) = (
            row.bollinger_upper.unwrap(),
            row.bollinger_middle.unwrap(),
            row.bollinger_lower.unwrap(),
        );
        assert!(upper > mid && mid > lower);
    }

    #[test]
    fn obv_tracks_direction() {
        let closes = [10.0, 11.0, 12.0, 11.0];
        let volumes = [100.0, 100.0, 100.0, 100.0];
        assert!((obv(&closes, &volumes) - 100.0).abs() < 1e-9);
    }
}
