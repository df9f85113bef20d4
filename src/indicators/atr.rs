// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// ATR measures market volatility by decomposing the entire range of a bar.
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is then the smoothed average of TR using Wilder's method:
//   ATR_0   = SMA of first `period` TR values
//   ATR_t   = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// Default period: 14
// =============================================================================

/// Compute the full ATR series from parallel `highs`/`lows`/`closes` slices
/// (oldest first) using Wilder's smoothing method.
///
/// Returns an empty vector when `period == 0`, the slices have mismatched
/// lengths, or there are fewer than `period + 1` bars.
pub fn calculate_atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0
        || highs.len() != lows.len()
        || highs.len() != closes.len()
        || highs.len() < period + 1
    {
        return Vec::new();
    }

    // --- Step 1: True Range for each consecutive pair ------------------------
    let mut tr_values: Vec<f64> = Vec::with_capacity(highs.len() - 1);
    for i in 1..highs.len() {
        let hl = highs[i] - lows[i];
        let hc = (highs[i] - closes[i - 1]).abs();
        let lc = (lows[i] - closes[i - 1]).abs();
        tr_values.push(hl.max(hc).max(lc));
    }

    if tr_values.len() < period {
        return Vec::new();
    }

    // --- Step 2: Seed ATR with SMA of first `period` TR values ---------------
    let period_f = period as f64;
    let seed: f64 = tr_values[..period].iter().sum::<f64>() / period_f;
    if !seed.is_finite() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(tr_values.len() - period + 1);
    result.push(seed);

    // --- Step 3: Wilder's smoothing for remaining TR values -------------------
    let mut atr = seed;
    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            break;
        }
        result.push(atr);
    }

    result
}

/// Calculate the most recent ATR as a percentage of the current price.
pub fn calculate_atr_pct(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    let series = calculate_atr(highs, lows, closes, period);
    let atr = *series.last()?;
    let last_close = *closes.last()?;
    if last_close == 0.0 {
        return None;
    }
    Some((atr / last_close) * 100.0)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ohlc(n: usize, base: f64, spread: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let highs = vec![base + spread; n];
        let lows = vec![base - spread; n];
        let closes = vec![base; n];
        (highs, lows, closes)
    }

    #[test]
    fn atr_period_zero() {
        let (h, l, c) = ohlc(20, 100.0, 5.0);
        assert!(calculate_atr(&h, &l, &c, 0).is_empty());
    }

    #[test]
    fn atr_insufficient_data() {
        let (h, l, c) = ohlc(10, 100.0, 5.0);
        assert!(calculate_atr(&h, &l, &c, 14).is_empty());
    }

    #[test]
    fn atr_constant_range_converges() {
        let (h, l, c) = ohlc(30, 100.0, 5.0);
        let series = calculate_atr(&h, &l, &c, 14);
        assert!(!series.is_empty());
        let last = *series.last().unwrap();
        assert!((last - 10.0).abs() < 1e-9, "expected ATR near 10.0, got {last}");
    }

    #[test]
    fn atr_true_range_uses_prev_close() {
        // Gap up: |115-95| = 20 > 115-108 = 7.
        let highs = vec![105.0, 115.0, 118.0, 120.0];
        let lows = vec![95.0, 108.0, 110.0, 113.0];
        let closes = vec![95.0, 112.0, 115.0, 118.0];
        let series = calculate_atr(&highs, &lows, &closes, 3);
        assert!(!series.is_empty());
        assert!(series[0] > 7.0, "ATR should reflect the gap, got {}", series[0]);
    }

    #[test]
    fn atr_pct_is_positive_and_finite() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 3.0).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 3.0).collect();
        let pct = calculate_atr_pct(&highs, &lows, &closes, 14).unwrap();
        assert!(pct > 0.0 && pct.is_finite());
    }

    #[test]
    fn atr_mismatched_lengths_returns_empty() {
        let highs = vec![1.0; 20];
        let lows = vec![1.0; 19];
        let closes = vec![1.0; 20];
        assert!(calculate_atr(&highs, &lows, &closes, 14).is_empty());
    }
}
