// =============================================================================
// Realized volatility and trend-slope statistics
// =============================================================================
//
// Two derived fields the Market Context Builder computes locally rather
// than trusting from a provider: `rv20` (annualized standard deviation of
// log returns) and `trendSlope` (linear-regression slope, normalized to
// [-1, 1]). The regression here follows the same ordinary-least-squares
// shape as `regime::hurst::calculate_hurst_exponent` — fit a line, read off
// its slope — applied directly to price rather than to a log-log R/S plot.
// =============================================================================

use tracing::trace;

/// Trading days per year, used to annualize the daily-return standard
/// deviation into `rv20`.
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Annualized standard deviation of log returns over the last `window`
/// closes, expressed as a percentage (`... * sqrt(252) * 100`).
///
/// Returns `None` when fewer than `window + 1` closes are available (need
/// `window` returns) or the computed value is non-finite.
pub fn annualized_realized_vol(closes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || closes.len() < window + 1 {
        return None;
    }

    let recent = &closes[closes.len() - (window + 1)..];
    let log_returns: Vec<f64> = recent
        .windows(2)
        .filter_map(|w| {
            if w[0] > 0.0 && w[1] > 0.0 {
                Some((w[1] / w[0]).ln())
            } else {
                None
            }
        })
        .collect();

    if log_returns.len() < 2 {
        return None;
    }

    let n = log_returns.len() as f64;
    let mean = log_returns.iter().sum::<f64>() / n;
    let variance = log_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    let rv = std_dev * TRADING_DAYS_PER_YEAR.sqrt() * 100.0;
    if rv.is_finite() {
        Some(rv)
    } else {
        None
    }
}

/// Linear-regression slope of the last `window` closes, normalized to
/// `[-1, 1]` by dividing the raw per-step slope by the series mean (so the
/// result is scale-invariant across instruments) and clamping.
///
/// Returns `None` when fewer than `window` closes are available, the
/// x-variance is degenerate, or the mean is non-positive.
pub fn normalized_trend_slope(closes: &[f64], window: usize) -> Option<f64> {
    if window < 2 || closes.len() < window {
        return None;
    }

    let recent = &closes[closes.len() - window..];
    let n = recent.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = recent.iter().sum::<f64>() / n;

    if y_mean <= 0.0 {
        return None;
    }

    let mut numerator = 0.0_f64;
    let mut denominator = 0.0_f64;
    for (i, &y) in recent.iter().enumerate() {
        let dx = i as f64 - x_mean;
        denominator += dx * dx;
        numerator += dx * (y - y_mean);
    }

    if denominator.abs() < f64::EPSILON {
        return None;
    }

    let raw_slope = numerator / denominator;
    // Normalize by mean price so a $1/bar drift on a $50,000 asset doesn't
    // register the same as a $1/bar drift on a $5 asset.
    let normalized = (raw_slope / y_mean * (window as f64)).clamp(-1.0, 1.0);

    trace!(raw_slope, normalized, "trend slope computed");
    Some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realized_vol_zero_for_flat_series() {
        let closes = vec![100.0; 25];
        let rv = annualized_realized_vol(&closes, 20).unwrap();
        assert!(rv.abs() < 1e-9);
    }

    #[test]
    fn realized_vol_positive_for_noisy_series() {
        let closes: Vec<f64> = (0..25)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0)
            .collect();
        let rv = annualized_realized_vol(&closes, 20).unwrap();
        assert!(rv > 0.0);
    }

    #[test]
    fn realized_vol_insufficient_data_is_none() {
        let closes = vec![100.0; 10];
        assert!(annualized_realized_vol(&closes, 20).is_none());
    }

    #[test]
    fn trend_slope_positive_for_uptrend() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let slope = normalized_trend_slope(&closes, 20).unwrap();
        assert!(slope > 0.0);
    }

    #[test]
    fn trend_slope_negative_for_downtrend() {
        let closes: Vec<f64> = (0..20).rev().map(|i| 100.0 + i as f64).collect();
        let slope = normalized_trend_slope(&closes, 20).unwrap();
        assert!(slope < 0.0);
    }

    #[test]
    fn trend_slope_is_clamped_to_unit_interval() {
        let closes: Vec<f64> = (0..20).map(|i| 1.0 + i as f64 * 1000.0).collect();
        let slope = normalized_trend_slope(&closes, 20).unwrap();
        assert!((-1.0..=1.0).contains(&slope));
    }

    #[test]
    fn trend_slope_flat_series_is_zero() {
        let closes = vec![100.0; 20];
        let slope = normalized_trend_slope(&closes, 20).unwrap();
        assert_eq!(slope, 0.0);
    }
}
