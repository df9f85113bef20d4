// =============================================================================
// Market Providers — options chain, analytics, liquidity
// =============================================================================
//
// Each provider is a narrow `reqwest::Client` wrapper with a single
// `fetch(symbol) -> Result<T, EngineError>` method, generalized from the
// teacher's `futures_intel::*Monitor` pattern (`FundingRateMonitor`,
// `OpenInterestMonitor`, `LongShortRatioMonitor`) behind one shared
// `MarketProvider` trait so the builder can fan the three calls out
// uniformly.
// =============================================================================

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::errors::EngineError;
use crate::indicators::{atr, rsi, stats};
use crate::model::{LiquiditySection, OptionsSection, StatsSection};
use crate::types::{GammaBias, TradeVelocity};

#[async_trait]
pub trait MarketProvider: Send + Sync {
    type Output;

    /// Stable provider name used as the rate-limiter/cache key prefix.
    fn name(&self) -> &'static str;

    async fn fetch(&self, symbol: &str) -> Result<Self::Output, EngineError>;
}

fn classify_http_error(provider: &str, status: reqwest::StatusCode) -> EngineError {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        EngineError::ProviderAuthFailed {
            provider: provider.to_string(),
        }
    } else {
        EngineError::ProviderApiError {
            provider: provider.to_string(),
            message: format!("{status}"),
        }
    }
}

// =============================================================================
// Options chain + quotes provider
// =============================================================================

pub struct OptionsProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OptionsProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client for OptionsProvider"),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl MarketProvider for OptionsProvider {
    type Output = OptionsSection;

    fn name(&self) -> &'static str {
        "options"
    }

    async fn fetch(&self, symbol: &str) -> Result<Self::Output, EngineError> {
        let url = format!("{}/options/chain?symbol={symbol}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(|e| network_error("options", &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_http_error("options", status));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::ProviderApiError {
                provider: "options".to_string(),
                message: format!("invalid response body: {e}"),
            })?;

        let put_volume = body.get("putVolume").and_then(Value::as_f64).unwrap_or(0.0);
        let call_volume = body.get("callVolume").and_then(Value::as_f64).unwrap_or(0.0);
        let put_call_ratio = if call_volume == 0.0 {
            1.0
        } else {
            put_volume / call_volume
        };

        let gamma_bias = match body.get("strikes").and_then(Value::as_array) {
            Some(strikes) if !strikes.is_empty() => weighted_gamma_bias(strikes),
            _ => {
                if put_call_ratio > 1.2 {
                    GammaBias::Negative
                } else if put_call_ratio < 0.8 {
                    GammaBias::Positive
                } else {
                    GammaBias::Neutral
                }
            }
        };

        let max_pain = body
            .get("strikes")
            .and_then(Value::as_array)
            .map(|strikes| max_pain_strike(strikes))
            .unwrap_or(0.0);

        debug!(symbol, put_call_ratio, max_pain, "options section built");

        Ok(OptionsSection {
            put_call_ratio,
            iv_percentile: body.get("ivPercentile").and_then(Value::as_f64).unwrap_or(50.0),
            gamma_bias,
            option_volume: put_volume + call_volume,
            max_pain,
        })
    }
}

/// Open-interest-maximization `maxPain`: for each candidate strike, sum the
/// intrinsic-value loss to option writers across every strike's calls and
/// puts; the strike minimizing aggregate writer loss is `maxPain`. Falls
/// back to the middle strike (logged) when fewer than two strikes are
/// available to compute a meaningful minimum.
fn max_pain_strike(strikes: &[Value]) -> f64 {
    let rows: Vec<(f64, f64, f64)> = strikes
        .iter()
        .filter_map(|s| {
            let strike = s.get("strike").and_then(Value::as_f64)?;
            let call_oi = s.get("callOpenInterest").and_then(Value::as_f64).unwrap_or(0.0);
            let put_oi = s.get("putOpenInterest").and_then(Value::as_f64).unwrap_or(0.0);
            Some((strike, call_oi, put_oi))
        })
        .collect();

    if rows.len() < 2 {
        debug!("insufficient option chain depth for maxPain; falling back to middle strike");
        return rows.first().map(|r| r.0).unwrap_or(0.0);
    }

    let candidates: Vec<f64> = rows.iter().map(|r| r.0).collect();

    let mut best_strike = candidates[candidates.len() / 2];
    let mut best_loss = f64::MAX;

    for &candidate in &candidates {
        let mut total_loss = 0.0;
        for &(strike, call_oi, put_oi) in &rows {
            // Call writers lose when the settlement (candidate) exceeds the
            // strike; put writers lose when it falls below.
            total_loss += (candidate - strike).max(0.0) * call_oi;
            total_loss += (strike - candidate).max(0.0) * put_oi;
        }
        if total_loss < best_loss {
            best_loss = total_loss;
            best_strike = candidate;
        }
    }

    best_strike
}

fn weighted_gamma_bias(strikes: &[Value]) -> GammaBias {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for s in strikes {
        let gamma = s.get("gamma").and_then(Value::as_f64).unwrap_or(0.0);
        let oi = s
            .get("callOpenInterest")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            + s.get("putOpenInterest").and_then(Value::as_f64).unwrap_or(0.0);
        weighted_sum += gamma * oi;
        weight_total += oi;
    }

    if weight_total == 0.0 {
        return GammaBias::Neutral;
    }

    let avg = weighted_sum / weight_total;
    if avg > 0.02 {
        GammaBias::Positive
    } else if avg < -0.02 {
        GammaBias::Negative
    } else {
        GammaBias::Neutral
    }
}

// =============================================================================
// Analytics provider (ATR/RSI/time-series)
// =============================================================================

pub struct AnalyticsProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnalyticsProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client for AnalyticsProvider"),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl MarketProvider for AnalyticsProvider {
    type Output = StatsSection;

    fn name(&self) -> &'static str {
        "analytics"
    }

    async fn fetch(&self, symbol: &str) -> Result<Self::Output, EngineError> {
        let url = format!("{}/timeseries/daily?symbol={symbol}&period=30", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(|e| network_error("analytics", &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_http_error("analytics", status));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::ProviderApiError {
                provider: "analytics".to_string(),
                message: format!("invalid response body: {e}"),
            })?;

        let closes: Vec<f64> = body
            .get("closes")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        let highs: Vec<f64> = body
            .get("highs")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        let lows: Vec<f64> = body
            .get("lows")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();

        let atr14 = atr::calculate_atr(&highs, &lows, &closes, 14)
            .last()
            .copied()
            .unwrap_or(0.0);
        let rsi_val = rsi::current_rsi(&closes, 14).map(|(v, _)| v).unwrap_or(50.0);
        let rv20 = stats::annualized_realized_vol(&closes, 20).unwrap_or(0.0);
        let trend_slope = stats::normalized_trend_slope(&closes, 20).unwrap_or(0.0);

        let volume = body.get("volume").and_then(Value::as_f64).unwrap_or(0.0);
        let avg_volume = body.get("avgVolume").and_then(Value::as_f64).unwrap_or(volume.max(1.0));
        let volume_ratio = if avg_volume > 0.0 { volume / avg_volume } else { 1.0 };

        Ok(StatsSection {
            atr14,
            rv20,
            trend_slope,
            rsi: rsi_val,
            volume,
            volume_ratio,
        })
    }
}

// =============================================================================
// Liquidity / quote provider
// =============================================================================

pub struct LiquidityProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LiquidityProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client for LiquidityProvider"),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl MarketProvider for LiquidityProvider {
    type Output = LiquiditySection;

    fn name(&self) -> &'static str {
        "liquidity"
    }

    async fn fetch(&self, symbol: &str) -> Result<Self::Output, EngineError> {
        let url = format!("{}/quote?symbol={symbol}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(|e| network_error("liquidity", &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_http_error("liquidity", status));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::ProviderApiError {
                provider: "liquidity".to_string(),
                message: format!("invalid response body: {e}"),
            })?;

        let bid = body.get("bid").and_then(Value::as_f64).unwrap_or(0.0);
        let ask = body.get("ask").and_then(Value::as_f64).unwrap_or(0.0);
        let bid_size = body.get("bidSize").and_then(Value::as_f64).unwrap_or(0.0);
        let ask_size = body.get("askSize").and_then(Value::as_f64).unwrap_or(0.0);
        let volume = body.get("volume").and_then(Value::as_f64).unwrap_or(0.0);
        let avg_volume = body.get("avgVolume").and_then(Value::as_f64).unwrap_or(volume.max(1.0));

        let spread_bps = if bid > 0.0 && ask > 0.0 {
            (ask - bid) / ((ask + bid) / 2.0) * 10_000.0
        } else {
            0.0
        };
        let depth_score = (bid_size + ask_size).max(0.0).sqrt() * 10.0;
        let depth_score = depth_score.min(100.0);

        let ratio = if avg_volume > 0.0 { volume / avg_volume } else { 1.0 };
        let trade_velocity = if ratio > 1.5 {
            TradeVelocity::Fast
        } else if ratio < 0.5 {
            TradeVelocity::Slow
        } else {
            TradeVelocity::Normal
        };

        Ok(LiquiditySection {
            spread_bps,
            depth_score,
            trade_velocity,
            bid_size,
            ask_size,
        })
    }
}

fn network_error(provider: &str, err: &reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::ProviderTimeout {
            provider: provider.to_string(),
            timeout_ms: 0,
        }
    } else {
        EngineError::ProviderNetworkError {
            provider: provider.to_string(),
            message: format!("{err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn max_pain_picks_minimum_aggregate_writer_loss() {
        let strikes = vec![
            json!({"strike": 100.0, "callOpenInterest": 10.0, "putOpenInterest": 50.0}),
            json!({"strike": 110.0, "callOpenInterest": 40.0, "putOpenInterest": 10.0}),
            json!({"strike": 120.0, "callOpenInterest": 60.0, "putOpenInterest": 5.0}),
        ];
        let pain = max_pain_strike(&strikes);
        assert!(strikes.iter().any(|s| s["strike"].as_f64().unwrap() == pain));
    }

    #[test]
    fn max_pain_falls_back_to_single_strike_when_insufficient_depth() {
        let strikes = vec![json!({"strike": 100.0, "callOpenInterest": 1.0, "putOpenInterest": 1.0})];
        assert_eq!(max_pain_strike(&strikes), 100.0);
    }

    #[test]
    fn gamma_bias_falls_back_to_put_call_heuristic_without_chain() {
        let body = json!({"putVolume": 150.0, "callVolume": 100.0});
        let put_volume = body.get("putVolume").and_then(Value::as_f64).unwrap();
        let call_volume = body.get("callVolume").and_then(Value::as_f64).unwrap();
        let ratio = put_volume / call_volume;
        assert!(ratio > 1.2);
    }
}
