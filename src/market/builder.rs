// =============================================================================
// Market Context Builder (C6)
// =============================================================================
//
// Fans the three provider calls out in parallel with per-provider timeouts,
// consulting the cache and the rate limiter before issuing each call and
// falling back to a typed default when the rate limiter is over budget.
// Structured as three independent `fetch_section` calls joined with
// `tokio::join!`, mirroring spec.md §9's "spawn three tasks, each with its
// own timeout; collect three Result values; merge into MarketContext"
// guidance and the teacher's `tokio::spawn`-per-unit-of-concurrency shape.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;
use tracing::warn;

use crate::config::{Config, FeedConfig};
use crate::model::{LiquiditySection, MarketContext, OptionsSection, StatsSection};
use crate::types::{GammaBias, MillisTimestamp};

use super::cache::MarketCache;
use super::providers::MarketProvider;
use super::rate_limiter::RateLimiter;

enum Outcome<T> {
    Success(T),
    Fallback(T, String),
    Failed(String),
}

async fn fetch_section<P>(
    provider: &P,
    symbol: &str,
    cache: &MarketCache,
    limiter: &RateLimiter,
    feed_config: &FeedConfig,
    fallback: impl Fn() -> P::Output,
) -> Outcome<P::Output>
where
    P: MarketProvider + ?Sized,
    P::Output: Serialize + DeserializeOwned + Clone,
{
    let key = MarketCache::key(provider.name(), "snapshot", symbol);

    if let Some(cached) = cache.get(&key) {
        if let Ok(value) = serde_json::from_value::<P::Output>(cached) {
            return Outcome::Success(value);
        }
    }

    if !limiter.can_make_request(provider.name(), feed_config) {
        let msg = format!("{}: rate limit exceeded, using fallback", provider.name());
        warn!(provider = provider.name(), "rate limit exceeded, falling back");
        return Outcome::Fallback(fallback(), msg);
    }

    limiter.record_request(provider.name(), feed_config);

    match timeout(feed_config.timeout(), provider.fetch(symbol)).await {
        Ok(Ok(value)) => {
            if let Ok(json) = serde_json::to_value(&value) {
                cache.set(key, json, Duration::from_millis(feed_config.cache_ttl_ms));
            }
            Outcome::Success(value)
        }
        Ok(Err(e)) => Outcome::Failed(format!("{}: {e}", provider.name())),
        Err(_elapsed) => Outcome::Failed(format!(
            "{}: timed out after {}ms",
            provider.name(),
            feed_config.timeout_ms
        )),
    }
}

/// Holds the three providers behind `MarketProvider` trait objects rather
/// than concrete `OptionsProvider`/`AnalyticsProvider`/`LiquidityProvider`
/// types, so integration tests can substitute deterministic fakes for the
/// real `reqwest`-backed providers without touching the network.
pub struct MarketContextBuilder {
    options: Arc<dyn MarketProvider<Output = OptionsSection>>,
    analytics: Arc<dyn MarketProvider<Output = StatsSection>>,
    liquidity: Arc<dyn MarketProvider<Output = LiquiditySection>>,
    cache: MarketCache,
    limiter: RateLimiter,
    now_fn: Arc<dyn Fn() -> MillisTimestamp + Send + Sync>,
}

impl MarketContextBuilder {
    /// Accepts any `MarketProvider` per section — the real `reqwest`-backed
    /// providers in production, fakes in tests — and stores each behind an
    /// `Arc<dyn MarketProvider<Output = _>>`.
    pub fn new<O, A, L>(
        options: O,
        analytics: A,
        liquidity: L,
        cache: MarketCache,
        limiter: RateLimiter,
        now_fn: Arc<dyn Fn() -> MillisTimestamp + Send + Sync>,
    ) -> Self
    where
        O: MarketProvider<Output = OptionsSection> + 'static,
        A: MarketProvider<Output = StatsSection> + 'static,
        L: MarketProvider<Output = LiquiditySection> + 'static,
    {
        Self {
            options: Arc::new(options),
            analytics: Arc::new(analytics),
            liquidity: Arc::new(liquidity),
            cache,
            limiter,
            now_fn,
        }
    }

    pub async fn build_context(&self, symbol: &str, config: &Config) -> MarketContext {
        let (options_outcome, analytics_outcome, liquidity_outcome) = tokio::join!(
            fetch_section(
                self.options.as_ref(),
                symbol,
                &self.cache,
                &self.limiter,
                &config.feeds.options,
                options_fallback,
            ),
            fetch_section(
                self.analytics.as_ref(),
                symbol,
                &self.cache,
                &self.limiter,
                &config.feeds.analytics,
                stats_fallback,
            ),
            fetch_section(
                self.liquidity.as_ref(),
                symbol,
                &self.cache,
                &self.limiter,
                &config.feeds.liquidity,
                liquidity_fallback,
            ),
        );

        let mut errors = Vec::new();
        let mut successful = 0_usize;

        let options = match options_outcome {
            Outcome::Success(v) => {
                successful += 1;
                Some(v)
            }
            Outcome::Fallback(v, msg) => {
                errors.push(msg);
                Some(v)
            }
            Outcome::Failed(msg) => {
                errors.push(msg);
                None
            }
        };

        let stats = match analytics_outcome {
            Outcome::Success(v) => {
                successful += 1;
                Some(v)
            }
            Outcome::Fallback(v, msg) => {
                errors.push(msg);
                Some(v)
            }
            Outcome::Failed(msg) => {
                errors.push(msg);
                None
            }
        };

        let liquidity = match liquidity_outcome {
            Outcome::Success(v) => {
                successful += 1;
                Some(v)
            }
            Outcome::Fallback(v, msg) => {
                errors.push(msg);
                Some(v)
            }
            Outcome::Failed(msg) => {
                errors.push(msg);
                None
            }
        };

        MarketContext {
            options,
            stats,
            liquidity,
            fetch_time: (self.now_fn)(),
            completeness: successful as f64 / 3.0,
            errors,
        }
    }
}

fn options_fallback() -> OptionsSection {
    OptionsSection {
        put_call_ratio: 1.0,
        iv_percentile: 50.0,
        gamma_bias: GammaBias::Neutral,
        option_volume: 0.0,
        max_pain: 0.0,
    }
}

fn stats_fallback() -> StatsSection {
    StatsSection {
        atr14: 0.0,
        rv20: 0.0,
        trend_slope: 0.0,
        rsi: 50.0,
        volume: 0.0,
        volume_ratio: 1.0,
    }
}

fn liquidity_fallback() -> LiquiditySection {
    LiquiditySection {
        spread_bps: 0.0,
        depth_score: 50.0,
        trade_velocity: crate::types::TradeVelocity::Normal,
        bid_size: 0.0,
        ask_size: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_values_are_neutral() {
        let options = options_fallback();
        assert_eq!(options.put_call_ratio, 1.0);
        assert_eq!(options.gamma_bias, GammaBias::Neutral);

        let stats = stats_fallback();
        assert_eq!(stats.rsi, 50.0);

        let liquidity = liquidity_fallback();
        assert_eq!(liquidity.depth_score, 50.0);
    }
}
