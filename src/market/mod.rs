// =============================================================================
// Market Feed Cache + Rate Limiter (C5) and Market Context Builder (C6)
// =============================================================================

pub mod builder;
pub mod cache;
pub mod providers;
pub mod rate_limiter;

pub use builder::MarketContextBuilder;
pub use cache::MarketCache;
pub use providers::{AnalyticsProvider, LiquidityProvider, MarketProvider, OptionsProvider};
pub use rate_limiter::RateLimiter;
