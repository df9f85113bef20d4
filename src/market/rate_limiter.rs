// =============================================================================
// Market Feed Rate Limiter (C5, rate-limit half)
// =============================================================================
//
// Per-provider sliding-window budgets for a per-day and per-minute quota,
// grounded on the teacher's `binance::rate_limit::RateLimitTracker` atomic
// counter design, generalized from single-provider weight tracking to N
// independent provider budgets addressed by name.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::FeedConfig;
use crate::types::MillisTimestamp;

struct ProviderBudget {
    day_count: AtomicU32,
    day_window_start: AtomicI64,
    minute_count: AtomicU32,
    minute_window_start: AtomicI64,
    per_day_budget: u32,
    per_minute_budget: u32,
}

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const MINUTE_MS: i64 = 60 * 1000;

impl ProviderBudget {
    fn new(config: &FeedConfig, now: MillisTimestamp) -> Self {
        Self {
            day_count: AtomicU32::new(0),
            day_window_start: AtomicI64::new(now),
            minute_count: AtomicU32::new(0),
            minute_window_start: AtomicI64::new(now),
            per_day_budget: config.per_day_budget,
            per_minute_budget: config.per_minute_budget,
        }
    }

    fn lazily_reset(&self, now: MillisTimestamp) {
        let day_start = self.day_window_start.load(Ordering::Relaxed);
        if now - day_start >= DAY_MS {
            self.day_count.store(0, Ordering::Relaxed);
            self.day_window_start.store(now, Ordering::Relaxed);
        }

        let minute_start = self.minute_window_start.load(Ordering::Relaxed);
        if now - minute_start >= MINUTE_MS {
            self.minute_count.store(0, Ordering::Relaxed);
            self.minute_window_start.store(now, Ordering::Relaxed);
        }
    }

    fn can_make_request(&self, now: MillisTimestamp) -> bool {
        self.lazily_reset(now);
        self.day_count.load(Ordering::Relaxed) < self.per_day_budget
            && self.minute_count.load(Ordering::Relaxed) < self.per_minute_budget
    }

    fn record_request(&self, now: MillisTimestamp) {
        self.lazily_reset(now);
        self.day_count.fetch_add(1, Ordering::Relaxed);
        self.minute_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Per-provider request budget tracker shared across the whole process.
pub struct RateLimiter {
    budgets: RwLock<HashMap<String, Arc<ProviderBudget>>>,
    now_fn: Arc<dyn Fn() -> MillisTimestamp + Send + Sync>,
}

impl RateLimiter {
    pub fn new(now_fn: Arc<dyn Fn() -> MillisTimestamp + Send + Sync>) -> Self {
        Self {
            budgets: RwLock::new(HashMap::new()),
            now_fn,
        }
    }

    fn budget_for(&self, provider: &str, config: &FeedConfig) -> Arc<ProviderBudget> {
        if let Some(existing) = self.budgets.read().get(provider) {
            return existing.clone();
        }
        let now = (self.now_fn)();
        let mut write = self.budgets.write();
        write
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(ProviderBudget::new(config, now)))
            .clone()
    }

    pub fn can_make_request(&self, provider: &str, config: &FeedConfig) -> bool {
        let budget = self.budget_for(provider, config);
        budget.can_make_request((self.now_fn)())
    }

    pub fn record_request(&self, provider: &str, config: &FeedConfig) {
        let budget = self.budget_for(provider, config);
        budget.record_request((self.now_fn)());
    }
}
