// =============================================================================
// Market Feed Cache (C5, cache half)
// =============================================================================
//
// Keyed `provider:endpoint:symbol` TTL cache. A `DashMap` gives per-key
// sharded locking the same way the Context Store uses it for symbols;
// `get` treats an expired entry as absent without removing it immediately —
// removal happens lazily on `sweep_expired`, which the orchestrator's
// bootstrap task can run periodically (mirroring the teacher's
// `reset_*_counter` periodic-timer pattern in `binance::rate_limit`).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;

use crate::types::MillisTimestamp;

#[derive(Clone)]
struct Entry {
    value: Value,
    stored_at: MillisTimestamp,
    ttl_ms: i64,
}

#[derive(Clone)]
pub struct MarketCache {
    entries: Arc<DashMap<String, Entry>>,
    now_fn: Arc<dyn Fn() -> MillisTimestamp + Send + Sync>,
}

impl MarketCache {
    pub fn new(now_fn: Arc<dyn Fn() -> MillisTimestamp + Send + Sync>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            now_fn,
        }
    }

    pub fn key(provider: &str, endpoint: &str, symbol: &str) -> String {
        format!("{provider}:{endpoint}:{symbol}")
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = (self.now_fn)();
        self.entries.get(key).and_then(|entry| {
            if now - entry.stored_at <= entry.ttl_ms {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    pub fn set(&self, key: String, value: Value, ttl: Duration) {
        let now = (self.now_fn)();
        self.entries.insert(
            key,
            Entry {
                value,
                stored_at: now,
                ttl_ms: ttl.as_millis() as i64,
            },
        );
    }

    /// Drop every entry past its TTL. Safe to call on a timer; last-write-wins
    /// concurrent inserts are unaffected since each key's entry is replaced
    /// wholesale on `set`.
    pub fn sweep_expired(&self) {
        let now = (self.now_fn)();
        self.entries
            .retain(|_, entry| now - entry.stored_at <= entry.ttl_ms);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use serde_json::json;

    #[test]
    fn hit_then_expiry() {
        let now = Arc::new(AtomicI64::new(0));
        let now_clone = now.clone();
        let cache = MarketCache::new(Arc::new(move || now_clone.load(Ordering::SeqCst)));

        let key = MarketCache::key("options", "chain", "BTCUSDT");
        cache.set(key.clone(), json!({"a": 1}), Duration::from_millis(1000));
        assert!(cache.get(&key).is_some());

        now.store(2000, Ordering::SeqCst);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let now = Arc::new(AtomicI64::new(0));
        let now_clone = now.clone();
        let cache = MarketCache::new(Arc::new(move || now_clone.load(Ordering::SeqCst)));

        cache.set("k1".into(), json!(1), Duration::from_millis(500));
        now.store(1000, Ordering::SeqCst);
        cache.sweep_expired();
        assert!(cache.is_empty());
    }
}
