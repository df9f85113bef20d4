// =============================================================================
// Context Store (C4) — per-symbol partial-state merge, completeness, expiry
// =============================================================================
//
// Resolves Open Question 1 (store sharding policy) with a `DashMap<String,
// SymbolContext>`: every symbol gets its own isolated state and its own
// implicit per-key lock from `dashmap`'s sharded internals, rather than a
// single process-wide singleton guarded by one lock. `SymbolContext` itself
// assumes single-symbol identity; handing it a `PartialContext` whose
// `instrument.symbol` differs from its own is an identity-conflict error,
// exactly as spec.md's "conflicting symbols in the same store instance are
// an error" rule describes.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::Config;
use crate::errors::EngineError;
use crate::model::{
    AlignmentSection, DecisionContext, DecisionContextMeta, InstrumentSection, PartialContext,
    RegimeSection, Source, StoredContext, StructureSection,
};
use crate::types::MillisTimestamp;

/// Injectable now-source so tests can pin time, matching spec.md §4.3's
/// "single monotonic now-source" requirement.
pub type NowFn = Arc<dyn Fn() -> MillisTimestamp + Send + Sync>;

pub fn system_now() -> MillisTimestamp {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy)]
pub struct CompletenessStats {
    pub regime_present: bool,
    pub expert_present: bool,
    pub symbol_present: bool,
    pub non_expired_count: usize,
    pub known_count: usize,
    pub ratio: f64,
}

/// State for a single symbol. Not `Sync` on its own — callers reach it only
/// through `ContextStore`'s DashMap entry API, which provides exclusive
/// access for the duration of an operation.
#[derive(Debug, Clone, Default)]
struct SymbolContext {
    stored: StoredContext,
}

impl SymbolContext {
    fn update(
        &mut self,
        partial: PartialContext,
        source: Source,
        now: MillisTimestamp,
    ) -> Result<(), EngineError> {
        if let Some(incoming) = &partial.instrument {
            if let Some(existing) = &self.stored.instrument {
                if existing.symbol != incoming.symbol {
                    return Err(EngineError::IdentityConflict {
                        symbol: incoming.symbol.clone(),
                        reason: format!(
                            "store already holds state for {}",
                            existing.symbol
                        ),
                    });
                }
            }
        }

        // `instrument` merges field-wise (later wins per field); every other
        // section replaces wholesale.
        if let Some(incoming) = partial.instrument {
            let merged = match self.stored.instrument.take() {
                Some(mut existing) => {
                    existing.symbol = incoming.symbol;
                    if incoming.exchange.is_some() {
                        existing.exchange = incoming.exchange;
                    }
                    if incoming.price.is_some() {
                        existing.price = incoming.price;
                    }
                    existing
                }
                None => incoming,
            };
            self.stored.instrument = Some(merged);
        }

        if partial.regime.is_some() {
            self.stored.regime = partial.regime;
        }
        if partial.alignment.is_some() {
            self.stored.alignment = partial.alignment;
        }
        if partial.expert.is_some() {
            self.stored.expert = partial.expert;
            self.stored.expert_last_source = Some(source);
        }
        if partial.structure.is_some() {
            self.stored.structure = partial.structure;
        }

        self.stored.last_updated.insert(source, now);
        Ok(())
    }

    fn section_fresh(&self, source: Source, now: MillisTimestamp, max_age_ms: i64) -> bool {
        self.stored
            .last_updated
            .get(&source)
            .map(|ts| now - ts <= max_age_ms)
            .unwrap_or(false)
    }

    fn is_complete(&self, now: MillisTimestamp, max_age_ms: i64) -> bool {
        let regime_ok = self.stored.regime.is_some() && self.section_fresh(Source::Regime, now, max_age_ms);
        let expert_ok = self.stored.expert.is_some()
            && self
                .stored
                .expert_last_source
                .map(|src| self.section_fresh(src, now, max_age_ms))
                .unwrap_or(false);
        let symbol_ok = self
            .stored
            .instrument
            .as_ref()
            .map(|i| !i.symbol.is_empty())
            .unwrap_or(false);
        regime_ok && expert_ok && symbol_ok
    }

    fn completeness_stats(&self, now: MillisTimestamp, max_age_ms: i64) -> CompletenessStats {
        let known_sources = [
            Source::Regime,
            Source::Alignment,
            Source::Expert,
            Source::Options,
            Source::Structure,
        ];
        let known_count = self.stored.last_updated.len().min(known_sources.len());
        let non_expired_count = known_sources
            .iter()
            .filter(|s| self.section_fresh(**s, now, max_age_ms))
            .count();

        CompletenessStats {
            regime_present: self.stored.regime.is_some(),
            expert_present: self.stored.expert.is_some(),
            symbol_present: self.stored.instrument.is_some(),
            non_expired_count,
            known_count: known_count.max(1),
            ratio: if known_count == 0 {
                0.0
            } else {
                non_expired_count as f64 / known_count as f64
            },
        }
    }

    fn cleanup_expired(&mut self, now: MillisTimestamp, max_age_ms: i64) {
        let expired: Vec<Source> = self
            .stored
            .last_updated
            .iter()
            .filter(|(_, ts)| now - **ts > max_age_ms)
            .map(|(s, _)| *s)
            .collect();

        for source in expired {
            self.stored.last_updated.remove(&source);
            match source {
                Source::Regime => self.stored.regime = None,
                Source::Alignment => self.stored.alignment = None,
                Source::Expert | Source::Options => {
                    if self.stored.expert_last_source == Some(source) {
                        self.stored.expert = None;
                        self.stored.expert_last_source = None;
                    }
                }
                Source::Structure => self.stored.structure = None,
            }
        }
    }

    fn build(&self, now: MillisTimestamp, max_age_ms: i64, engine_version: &str) -> Option<DecisionContext> {
        if !self.is_complete(now, max_age_ms) {
            return None;
        }

        let instrument = self.stored.instrument.clone()?;
        let regime = self.stored.regime.clone()?;
        let expert = self.stored.expert.clone()?;
        let alignment = self
            .stored
            .alignment
            .clone()
            .unwrap_or_else(AlignmentSection::default_split);
        let structure = self
            .stored
            .structure
            .clone()
            .unwrap_or_else(StructureSection::default_closed);

        let stats = self.completeness_stats(now, max_age_ms);

        Some(DecisionContext {
            instrument,
            regime,
            alignment,
            expert,
            structure,
            meta: DecisionContextMeta {
                engine_version: engine_version.to_string(),
                received_at: now,
                completeness: stats.ratio,
            },
        })
    }
}

/// Per-symbol sharded context store. Cloning is cheap (`Arc`-backed) and
/// intended for sharing across the Axum application state.
#[derive(Clone)]
pub struct ContextStore {
    shards: Arc<DashMap<String, SymbolContext>>,
    now_fn: NowFn,
}

impl ContextStore {
    pub fn new(now_fn: NowFn) -> Self {
        Self {
            shards: Arc::new(DashMap::new()),
            now_fn,
        }
    }

    fn now(&self) -> MillisTimestamp {
        (self.now_fn)()
    }

    pub fn update(&self, symbol: &str, partial: PartialContext, source: Source) -> Result<(), EngineError> {
        let now = self.now();
        let mut entry = self.shards.entry(symbol.to_string()).or_default();
        entry.update(partial, source, now)
    }

    pub fn is_complete(&self, symbol: &str, max_age_ms: i64) -> bool {
        let now = self.now();
        self.shards
            .get(symbol)
            .map(|s| s.is_complete(now, max_age_ms))
            .unwrap_or(false)
    }

    pub fn build(&self, symbol: &str, config: &Config) -> Option<DecisionContext> {
        let now = self.now();
        self.shards.get(symbol).and_then(|s| {
            s.build(
                now,
                config.completeness.max_age_ms,
                crate::config::ENGINE_VERSION,
            )
        })
    }

    pub fn cleanup_expired(&self, max_age_ms: i64) {
        let now = self.now();
        for mut entry in self.shards.iter_mut() {
            entry.cleanup_expired(now, max_age_ms);
        }
    }

    pub fn completeness_stats(&self, symbol: &str, max_age_ms: i64) -> Option<CompletenessStats> {
        let now = self.now();
        self.shards
            .get(symbol)
            .map(|s| s.completeness_stats(now, max_age_ms))
    }

    /// Explicit full clear of a symbol's state, used by tests and by the
    /// completeness-monotonicity invariant's reset path.
    pub fn clear(&self, symbol: &str) {
        self.shards.remove(symbol);
    }

    /// Snapshot of the materialized regime section for `symbol`, used by the
    /// `/api/phase/current` admin endpoint.
    pub fn current_regime(&self, symbol: &str) -> Option<RegimeSection> {
        self.shards.get(symbol).and_then(|s| s.stored.regime.clone())
    }

    /// Snapshot of the materialized alignment section for `symbol`, used by
    /// the `/api/trend/current` admin endpoint.
    pub fn current_alignment(&self, symbol: &str) -> Option<AlignmentSection> {
        self.shards
            .get(symbol)
            .and_then(|s| s.stored.alignment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExpertSection, InstrumentSection};
    use crate::types::{Bias, Direction, Phase, Quality, Volatility};

    fn store_at(ts: MillisTimestamp) -> ContextStore {
        ContextStore::new(Arc::new(move || ts))
    }

    fn regime_partial(symbol: &str) -> PartialContext {
        PartialContext {
            instrument: Some(InstrumentSection {
                symbol: symbol.to_string(),
                exchange: None,
                price: None,
            }),
            regime: Some(RegimeSection {
                phase: Phase::Markup,
                volatility: Volatility::Normal,
                confidence: 85.0,
                bias: Bias::Long,
            }),
            alignment: None,
            expert: None,
            structure: None,
        }
    }

    fn expert_partial(symbol: &str) -> PartialContext {
        PartialContext {
            instrument: Some(InstrumentSection {
                symbol: symbol.to_string(),
                exchange: None,
                price: None,
            }),
            regime: None,
            alignment: None,
            expert: Some(ExpertSection {
                direction: Direction::Long,
                ai_score: 9.0,
                quality: Quality::Extreme,
                components: vec![],
                rr1: 1.0,
                rr2: 2.0,
            }),
            structure: None,
        }
    }

    #[test]
    fn incomplete_until_regime_and_expert_both_present() {
        let store = store_at(1_000_000);
        store
            .update("BTCUSDT", regime_partial("BTCUSDT"), Source::Regime)
            .unwrap();
        assert!(!store.is_complete("BTCUSDT", 300_000));

        store
            .update("BTCUSDT", expert_partial("BTCUSDT"), Source::Expert)
            .unwrap();
        assert!(store.is_complete("BTCUSDT", 300_000));
    }

    #[test]
    fn identity_conflict_rejected() {
        let store = store_at(1_000_000);
        store
            .update("BTCUSDT", regime_partial("BTCUSDT"), Source::Regime)
            .unwrap();
        let result = store.update("ETHUSDT", regime_partial("ETHUSDT"), Source::Regime);
        assert!(matches!(result, Err(EngineError::IdentityConflict { .. })));
    }

    #[test]
    fn expiry_drops_completeness() {
        let shared_now = Arc::new(std::sync::atomic::AtomicI64::new(1_000_000));
        let now_clone = shared_now.clone();
        let store = ContextStore::new(Arc::new(move || {
            now_clone.load(std::sync::atomic::Ordering::SeqCst)
        }));
        store
            .update("BTCUSDT", regime_partial("BTCUSDT"), Source::Regime)
            .unwrap();
        store
            .update("BTCUSDT", expert_partial("BTCUSDT"), Source::Expert)
            .unwrap();
        assert!(store.is_complete("BTCUSDT", 300_000));

        shared_now.store(1_000_000 + 400_000, std::sync::atomic::Ordering::SeqCst);
        assert!(!store.is_complete("BTCUSDT", 300_000));
    }

    #[test]
    fn cleanup_expired_clears_stale_sections() {
        let shared_now = Arc::new(std::sync::atomic::AtomicI64::new(1_000_000));
        let now_clone = shared_now.clone();
        let store = ContextStore::new(Arc::new(move || {
            now_clone.load(std::sync::atomic::Ordering::SeqCst)
        }));
        store
            .update("BTCUSDT", regime_partial("BTCUSDT"), Source::Regime)
            .unwrap();

        shared_now.store(1_000_000 + 400_000, std::sync::atomic::Ordering::SeqCst);
        store.cleanup_expired(300_000);

        let stats = store.completeness_stats("BTCUSDT", 300_000).unwrap();
        assert!(!stats.regime_present);
    }

    #[test]
    fn options_and_expert_share_expert_section_freshness() {
        let store = store_at(1_000_000);
        store
            .update("BTCUSDT", regime_partial("BTCUSDT"), Source::Regime)
            .unwrap();

        let mut options_partial = expert_partial("BTCUSDT");
        options_partial.expert.as_mut().unwrap().quality = Quality::High;
        store
            .update("BTCUSDT", options_partial, Source::Options)
            .unwrap();

        assert!(store.is_complete("BTCUSDT", 300_000));
    }
}
