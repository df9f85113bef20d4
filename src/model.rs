// =============================================================================
// Core data model — partial contexts, stored context, decision context,
// market context, decision packets, ledger entries.
// =============================================================================
//
// This module holds the shapes that flow between components; the components
// themselves (normalizer, context store, market builder, decision engine,
// ledger) live in their own modules. Keeping the types together mirrors the
// teacher's `types.rs` + per-subsystem-module split.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    Action, Bias, Direction, ExecutionQuality, GammaBias, MillisTimestamp, Phase, Quality,
    TimeframeState, TradeVelocity, Volatility,
};

/// The publisher kind identified by the Normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Regime,
    Alignment,
    Expert,
    Options,
    Structure,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Regime => "REGIME",
            Self::Alignment => "ALIGNMENT",
            Self::Expert => "EXPERT",
            Self::Options => "OPTIONS",
            Self::Structure => "STRUCTURE",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Partial context sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSection {
    pub symbol: String,
    pub exchange: Option<String>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSection {
    pub phase: Phase,
    pub volatility: Volatility,
    pub confidence: f64,
    pub bias: Bias,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentSection {
    pub tf_states: HashMap<String, TimeframeState>,
    pub bullish_pct: f64,
    pub bearish_pct: f64,
}

impl AlignmentSection {
    /// Semantic default used when the alignment section is missing at
    /// decision-context build time: an even 50/50 split.
    pub fn default_split() -> Self {
        Self {
            tf_states: HashMap::new(),
            bullish_pct: 50.0,
            bearish_pct: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertSection {
    pub direction: Direction,
    pub ai_score: f64,
    pub quality: Quality,
    pub components: Vec<String>,
    pub rr1: f64,
    pub rr2: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureSection {
    pub valid_setup: bool,
    pub liquidity_ok: bool,
    pub execution_quality: ExecutionQuality,
}

impl StructureSection {
    /// Semantic default used when the structure section is missing at
    /// decision-context build time: a closed, low-quality posture.
    pub fn default_closed() -> Self {
        Self {
            valid_setup: false,
            liquidity_ok: false,
            execution_quality: ExecutionQuality::C,
        }
    }
}

/// One webhook's worth of normalized data. Every section is optional; a
/// given webhook populates at most the section(s) matching its source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialContext {
    pub instrument: Option<InstrumentSection>,
    pub regime: Option<RegimeSection>,
    pub alignment: Option<AlignmentSection>,
    pub expert: Option<ExpertSection>,
    pub structure: Option<StructureSection>,
}

// =============================================================================
// Stored / Decision context
// =============================================================================

/// Per-symbol state held by the Context Store: the latest value of each
/// section plus a per-source last-updated timestamp.
#[derive(Debug, Clone, Default)]
pub struct StoredContext {
    pub instrument: Option<InstrumentSection>,
    pub regime: Option<RegimeSection>,
    pub alignment: Option<AlignmentSection>,
    pub expert: Option<ExpertSection>,
    pub structure: Option<StructureSection>,
    pub last_updated: HashMap<Source, MillisTimestamp>,
    /// Which of `Expert`/`Options` most recently wrote `expert` — both
    /// sources populate the same section, so completeness must consult
    /// whichever one actually wrote the value currently stored.
    pub expert_last_source: Option<Source>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionContextMeta {
    pub engine_version: String,
    pub received_at: MillisTimestamp,
    pub completeness: f64,
}

/// Materialized merge of partial contexts, handed to the Decision Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionContext {
    pub instrument: InstrumentSection,
    pub regime: RegimeSection,
    pub alignment: AlignmentSection,
    pub expert: ExpertSection,
    pub structure: StructureSection,
    pub meta: DecisionContextMeta,
}

// =============================================================================
// Market Context
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsSection {
    pub put_call_ratio: f64,
    pub iv_percentile: f64,
    pub gamma_bias: GammaBias,
    pub option_volume: f64,
    pub max_pain: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSection {
    pub atr14: f64,
    pub rv20: f64,
    pub trend_slope: f64,
    pub rsi: f64,
    pub volume: f64,
    pub volume_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquiditySection {
    pub spread_bps: f64,
    pub depth_score: f64,
    pub trade_velocity: TradeVelocity,
    pub bid_size: f64,
    pub ask_size: f64,
}

/// The merged real-time market snapshot fetched from providers per verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub options: Option<OptionsSection>,
    pub stats: Option<StatsSection>,
    pub liquidity: Option<LiquiditySection>,
    pub fetch_time: MillisTimestamp,
    /// successful / total provider calls attempted (always 3 here).
    pub completeness: f64,
    pub errors: Vec<String>,
}

impl MarketContext {
    pub fn successful_count(&self) -> usize {
        [
            self.options.is_some(),
            self.stats.is_some(),
            self.liquidity.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count()
    }
}

// =============================================================================
// Gate results / Decision Packet
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub reason: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResults {
    pub regime: GateResult,
    pub structural: GateResult,
    pub market: GateResult,
}

/// C7 output — the unit of work the ledger persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPacket {
    pub action: Action,
    pub direction: Option<Direction>,
    pub final_size_multiplier: f64,
    pub confidence_score: f64,
    pub reasons: Vec<String>,
    pub engine_version: String,
    pub gate_results: GateResults,
    pub input_context: DecisionContext,
    pub market_snapshot: MarketContext,
    pub timestamp: MillisTimestamp,
}

// =============================================================================
// Ledger entry
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub direction: Direction,
    pub size_multiplier: f64,
    pub entry_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRecord {
    pub exit_price: f64,
    pub exit_reason: String,
    pub pnl: f64,
    pub closed_at: MillisTimestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypotheticalRecord {
    pub would_have_entered: bool,
    pub hypothetical_pnl: Option<f64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub created_at: MillisTimestamp,
    pub engine_version: String,
    pub signal: ExpertSection,
    pub phase_context: Option<RegimeSection>,
    pub decision: Action,
    pub decision_reason: String,
    pub decision_breakdown: GateResults,
    pub confluence_score: f64,
    pub execution: Option<ExecutionRecord>,
    pub exit: Option<ExitRecord>,
    pub regime: RegimeSection,
    pub hypothetical: Option<HypotheticalRecord>,
    pub symbol: String,
    pub timeframe: Option<String>,
}

/// Audit-log record of one inbound webhook call, independent of whether it
/// produced a ledger entry (a context-update-only webhook still gets one).
/// Populated by the Source Router path in `orchestrator::process_webhook`
/// and recorded through `LedgerStore::record_receipt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookReceipt {
    pub id: Uuid,
    pub received_at: MillisTimestamp,
    pub source: String,
    pub signature_valid: bool,
    pub redacted_body: serde_json::Value,
}

impl LedgerEntry {
    /// Trade-type classification bucket derived from `timeframe`, used by
    /// the ledger's query filter (`{SCALP,DAY,SWING}`).
    pub fn trade_type(&self) -> Option<&'static str> {
        let tf = self.timeframe.as_deref()?;
        Some(match tf {
            "1m" | "5m" | "15m" => "SCALP",
            "1h" | "4h" => "DAY",
            _ => "SWING",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_default_split_is_even() {
        let a = AlignmentSection::default_split();
        assert_eq!(a.bullish_pct, 50.0);
        assert_eq!(a.bearish_pct, 50.0);
    }

    #[test]
    fn structure_default_is_closed_and_grade_c() {
        let s = StructureSection::default_closed();
        assert!(!s.valid_setup);
        assert!(!s.liquidity_ok);
        assert_eq!(s.execution_quality, ExecutionQuality::C);
    }

    #[test]
    fn trade_type_buckets_by_timeframe() {
        let mut entry = sample_entry();
        entry.timeframe = Some("5m".to_string());
        assert_eq!(entry.trade_type(), Some("SCALP"));
        entry.timeframe = Some("4h".to_string());
        assert_eq!(entry.trade_type(), Some("DAY"));
        entry.timeframe = Some("1d".to_string());
        assert_eq!(entry.trade_type(), Some("SWING"));
        entry.timeframe = None;
        assert_eq!(entry.trade_type(), None);
    }

    fn sample_entry() -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            created_at: 0,
            engine_version: "test".into(),
            signal: ExpertSection {
                direction: Direction::Long,
                ai_score: 9.0,
                quality: Quality::High,
                components: vec![],
                rr1: 1.0,
                rr2: 2.0,
            },
            phase_context: None,
            decision: Action::Skip,
            decision_reason: "test".into(),
            decision_breakdown: GateResults {
                regime: GateResult {
                    passed: true,
                    reason: "ok".into(),
                    score: 100.0,
                },
                structural: GateResult {
                    passed: true,
                    reason: "ok".into(),
                    score: 100.0,
                },
                market: GateResult {
                    passed: true,
                    reason: "ok".into(),
                    score: 100.0,
                },
            },
            confluence_score: 50.0,
            execution: None,
            exit: None,
            regime: RegimeSection {
                phase: Phase::Markup,
                volatility: Volatility::Normal,
                confidence: 80.0,
                bias: Bias::Neutral,
            },
            hypothetical: None,
            symbol: "BTCUSDT".into(),
            timeframe: None,
        }
    }
}
