// =============================================================================
// Error Handler (C8) — degradation model, conservative bias, retry policy
// =============================================================================
//
// Generalizes the teacher's `risk.rs` circuit-breaker pattern (named
// breakers, a small enum-like mode label, state mutated behind an explicit
// guard) from position-risk breakers to confidence/size degradation
// breakers driven by Market Context completeness rather than PnL. The
// retryable/non-retryable split mirrors `futures_intel`'s
// typed-fallback-on-fetch-failure idiom: a retryable failure gets another
// attempt with backoff, everything else surfaces immediately.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::errors::EngineError;
use crate::model::DecisionPacket;
use crate::types::Action;

/// Degradation bucket derived from the fraction of market feeds that
/// resolved successfully (`MarketContext::completeness`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationLevel {
    None,
    Minor,
    Major,
    Severe,
}

impl DegradationLevel {
    /// Classify `available / total` feed availability into a bucket.
    /// `NONE` at 1.0, `MINOR` above 0.67, `MAJOR` above 0.33, `SEVERE` at or
    /// below 0.33.
    pub fn from_completeness(completeness: f64) -> Self {
        if completeness >= 1.0 {
            Self::None
        } else if completeness > 0.67 {
            Self::Minor
        } else if completeness > 0.33 {
            Self::Major
        } else {
            Self::Severe
        }
    }

    /// Confidence-score penalty, in percentage points, subtracted from the
    /// packet's confidence score.
    pub fn confidence_penalty(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Minor => 5.0,
            Self::Major => 15.0,
            Self::Severe => 30.0,
        }
    }

    /// Fractional reduction applied to the packet's size multiplier.
    pub fn size_reduction(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Minor => 0.06,
            Self::Major => 0.15,
            Self::Severe => 0.24,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Minor => "MINOR",
            Self::Major => "MAJOR",
            Self::Severe => "SEVERE",
        }
    }
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Downgrade threshold: an `EXECUTE` verdict whose post-penalty confidence
/// falls below this is demoted to `WAIT` rather than shipped as a degraded
/// execution. A healthy 84-confidence EXECUTE hit by a MAJOR degradation
/// (-15pp, landing at 69) is meant to downgrade, which only happens with
/// the floor at 70 or above — 65 would let it ship degraded.
const EXECUTE_DOWNGRADE_FLOOR: f64 = 70.0;

/// Apply the conservative bias for `level` to `packet` in place. Returns
/// `true` if the action was downgraded from `EXECUTE` to `WAIT`.
///
/// A `SKIP` packet (gates already short-circuited, `finalSizeMultiplier =
/// 0`) is left untouched: there is nothing left to make more conservative.
pub fn apply_conservative_bias(packet: &mut DecisionPacket, level: DegradationLevel) -> bool {
    if level == DegradationLevel::None || packet.action == Action::Skip {
        return false;
    }

    let penalty = level.confidence_penalty();
    let reduction = level.size_reduction();

    packet.confidence_score = (packet.confidence_score - penalty).max(0.0);
    packet.final_size_multiplier *= 1.0 - reduction;

    let mut downgraded = false;
    if packet.action == Action::Execute && packet.confidence_score < EXECUTE_DOWNGRADE_FLOOR {
        packet.action = Action::Wait;
        packet.direction = None;
        packet.final_size_multiplier = 0.0;
        packet.reasons.push(format!(
            "downgraded EXECUTE to WAIT: confidence {:.1} below {:.1} floor after {} degradation",
            packet.confidence_score, EXECUTE_DOWNGRADE_FLOOR, level
        ));
        downgraded = true;
    } else {
        packet.reasons.push(format!(
            "{level} market degradation: confidence -{penalty:.0}pp, size x{:.2}",
            1.0 - reduction
        ));
    }

    if downgraded {
        warn!(level = %level, confidence = packet.confidence_score, "EXECUTE downgraded to WAIT under degradation");
    } else {
        debug!(level = %level, confidence = packet.confidence_score, "conservative bias applied");
    }

    downgraded
}

/// Retry an async operation whose failure is classified by [`EngineError`],
/// honoring `config.retry_attempts` and linear backoff
/// `retry_delay_ms * (attempt + 1)`. Non-retryable failures surface on the
/// first attempt; retryable ones are retried until attempts are exhausted.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0_u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.retryable() && attempt < config.retry_attempts => {
                let delay = Duration::from_millis(config.retry_delay_ms * (attempt as u64 + 1));
                warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AlignmentSection, DecisionContext, DecisionContextMeta, ExpertSection, GateResult,
        GateResults, InstrumentSection, MarketContext, RegimeSection, StructureSection,
    };
    use crate::types::{Bias, Direction, Phase, Quality, Volatility};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn classifies_completeness_into_buckets() {
        assert_eq!(DegradationLevel::from_completeness(1.0), DegradationLevel::None);
        assert_eq!(DegradationLevel::from_completeness(0.9), DegradationLevel::Minor);
        assert_eq!(DegradationLevel::from_completeness(0.67), DegradationLevel::Major);
        assert_eq!(DegradationLevel::from_completeness(0.5), DegradationLevel::Major);
        assert_eq!(DegradationLevel::from_completeness(0.33), DegradationLevel::Severe);
        assert_eq!(DegradationLevel::from_completeness(0.0), DegradationLevel::Severe);
    }

    fn sample_packet(action: Action, confidence: f64) -> DecisionPacket {
        DecisionPacket {
            action,
            direction: Some(Direction::Long),
            final_size_multiplier: if action == Action::Skip { 0.0 } else { 1.0 },
            confidence_score: confidence,
            reasons: vec![],
            engine_version: "test".into(),
            gate_results: GateResults {
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
            input_context: DecisionContext {
                instrument: InstrumentSection {
                    symbol: "BTCUSDT".into(),
                    exchange: None,
                    price: Some(100.0),
                },
                regime: RegimeSection {
                    phase: Phase::Markup,
                    volatility: Volatility::Normal,
                    confidence: 90.0,
                    bias: Bias::Long,
                },
                alignment: AlignmentSection::default_split(),
                expert: ExpertSection {
                    direction: Direction::Long,
                    ai_score: 9.0,
                    quality: Quality::High,
                    components: vec![],
                    rr1: 1.0,
                    rr2: 2.0,
                },
                structure: StructureSection::default_closed(),
                meta: DecisionContextMeta {
                    engine_version: "test".into(),
                    received_at: 0,
                    completeness: 1.0,
                },
            },
            market_snapshot: MarketContext {
                options: None,
                stats: None,
                liquidity: None,
                fetch_time: 0,
                completeness: 1.0,
                errors: vec![],
            },
            timestamp: 0,
        }
    }

    #[test]
    fn none_degradation_leaves_packet_untouched() {
        let mut packet = sample_packet(Action::Execute, 85.0);
        let downgraded = apply_conservative_bias(&mut packet, DegradationLevel::None);
        assert!(!downgraded);
        assert_eq!(packet.confidence_score, 85.0);
        assert_eq!(packet.final_size_multiplier, 1.0);
    }

    #[test]
    fn major_degradation_scales_confidence_and_size() {
        let mut packet = sample_packet(Action::Execute, 85.0);
        let downgraded = apply_conservative_bias(&mut packet, DegradationLevel::Major);
        assert!(!downgraded);
        assert_eq!(packet.confidence_score, 70.0);
        assert!((packet.final_size_multiplier - 0.85).abs() < 1e-9);
    }

    #[test]
    fn severe_degradation_below_floor_downgrades_execute_to_wait() {
        let mut packet = sample_packet(Action::Execute, 90.0);
        let downgraded = apply_conservative_bias(&mut packet, DegradationLevel::Severe);
        assert!(downgraded);
        assert_eq!(packet.action, Action::Wait);
        assert_eq!(packet.final_size_multiplier, 0.0);
        assert!(packet.direction.is_none());
        assert_eq!(packet.confidence_score, 60.0);
    }

    #[test]
    fn skip_packets_are_never_touched() {
        let mut packet = sample_packet(Action::Skip, 10.0);
        let downgraded = apply_conservative_bias(&mut packet, DegradationLevel::Severe);
        assert!(!downgraded);
        assert_eq!(packet.confidence_score, 10.0);
        assert_eq!(packet.final_size_multiplier, 0.0);
    }

    #[tokio::test]
    async fn retries_retryable_errors_up_to_configured_attempts() {
        let config = RetryConfig {
            retry_attempts: 2,
            retry_delay_ms: 1,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<(), EngineError> = with_retry(&config, || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::ProviderTimeout {
                    provider: "analytics".into(),
                    timeout_ms: 10,
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let config = RetryConfig {
            retry_attempts: 2,
            retry_delay_ms: 1,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<(), EngineError> = with_retry(&config, || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Unauthorized)
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_one_retry() {
        let config = RetryConfig {
            retry_attempts: 2,
            retry_delay_ms: 1,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result = with_retry(&config, || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(EngineError::ProviderNetworkError {
                        provider: "liquidity".into(),
                        message: "connection reset".into(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
