// =============================================================================
// Decision Engine (C7) — gate pipeline, weighted confidence, sized verdict
// =============================================================================
//
// `make_decision` runs the three gates (regime, structural, market) and the
// confidence calculator in the fixed order spec'd: regime, structural,
// market, then confidence + sizing. Every gate's `(passed, reason, score)`
// survives into the packet so a verdict is reproducible from stored context
// alone, mirroring the teacher's `strategy.rs` evaluate-pipeline shape
// (indicators -> regime -> signals -> score -> gates -> sizing -> proposal)
// and `trade_insurance.rs`'s `check_all`-returns-`Option<reason>` gate idiom,
// generalized here from boolean short-circuit to three independently scored
// gates.
// =============================================================================

use crate::config::Config;
use crate::model::{DecisionContext, DecisionPacket, GateResult, GateResults, MarketContext};
use crate::types::{Action, Direction, MillisTimestamp};

/// Normalize an `aiScore` (0.0..=10.5) onto a 0..100 scale, clamped.
fn normalized_ai_score(ai_score: f64) -> f64 {
    (ai_score / 10.5 * 100.0).min(100.0).max(0.0)
}

fn regime_gate(ctx: &DecisionContext, config: &Config) -> GateResult {
    let direction = ctx.expert.direction;
    let phase = ctx.regime.phase;

    if !phase.allowed_directions().contains(&direction) {
        return GateResult {
            passed: false,
            reason: format!("{phase} does not allow {direction} trades"),
            score: 0.0,
        };
    }

    if ctx.regime.confidence < config.thresholds.wait_confidence {
        return GateResult {
            passed: false,
            reason: format!(
                "regime confidence {:.1} below wait threshold {:.1}",
                ctx.regime.confidence, config.thresholds.wait_confidence
            ),
            score: ctx.regime.confidence,
        };
    }

    if !ctx.regime.bias.permits(direction) {
        return GateResult {
            passed: false,
            reason: format!("regime bias {:?} conflicts with {direction}", ctx.regime.bias),
            score: ctx.regime.confidence,
        };
    }

    GateResult {
        passed: true,
        reason: format!("{phase} permits {direction} at confidence {:.1}", ctx.regime.confidence),
        score: ctx.regime.confidence,
    }
}

fn structural_gate(ctx: &DecisionContext, config: &Config) -> GateResult {
    let s = &ctx.structure;
    let ai_score = ctx.expert.ai_score;

    if !s.valid_setup {
        return GateResult {
            passed: false,
            reason: "structural setup invalid".to_string(),
            score: 0.0,
        };
    }
    if !s.liquidity_ok {
        return GateResult {
            passed: false,
            reason: "structural liquidity check failed".to_string(),
            score: 0.0,
        };
    }
    if s.execution_quality == crate::types::ExecutionQuality::C {
        return GateResult {
            passed: false,
            reason: "execution quality grade C is not tradeable".to_string(),
            score: 0.0,
        };
    }
    if ai_score < config.thresholds.min_ai_score {
        return GateResult {
            passed: false,
            reason: format!(
                "aiScore {:.2} below minimum {:.2}",
                ai_score, config.thresholds.min_ai_score
            ),
            score: s.execution_quality.grade_score(),
        };
    }

    let score = (s.execution_quality.grade_score() + normalized_ai_score(ai_score)) / 2.0;
    GateResult {
        passed: true,
        reason: format!("setup valid, grade {:?}, aiScore {:.2}", s.execution_quality, ai_score),
        score,
    }
}

/// One market sub-check's contribution: `(passed, score)`. `lower_is_better`
/// scores proportional-overshoot below the threshold; otherwise proportional
/// shortfall above it.
fn subcheck_score(value: f64, threshold: f64, lower_is_better: bool) -> (bool, f64) {
    if lower_is_better {
        if value <= threshold {
            (true, 100.0)
        } else {
            let overshoot_pct = (value - threshold) / threshold * 100.0;
            (false, (100.0 - overshoot_pct).max(0.0))
        }
    } else if value >= threshold {
        (true, 100.0)
    } else {
        let shortfall_pct = (threshold - value) / threshold * 100.0;
        (false, (100.0 - shortfall_pct).max(0.0))
    }
}

fn market_gate(market: &MarketContext, ctx: &DecisionContext, config: &Config) -> GateResult {
    let mut scores = Vec::new();
    let mut violations = Vec::new();

    if let Some(liquidity) = &market.liquidity {
        let (passed, score) = subcheck_score(liquidity.spread_bps, config.thresholds.max_spread_bps, true);
        scores.push(score);
        if !passed {
            violations.push(format!(
                "{:.1}bps > {:.1}bps",
                liquidity.spread_bps, config.thresholds.max_spread_bps
            ));
        }

        let (passed, score) = subcheck_score(liquidity.depth_score, config.thresholds.min_depth_score, false);
        scores.push(score);
        if !passed {
            violations.push(format!(
                "depthScore {:.1} < {:.1}",
                liquidity.depth_score, config.thresholds.min_depth_score
            ));
        }
    } else {
        scores.push(50.0);
        scores.push(50.0);
    }

    if let Some(stats) = &market.stats {
        // ATR spike expressed as a percentage of instrument price, since the
        // threshold (3.0) is unitless; when price is unavailable the check
        // is skipped and scored as acceptable rather than guessed at.
        match ctx.instrument.price {
            Some(price) if price > 0.0 => {
                let atr_pct = stats.atr14 / price * 100.0;
                let (passed, score) = subcheck_score(atr_pct, config.thresholds.max_atr_spike, true);
                scores.push(score);
                if !passed {
                    violations.push(format!(
                        "atr spike {:.2}% > {:.2}%",
                        atr_pct, config.thresholds.max_atr_spike
                    ));
                }
            }
            _ => scores.push(100.0),
        }
    } else {
        scores.push(50.0);
    }

    let score = scores.iter().sum::<f64>() / scores.len() as f64;

    if violations.is_empty() {
        GateResult {
            passed: true,
            reason: "market conditions within bounds".to_string(),
            score,
        }
    } else {
        GateResult {
            passed: false,
            reason: violations.join("; "),
            score,
        }
    }
}

fn alignment_score_toward(ctx: &DecisionContext, direction: Direction) -> f64 {
    match direction {
        Direction::Long => ctx.alignment.bullish_pct,
        Direction::Short => ctx.alignment.bearish_pct,
    }
}

fn expert_score(ctx: &DecisionContext, config: &Config) -> f64 {
    let base = normalized_ai_score(ctx.expert.ai_score);
    if ctx.expert.ai_score < config.thresholds.min_ai_score {
        base * config.thresholds.ai_score_penalty
    } else {
        base
    }
}

fn sizing(
    confidence: f64,
    ctx: &DecisionContext,
    alignment_score: f64,
    config: &Config,
) -> f64 {
    let mut size = confidence / 100.0;
    size = size.min(ctx.regime.phase.size_cap());
    size = size.min(ctx.regime.volatility.size_cap());
    size *= ctx.expert.quality.boost();
    if alignment_score >= config.thresholds.alignment_bonus_threshold_pct {
        size *= config.thresholds.alignment_bonus;
    }
    size = size.clamp(0.5, 3.0);
    (size * 100.0).round() / 100.0
}

/// Run the full gate pipeline and produce a `DecisionPacket` for `ctx`/`market`.
pub fn make_decision(
    ctx: &DecisionContext,
    market: &MarketContext,
    config: &Config,
    now: MillisTimestamp,
) -> DecisionPacket {
    let regime_result = regime_gate(ctx, config);
    let structural_result = structural_gate(ctx, config);
    let market_result = market_gate(market, ctx, config);

    let direction = ctx.expert.direction;
    let alignment_score = alignment_score_toward(ctx, direction);
    let expert = expert_score(ctx, config);
    let structural_score = structural_result.score;
    let market_score = market_result.score;

    let confidence = 0.30 * ctx.regime.confidence
        + 0.25 * expert
        + 0.20 * alignment_score
        + 0.15 * market_score
        + 0.10 * structural_score;
    let confidence = (confidence.clamp(0.0, 100.0) * 10.0).round() / 10.0;

    let all_gates_passed = regime_result.passed && structural_result.passed && market_result.passed;

    let mut reasons = Vec::new();
    let (action, packet_direction, size) = if !all_gates_passed {
        if !regime_result.passed {
            reasons.push(format!("regime gate failed: {}", regime_result.reason));
        }
        if !structural_result.passed {
            reasons.push(format!("structural gate failed: {}", structural_result.reason));
        }
        if !market_result.passed {
            reasons.push(format!("market gate failed: {}", market_result.reason));
        }
        (Action::Skip, None, 0.0)
    } else if confidence >= config.thresholds.execute_confidence {
        reasons.push(format!("confidence {confidence:.1} >= execute threshold"));
        let size = sizing(confidence, ctx, alignment_score, config);
        (Action::Execute, Some(direction), size)
    } else if confidence >= config.thresholds.wait_confidence {
        reasons.push(format!("confidence {confidence:.1} in wait band"));
        (Action::Wait, None, 0.0)
    } else {
        reasons.push(format!("confidence {confidence:.1} below wait threshold"));
        (Action::Skip, None, 0.0)
    };

    DecisionPacket {
        action,
        direction: packet_direction,
        final_size_multiplier: size,
        confidence_score: confidence,
        reasons,
        engine_version: crate::config::ENGINE_VERSION.to_string(),
        gate_results: GateResults {
            regime: regime_result,
            structural: structural_result,
            market: market_result,
        },
        input_context: ctx.clone(),
        market_snapshot: market.clone(),
        timestamp: now,
    }
}
