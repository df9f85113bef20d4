// Multi-timeframe alignment publisher mapper.

use std::collections::HashMap;

use serde_json::Value;

use crate::errors::EngineError;
use crate::model::{AlignmentSection, InstrumentSection, PartialContext};
use crate::types::TimeframeState;

pub fn normalize(payload: &Value) -> Result<PartialContext, EngineError> {
    let symbol = payload
        .get("symbol")
        .or_else(|| payload.get("ticker"))
        .and_then(Value::as_str)
        .map(|s| s.to_uppercase())
        .ok_or_else(|| EngineError::MissingField("symbol".to_string()))?;

    let timeframes = payload
        .get("timeframes")
        .and_then(Value::as_object)
        .ok_or_else(|| EngineError::MissingField("timeframes".to_string()))?;

    let mut tf_states = HashMap::new();
    for (tag, value) in timeframes {
        let state = match value.as_str() {
            Some("BULLISH") => TimeframeState::Bullish,
            Some("BEARISH") => TimeframeState::Bearish,
            Some("NEUTRAL") | None => TimeframeState::Neutral,
            Some(other) => {
                return Err(EngineError::InvalidField {
                    field: format!("timeframes.{tag}"),
                    reason: format!("unrecognized state {other}"),
                })
            }
        };
        tf_states.insert(tag.clone(), state);
    }

    let bullish_pct = payload
        .get("bullishPct")
        .and_then(Value::as_f64)
        .unwrap_or_else(|| derive_pct(&tf_states, TimeframeState::Bullish))
        .clamp(0.0, 100.0);
    let bearish_pct = payload
        .get("bearishPct")
        .and_then(Value::as_f64)
        .unwrap_or_else(|| derive_pct(&tf_states, TimeframeState::Bearish))
        .clamp(0.0, 100.0);

    if bullish_pct + bearish_pct > 100.0 + 1e-9 {
        return Err(EngineError::InvalidField {
            field: "bullishPct+bearishPct".to_string(),
            reason: format!("{bullish_pct} + {bearish_pct} exceeds 100"),
        });
    }

    Ok(PartialContext {
        instrument: Some(InstrumentSection {
            symbol,
            exchange: None,
            price: None,
        }),
        regime: None,
        alignment: Some(AlignmentSection {
            tf_states,
            bullish_pct,
            bearish_pct,
        }),
        expert: None,
        structure: None,
    })
}

fn derive_pct(tf_states: &HashMap<String, TimeframeState>, target: TimeframeState) -> f64 {
    if tf_states.is_empty() {
        return 50.0;
    }
    let count = tf_states.values().filter(|s| **s == target).count();
    (count as f64 / tf_states.len() as f64) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_explicit_percentages() {
        let payload = json!({
            "symbol": "BTCUSDT",
            "timeframes": {"1m": "BULLISH", "5m": "BULLISH", "15m": "NEUTRAL"},
            "bullishPct": 80,
            "bearishPct": 10,
        });
        let ctx = normalize(&payload).unwrap();
        let alignment = ctx.alignment.unwrap();
        assert_eq!(alignment.bullish_pct, 80.0);
        assert_eq!(alignment.bearish_pct, 10.0);
        assert_eq!(alignment.tf_states.len(), 3);
    }

    #[test]
    fn rejects_percentages_summing_over_100() {
        let payload = json!({
            "symbol": "BTCUSDT",
            "timeframes": {"1m": "BULLISH", "5m": "BULLISH"},
            "bullishPct": 80,
            "bearishPct": 30,
        });
        assert!(matches!(
            normalize(&payload),
            Err(EngineError::InvalidField { .. })
        ));
    }

    #[test]
    fn derives_percentages_when_absent() {
        let payload = json!({
            "symbol": "BTCUSDT",
            "timeframes": {"1m": "BULLISH", "5m": "BEARISH"},
        });
        let ctx = normalize(&payload).unwrap();
        let alignment = ctx.alignment.unwrap();
        assert_eq!(alignment.bullish_pct, 50.0);
        assert_eq!(alignment.bearish_pct, 50.0);
    }
}
