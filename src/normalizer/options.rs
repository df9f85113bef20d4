// Options-signal publisher mapper (ai-score + quality, no timeframe tag).
//
// Shares its `signal` shape with the expert mapper; kept as an independent
// mapper per the normalizer's one-mapper-per-source contract rather than
// reusing `expert::normalize`, since the two sources are free to diverge
// (e.g. options signals may later carry strike/expiry fields the expert
// feed never will).

use serde_json::Value;

use crate::errors::EngineError;
use crate::model::{ExpertSection, InstrumentSection, PartialContext};
use crate::types::{Direction, Quality};

pub fn normalize(payload: &Value) -> Result<PartialContext, EngineError> {
    let symbol = payload
        .get("symbol")
        .or_else(|| payload.get("ticker"))
        .and_then(Value::as_str)
        .map(|s| s.to_uppercase())
        .ok_or_else(|| EngineError::MissingField("symbol".to_string()))?;

    let signal = payload
        .get("signal")
        .and_then(Value::as_object)
        .ok_or_else(|| EngineError::MissingField("signal".to_string()))?;

    let direction = match signal.get("direction").and_then(Value::as_str) {
        Some("LONG") => Direction::Long,
        Some("SHORT") => Direction::Short,
        Some(other) => {
            return Err(EngineError::InvalidField {
                field: "signal.direction".to_string(),
                reason: format!("unrecognized direction {other}"),
            })
        }
        None => return Err(EngineError::MissingField("signal.direction".to_string())),
    };

    let ai_score = signal
        .get("aiScore")
        .and_then(Value::as_f64)
        .ok_or_else(|| EngineError::MissingField("signal.aiScore".to_string()))?;
    if !(0.0..=10.5).contains(&ai_score) {
        return Err(EngineError::InvalidField {
            field: "signal.aiScore".to_string(),
            reason: format!("must be in 0.0..=10.5, got {ai_score}"),
        });
    }

    let quality = match signal.get("quality").and_then(Value::as_str) {
        Some("EXTREME") => Quality::Extreme,
        Some("HIGH") => Quality::High,
        Some("MEDIUM") | None => Quality::Medium,
        Some(other) => {
            return Err(EngineError::InvalidField {
                field: "signal.quality".to_string(),
                reason: format!("unrecognized quality {other}"),
            })
        }
    };

    let components = signal
        .get("components")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let rr1 = signal.get("rr1").and_then(Value::as_f64).unwrap_or(0.0).max(0.0);
    let rr2 = signal.get("rr2").and_then(Value::as_f64).unwrap_or(0.0).max(0.0);

    Ok(PartialContext {
        instrument: Some(InstrumentSection {
            symbol,
            exchange: None,
            price: payload.get("price").and_then(Value::as_f64),
        }),
        regime: None,
        alignment: None,
        expert: Some(ExpertSection {
            direction,
            ai_score,
            quality,
            components,
            rr1,
            rr2,
        }),
        structure: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_options_signal_without_timeframe() {
        let payload = json!({
            "symbol": "BTCUSDT",
            "signal": {"direction": "SHORT", "aiScore": 7.5, "quality": "HIGH"},
        });
        let ctx = normalize(&payload).unwrap();
        let expert = ctx.expert.unwrap();
        assert_eq!(expert.direction, Direction::Short);
        assert_eq!(expert.quality, Quality::High);
    }
}
