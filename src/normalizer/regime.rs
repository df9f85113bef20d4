// Phase / regime publisher mapper.

use serde_json::Value;

use crate::errors::EngineError;
use crate::model::{InstrumentSection, PartialContext, RegimeSection};
use crate::types::{Bias, Phase, Volatility};

pub fn normalize(payload: &Value) -> Result<PartialContext, EngineError> {
    let symbol = required_str(payload, "symbol")?;

    let phase_num = payload
        .get("phase")
        .and_then(Value::as_u64)
        .ok_or_else(|| EngineError::MissingField("phase".to_string()))?;
    let phase = Phase::from_number(phase_num as u8).ok_or_else(|| EngineError::InvalidField {
        field: "phase".to_string(),
        reason: format!("must be 1..4, got {phase_num}"),
    })?;

    let volatility = match payload.get("volatility").and_then(Value::as_str) {
        Some("LOW") => Volatility::Low,
        Some("NORMAL") | None => Volatility::Normal,
        Some("HIGH") => Volatility::High,
        Some(other) => {
            return Err(EngineError::InvalidField {
                field: "volatility".to_string(),
                reason: format!("unrecognized volatility {other}"),
            })
        }
    };

    let confidence = payload
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| EngineError::MissingField("confidence".to_string()))?
        .clamp(0.0, 100.0);

    let bias = match payload.get("bias").and_then(Value::as_str) {
        Some("LONG") => Bias::Long,
        Some("SHORT") => Bias::Short,
        Some("NEUTRAL") | None => Bias::Neutral,
        Some(other) => {
            return Err(EngineError::InvalidField {
                field: "bias".to_string(),
                reason: format!("unrecognized bias {other}"),
            })
        }
    };

    Ok(PartialContext {
        instrument: Some(InstrumentSection {
            symbol,
            exchange: payload
                .get("exchange")
                .and_then(Value::as_str)
                .map(String::from),
            price: payload.get("price").and_then(Value::as_f64),
        }),
        regime: Some(RegimeSection {
            phase,
            volatility,
            confidence,
            bias,
        }),
        alignment: None,
        expert: None,
        structure: None,
    })
}

fn required_str(payload: &Value, field: &str) -> Result<String, EngineError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(|s| s.to_uppercase())
        .ok_or_else(|| EngineError::MissingField(field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_full_regime_payload() {
        let payload = json!({
            "symbol": "btcusdt",
            "phase": 2,
            "volatility": "NORMAL",
            "confidence": 85,
            "bias": "LONG",
        });
        let ctx = normalize(&payload).unwrap();
        assert_eq!(ctx.instrument.unwrap().symbol, "BTCUSDT");
        let regime = ctx.regime.unwrap();
        assert_eq!(regime.phase, Phase::Markup);
        assert_eq!(regime.bias, Bias::Long);
        assert_eq!(regime.confidence, 85.0);
    }

    #[test]
    fn rejects_out_of_range_phase() {
        let payload = json!({"symbol": "BTCUSDT", "phase": 9, "confidence": 50});
        assert!(matches!(
            normalize(&payload),
            Err(EngineError::InvalidField { .. })
        ));
    }

    #[test]
    fn missing_confidence_is_missing_field() {
        let payload = json!({"symbol": "BTCUSDT", "phase": 1});
        assert!(matches!(
            normalize(&payload),
            Err(EngineError::MissingField(f)) if f == "confidence"
        ));
    }
}
