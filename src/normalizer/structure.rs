// Structural-validator publisher mapper.

use serde_json::Value;

use crate::errors::EngineError;
use crate::model::{InstrumentSection, PartialContext, StructureSection};
use crate::types::ExecutionQuality;

pub fn normalize(payload: &Value) -> Result<PartialContext, EngineError> {
    let symbol = payload
        .get("symbol")
        .or_else(|| payload.get("ticker"))
        .and_then(Value::as_str)
        .map(|s| s.to_uppercase())
        .ok_or_else(|| EngineError::MissingField("symbol".to_string()))?;

    let valid_setup = payload
        .get("setup_valid")
        .and_then(Value::as_bool)
        .ok_or_else(|| EngineError::MissingField("setup_valid".to_string()))?;
    let liquidity_ok = payload
        .get("liquidity_ok")
        .and_then(Value::as_bool)
        .ok_or_else(|| EngineError::MissingField("liquidity_ok".to_string()))?;

    let execution_quality = match payload.get("execution_quality").and_then(Value::as_str) {
        Some("A") => ExecutionQuality::A,
        Some("B") => ExecutionQuality::B,
        Some("C") | None => ExecutionQuality::C,
        Some(other) => {
            return Err(EngineError::InvalidField {
                field: "execution_quality".to_string(),
                reason: format!("unrecognized grade {other}"),
            })
        }
    };

    Ok(PartialContext {
        instrument: Some(InstrumentSection {
            symbol,
            exchange: None,
            price: None,
        }),
        regime: None,
        alignment: None,
        expert: None,
        structure: Some(StructureSection {
            valid_setup,
            liquidity_ok,
            execution_quality,
        }),
    })
}
