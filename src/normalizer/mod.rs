// =============================================================================
// Normalizer (C2) — source detection + canonicalization
// =============================================================================
//
// `detect_source` classifies an inbound JSON payload by a fixed precedence
// order; `normalize` maps a classified payload into a `PartialContext`. Each
// mapper is a pure function — no I/O, no cross-source logic — mirroring the
// teacher's per-feed `Monitor::fetch` mappers that translate one raw JSON
// shape into one typed struct, just run locally instead of over the wire.
// =============================================================================

mod alignment;
mod expert;
mod options;
mod regime;
mod structure;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::errors::EngineError;
use crate::model::{PartialContext, Source};

/// Marker field + value identifying a regime/phase payload.
const PHASE_MARKER_FIELD: &str = "indicator";
const PHASE_MARKER_VALUE: &str = "saty_phase_oscillator";

/// Detect the source of an inbound payload by the fixed precedence order:
/// (a) phase marker, (b) alignment timeframes object, (c) raw signal with a
/// timeframe + ticker, (d) options signal (ai-score + quality, no timeframe),
/// (e) structural payload (`setup_valid` + `liquidity_ok`).
///
/// Contradictory markers resolve to whichever test comes first in this list.
pub fn detect_source(payload: &Value) -> Result<Source, EngineError> {
    let obj = payload.as_object().ok_or_else(|| {
        EngineError::InvalidField {
            field: "<root>".to_string(),
            reason: "payload is not a JSON object".to_string(),
        }
    })?;

    // (a) phase marker
    if obj
        .get(PHASE_MARKER_FIELD)
        .and_then(Value::as_str)
        .map(|v| v == PHASE_MARKER_VALUE)
        .unwrap_or(false)
    {
        return Ok(Source::Regime);
    }

    // (b) alignment: a `timeframes` object carrying at least the two fastest
    // tags we track (1m, 5m).
    if let Some(timeframes) = obj.get("timeframes").and_then(Value::as_object) {
        if timeframes.contains_key("1m") && timeframes.contains_key("5m") {
            return Ok(Source::Alignment);
        }
    }

    // (c) raw signal: has a typed `signal` object, a `timeframe`, and an
    // instrument ticker (`symbol` or `ticker`).
    let has_ticker = obj.contains_key("symbol") || obj.contains_key("ticker");
    let signal_obj = obj.get("signal").and_then(Value::as_object);
    if let Some(signal) = signal_obj {
        if obj.contains_key("timeframe") && has_ticker {
            return Ok(Source::Expert);
        }

        // (d) options signal: ai-score + quality present, but no timeframe.
        if signal.contains_key("aiScore") && signal.contains_key("quality") && !obj.contains_key("timeframe")
        {
            return Ok(Source::Options);
        }
    }

    // (e) structural: both setup_valid and liquidity_ok present.
    if obj.contains_key("setup_valid") && obj.contains_key("liquidity_ok") {
        return Ok(Source::Structure);
    }

    Err(EngineError::UnknownSource(diagnostic_table(obj)))
}

/// Build a per-field diagnostic string describing which of the
/// precedence-relevant fields were present, to help a caller see why
/// detection failed.
fn diagnostic_table(obj: &serde_json::Map<String, Value>) -> String {
    let checks: &[(&str, &str)] = &[
        (PHASE_MARKER_FIELD, "phase marker"),
        ("timeframes", "alignment timeframes"),
        ("signal", "typed signal"),
        ("timeframe", "timeframe tag"),
        ("symbol", "instrument symbol"),
        ("ticker", "instrument ticker"),
        ("setup_valid", "structural setup flag"),
        ("liquidity_ok", "structural liquidity flag"),
    ];

    let table: BTreeMap<&str, bool> = checks
        .iter()
        .map(|(field, _)| (*field, obj.contains_key(*field)))
        .collect();

    table
        .iter()
        .map(|(field, present)| format!("{field}={present}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Map a classified payload into a `PartialContext`. Unrecognized fields are
/// ignored; missing optional fields default as documented per-source.
pub fn normalize(payload: &Value, source: Source) -> Result<PartialContext, EngineError> {
    match source {
        Source::Regime => regime::normalize(payload),
        Source::Alignment => alignment::normalize(payload),
        Source::Expert => expert::normalize(payload),
        Source::Options => options::normalize(payload),
        Source::Structure => structure::normalize(payload),
    }
}
