// =============================================================================
// Source Router (C3)
// =============================================================================
//
// Dispatches an opaque inbound payload to the Normalizer and classifies
// failures into the routing error kinds. Successful routes are logged with
// a structured `tracing` event; secret-bearing fields are redacted first,
// matching the teacher's practice of never logging raw webhook bodies.
// =============================================================================

use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;
use tracing::{info, instrument};

use crate::errors::{redact_json, EngineError};
use crate::model::{PartialContext, Source};
use crate::normalizer;
use crate::types::MillisTimestamp;

/// Maximum time routing+normalization may take before being classified as
/// `PROCESSING_TIMEOUT`. Both steps are pure/in-memory, so this is a large
/// safety margin rather than an expected bound.
const ROUTING_TIMEOUT: Duration = Duration::from_millis(250);

pub struct RoutedPayload {
    pub source: Source,
    pub normalized: PartialContext,
    pub timestamp: MillisTimestamp,
}

#[instrument(skip(payload, now_fn))]
pub async fn route(
    payload: &Value,
    now_fn: impl Fn() -> MillisTimestamp,
) -> Result<RoutedPayload, EngineError> {
    let result = timeout(ROUTING_TIMEOUT, async {
        let source = normalizer::detect_source(payload)?;
        let normalized = normalizer::normalize(payload, source)?;
        Ok::<_, EngineError>((source, normalized))
    })
    .await;

    let (source, normalized) = match result {
        Ok(inner) => inner?,
        Err(_elapsed) => return Err(EngineError::ProcessingTimeout),
    };

    let timestamp = now_fn();

    info!(
        source = %source,
        payload = %redact_json(payload),
        timestamp,
        "webhook routed"
    );

    Ok(RoutedPayload {
        source,
        normalized,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixed_now() -> MillisTimestamp {
        1_700_000_000_000
    }

    #[tokio::test]
    async fn routes_valid_payload() {
        let payload = json!({
            "symbol": "BTCUSDT",
            "setup_valid": true,
            "liquidity_ok": true,
        });
        let routed = route(&payload, fixed_now).await.unwrap();
        assert_eq!(routed.source, Source::Structure);
        assert_eq!(routed.timestamp, fixed_now());
    }

    #[tokio::test]
    async fn unknown_source_surfaces_verbatim() {
        let payload = json!({"nonsense": true});
        let err = route(&payload, fixed_now).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownSource(_)));
    }
}
