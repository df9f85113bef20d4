// =============================================================================
// Orchestrator (C10) — wires C1-C9 end to end for each inbound webhook
// =============================================================================
//
// `process_webhook` is the crate's single public entry point: route +
// normalize, merge into the per-symbol store, materialize a Decision
// Context once complete, fetch a Market Context, run the Decision Engine,
// apply the Error Handler's conservative bias, append to the ledger, and
// (on EXECUTE) fire an outbound intent. Every suspension point is one of
// the three the design allows: the provider fan-out, the ledger append, and
// the outbound intent publish — C2-C4, C7, C8 are pure/in-memory and never
// await.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::context_store::ContextStore;
use crate::decision::make_decision;
use crate::error_handler::{apply_conservative_bias, DegradationLevel};
use crate::errors::{redact_json, EngineError};
use crate::ledger::LedgerStore;
use crate::market::MarketContextBuilder;
use crate::model::{DecisionPacket, ExpertSection, LedgerEntry, WebhookReceipt};
use crate::router::{self, RoutedPayload};
use crate::types::MillisTimestamp;

/// Narrow fire-and-forget signal to the paper-trading executor. The only
/// consumer inside this crate is a logging stub; a real downstream
/// collaborator would subscribe to the same channel.
#[derive(Debug, Clone)]
pub struct OutboundIntent {
    pub symbol: String,
    pub packet: DecisionPacket,
}

/// Result of [`process_webhook`], matching spec.md §4.9's
/// `{success, decision?, message, processingTime}` shape.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WebhookOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionPacket>,
    pub message: String,
    pub processing_time_ms: u128,
}

pub struct Orchestrator {
    pub config: &'static Config,
    pub context_store: ContextStore,
    pub market_builder: Arc<MarketContextBuilder>,
    pub ledger: Arc<dyn LedgerStore>,
    pub now_fn: Arc<dyn Fn() -> MillisTimestamp + Send + Sync>,
    pub outbound: tokio::sync::mpsc::Sender<OutboundIntent>,
}

impl Orchestrator {
    fn now(&self) -> MillisTimestamp {
        (self.now_fn)()
    }

    /// The ten-step pipeline. Routing/normalization failures are surfaced
    /// verbatim; everything past step 3 runs best-effort so that a ledger
    /// entry is always attempted for a complete context.
    pub async fn process_webhook(&self, payload: &Value) -> Result<WebhookOutcome, EngineError> {
        let started = Instant::now();

        // Step 1: arrival metric.
        info!(payload_bytes = payload.to_string().len(), "webhook received");

        // Step 2: route + normalize (C3 -> C2).
        let routed: RoutedPayload = router::route(payload, self.now_fn.as_ref()).await?;

        // Audit every successfully routed call regardless of what happens
        // downstream (log-not-fail, same as the ledger append in step 8).
        // Signature verification happens at the HTTP layer before
        // `process_webhook` is ever invoked, so a call reaching this point
        // has already passed it.
        let receipt = WebhookReceipt {
            id: Uuid::new_v4(),
            received_at: routed.timestamp,
            source: routed.source.to_string(),
            signature_valid: true,
            redacted_body: redact_json(payload),
        };
        if let Err(e) = self.ledger.record_receipt(receipt).await {
            warn!(error = %e, "webhook receipt recording failed; continuing");
        }

        let symbol = routed
            .normalized
            .instrument
            .as_ref()
            .map(|i| i.symbol.clone())
            .ok_or_else(|| EngineError::MissingField("instrument.symbol".to_string()))?;

        // Step 3: merge into Context Store (C4).
        self.context_store
            .update(&symbol, routed.normalized, routed.source)?;

        if !self
            .context_store
            .is_complete(&symbol, self.config.completeness.max_age_ms)
        {
            return Ok(WebhookOutcome {
                success: true,
                decision: None,
                message: "context updated, waiting".to_string(),
                processing_time_ms: started.elapsed().as_millis(),
            });
        }

        // Step 4: materialize Decision Context; guard against an expiry
        // race between the completeness check above and this build.
        let decision_ctx = self.context_store.build(&symbol, self.config).ok_or_else(|| {
            EngineError::IncompleteContext
        })?;

        // Step 5: fetch Market Context (C6), concurrent provider fan-out.
        let market_ctx = self.market_builder.build_context(&symbol, self.config).await;

        // Step 6: Decision Engine (C7).
        let mut packet = make_decision(&decision_ctx, &market_ctx, self.config, self.now());

        // Step 7: Error Handler (C8) conservative bias driven by Market
        // Context degradation.
        let level = DegradationLevel::from_completeness(market_ctx.completeness);
        apply_conservative_bias(&mut packet, level);

        // Step 8: append to ledger (log-not-fail on error).
        let entry = build_ledger_entry(&packet, &symbol, &decision_ctx.expert);
        match self.ledger.append(entry).await {
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, symbol = %symbol, "ledger append failed; continuing with in-flight decision");
            }
        }

        // Step 9: fire-and-forget outbound intent on EXECUTE.
        if packet.action == crate::types::Action::Execute {
            let intent = OutboundIntent {
                symbol: symbol.clone(),
                packet: packet.clone(),
            };
            if self.outbound.try_send(intent).is_err() {
                warn!(symbol = %symbol, "outbound intent channel full or closed; dropping EXECUTE notification");
            }
        }

        // Step 10: return packet + timing.
        Ok(WebhookOutcome {
            success: true,
            decision: Some(packet),
            message: "decision produced".to_string(),
            processing_time_ms: started.elapsed().as_millis(),
        })
    }
}

fn build_ledger_entry(packet: &DecisionPacket, symbol: &str, expert: &ExpertSection) -> LedgerEntry {
    LedgerEntry {
        id: Uuid::new_v4(),
        created_at: packet.timestamp,
        engine_version: packet.engine_version.clone(),
        signal: expert.clone(),
        phase_context: Some(packet.input_context.regime.clone()),
        decision: packet.action,
        decision_reason: packet.reasons.join("; "),
        decision_breakdown: packet.gate_results.clone(),
        confluence_score: packet.confidence_score,
        execution: if packet.action == crate::types::Action::Execute {
            Some(crate::model::ExecutionRecord {
                direction: packet.direction.unwrap_or(expert.direction),
                size_multiplier: packet.final_size_multiplier,
                entry_price: packet.input_context.instrument.price,
            })
        } else {
            None
        },
        exit: None,
        regime: packet.input_context.regime.clone(),
        hypothetical: None,
        symbol: symbol.to_string(),
        timeframe: None,
    }
}

/// Spawn a logging-only sink for [`OutboundIntent`]s, returning the sender
/// half. In production a real paper-trading executor would be the consumer
/// instead; this crate only needs to demonstrate the fire-and-forget
/// handoff.
pub fn spawn_outbound_sink(buffer: usize) -> tokio::sync::mpsc::Sender<OutboundIntent> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<OutboundIntent>(buffer);
    tokio::spawn(async move {
        while let Some(intent) = rx.recv().await {
            info!(
                symbol = %intent.symbol,
                direction = ?intent.packet.direction,
                size = intent.packet.final_size_multiplier,
                "outbound EXECUTE intent"
            );
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ledger::InMemoryLedger;
    use crate::market::providers::{AnalyticsProvider, LiquidityProvider, OptionsProvider};
    use crate::market::{MarketCache, RateLimiter};
    use serde_json::json;

    fn test_orchestrator(now: MillisTimestamp) -> Orchestrator {
        let config = crate::config::test_config();
        let now_fn: Arc<dyn Fn() -> MillisTimestamp + Send + Sync> = Arc::new(move || now);
        let builder = MarketContextBuilder::new(
            OptionsProvider::new("http://localhost:1".into(), String::new()),
            AnalyticsProvider::new("http://localhost:1".into(), String::new()),
            LiquidityProvider::new("http://localhost:1".into(), String::new()),
            MarketCache::new(now_fn.clone()),
            RateLimiter::new(now_fn.clone()),
            now_fn.clone(),
        );
        Orchestrator {
            config,
            context_store: ContextStore::new(now_fn.clone()),
            market_builder: Arc::new(builder),
            ledger: Arc::new(InMemoryLedger::new()),
            now_fn,
            outbound: spawn_outbound_sink(16),
        }
    }

    #[tokio::test]
    async fn incomplete_context_waits_without_deciding() {
        let orchestrator = test_orchestrator(1_000_000);
        let payload = json!({
            "phase": 2,
            "symbol": "BTCUSDT",
            "volatility": "NORMAL",
            "confidence": 80,
            "bias": "LONG",
        });
        let outcome = orchestrator.process_webhook(&payload).await.unwrap();
        assert!(outcome.decision.is_none());
        assert_eq!(outcome.message, "context updated, waiting");
    }

    #[tokio::test]
    async fn unknown_source_surfaces_as_error() {
        let orchestrator = test_orchestrator(1_000_000);
        let payload = json!({"nonsense": true});
        let err = orchestrator.process_webhook(&payload).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownSource(_)));
    }
}
