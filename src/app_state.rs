// =============================================================================
// Shared Application State
// =============================================================================
//
// The Axum handlers' `State<Arc<AppState>>` — everything a request needs
// that isn't already frozen in the global `Config` registry. Holds the
// `Orchestrator` (which in turn owns the Context Store, Market Context
// Builder, and Ledger), the webhook HMAC secret, and process start time for
// `/healthz` uptime reporting.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use crate::orchestrator::Orchestrator;

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// HMAC-SHA256 secret validating `X-Signature` on inbound webhooks.
    /// `None` disables signature verification (e.g. local development).
    pub webhook_secret: Option<String>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, webhook_secret: Option<String>) -> Self {
        Self {
            orchestrator,
            webhook_secret,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
