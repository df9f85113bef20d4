// =============================================================================
// REST API — webhook ingestion + admin query surface (Axum 0.7)
// =============================================================================
//
// Five webhook POST routes accept raw bytes so HMAC-SHA256 verification
// (`X-Signature: sha256=<hex>`) runs over the exact wire body before JSON
// parsing, mirroring the teacher's `binance::client` request-signing idiom
// in reverse (verify instead of sign). Four admin GET routes sit behind the
// teacher's `AuthBearer` extractor, reused verbatim. `/healthz` is public,
// mirroring the teacher's `/api/v1/health`.
// =============================================================================

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::config::ENGINE_VERSION;
use crate::errors::EngineError;
use crate::ledger::LedgerQuery;
use crate::types::Action;

type HmacSha256 = Hmac<Sha256>;

/// Build the full HTTP router: five webhook ingestion routes, four admin
/// query routes, and the public health check.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/webhooks/signals", post(webhook_signals))
        .route("/api/webhooks/saty-phase", post(webhook_saty_phase))
        .route("/api/webhooks/trend", post(webhook_trend))
        .route("/api/webhooks/options", post(webhook_options))
        .route("/api/webhooks/strat", post(webhook_strat))
        .route("/api/decisions", get(recent_decisions))
        .route("/api/phase/current", get(phase_current))
        .route("/api/trend/current", get(trend_current))
        .route("/api/webhooks/recent", get(webhooks_recent))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    engine_version: &'static str,
    config_hash: String,
    uptime_seconds: u64,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        engine_version: ENGINE_VERSION,
        config_hash: state.orchestrator.config.content_hash(),
        uptime_seconds: state.uptime_seconds(),
    })
}

// =============================================================================
// Webhook ingestion
// =============================================================================

/// Verify `X-Signature: sha256=<hex>` over the raw body against
/// `state.webhook_secret`. A missing secret disables verification; a
/// present secret with a missing/mismatching header is `SignatureInvalid`.
fn verify_signature(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), EngineError> {
    let Some(secret) = &state.webhook_secret else {
        return Ok(());
    };

    let provided = headers
        .get("X-Signature")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("sha256="))
        .ok_or(EngineError::SignatureInvalid)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| EngineError::SignatureInvalid)?;
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(EngineError::SignatureInvalid)
    }
}

/// Byte-for-byte constant-time comparison, mirroring `api::auth`'s token
/// comparison so both credential checks resist timing side-channels.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

async fn ingest(state: Arc<AppState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    if let Err(e) = verify_signature(&state, &headers, &body) {
        return e.into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return EngineError::InvalidJson(e.to_string()).into_response(),
    };

    match state.orchestrator.process_webhook(&payload).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn webhook_signals(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    ingest(state, headers, body).await
}

async fn webhook_saty_phase(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    ingest(state, headers, body).await
}

async fn webhook_trend(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    ingest(state, headers, body).await
}

async fn webhook_options(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    ingest(state, headers, body).await
}

async fn webhook_strat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    ingest(state, headers, body).await
}

// =============================================================================
// Admin query endpoints (authenticated)
// =============================================================================

#[derive(Debug, Deserialize)]
struct DecisionsParams {
    limit: Option<usize>,
    decision: Option<String>,
}

async fn recent_decisions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(params): Query<DecisionsParams>,
) -> impl IntoResponse {
    let decision = match params.decision.as_deref() {
        Some("EXECUTE") => Some(Action::Execute),
        Some("WAIT") => Some(Action::Wait),
        Some("SKIP") => Some(Action::Skip),
        Some(other) => {
            return EngineError::InvalidInput(format!("unknown decision filter: {other}")).into_response();
        }
        None => None,
    };

    let query = LedgerQuery {
        decision,
        limit: params.limit,
        ..Default::default()
    };

    match state.orchestrator.ledger.query(query).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SymbolParam {
    symbol: Option<String>,
    ticker: Option<String>,
}

async fn phase_current(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SymbolParam>,
) -> impl IntoResponse {
    let Some(symbol) = params.symbol.or(params.ticker) else {
        return EngineError::InvalidInput("missing symbol".to_string()).into_response();
    };
    let regime = state.orchestrator.context_store.current_regime(&symbol);
    Json(serde_json::json!({ "symbol": symbol, "regime": regime })).into_response()
}

async fn trend_current(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SymbolParam>,
) -> impl IntoResponse {
    let Some(ticker) = params.ticker.or(params.symbol) else {
        return EngineError::InvalidInput("missing ticker".to_string()).into_response();
    };
    let alignment = state.orchestrator.context_store.current_alignment(&ticker);
    Json(serde_json::json!({ "ticker": ticker, "alignment": alignment })).into_response()
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    limit: Option<usize>,
}

/// Recent receipt audit log — every inbound webhook call `process_webhook`
/// routed successfully, independent of whether it produced a ledger entry.
/// Both ledger backends implement `LedgerStore::recent_receipts`.
async fn webhooks_recent(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(crate::ledger::MAX_QUERY_LIMIT);
    match state.orchestrator.ledger.recent_receipts(limit).await {
        Ok(receipts) => Json(receipts).into_response(),
        Err(e) => e.into_response(),
    }
}
