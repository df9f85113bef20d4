// =============================================================================
// Error Taxonomy (C1b / C8) — closed error enum, HTTP mapping, redaction
// =============================================================================
//
// Every error the engine can surface is a variant of `EngineError`. The
// taxonomy is closed by design (a `thiserror` enum, not `anyhow::Error`) so
// that routing, the error handler's degradation model, and the HTTP layer
// all switch on the same finite set of kinds. Ad hoc failures inside a
// single function still use `anyhow::Context` for wrapping, but they are
// always converted to a named `EngineError` variant before crossing a
// component boundary — mirroring the teacher's practice of keeping
// `anyhow::Result` internal to a module and returning typed errors at its
// public edges.
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Closed taxonomy of everything that can go wrong while processing a
/// webhook. Variant names are free-form Rust; [`EngineError::code`] returns
/// the stable wire string matching spec.md §7's taxonomy names exactly, so
/// routing, the error handler's degradation model, and the HTTP layer all
/// switch on the same finite set of kinds.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("unrecognized webhook source: {0}")]
    UnknownSource(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("symbol identity conflict for {symbol}: {reason}")]
    IdentityConflict { symbol: String, reason: String },

    #[error("routing/normalization exceeded its deadline")]
    ProcessingTimeout,

    #[error("webhook signature verification failed")]
    SignatureInvalid,

    #[error("unauthorized")]
    Unauthorized,

    #[error("context incomplete for this symbol")]
    IncompleteContext,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rule violation: {0}")]
    RuleViolation(String),

    #[error("provider {provider} timed out after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("provider {provider} rate limit exceeded")]
    RateLimitExceeded { provider: String },

    #[error("provider {provider} authentication failed")]
    ProviderAuthFailed { provider: String },

    #[error("provider {provider} returned an API error: {message}")]
    ProviderApiError { provider: String, message: String },

    #[error("provider {provider} network error: {message}")]
    ProviderNetworkError { provider: String, message: String },

    #[error("ledger delete is not allowed")]
    DeleteNotAllowed,

    #[error("ledger overwrite is not allowed: {0}")]
    OverwriteNotAllowed(String),

    #[error("ledger entry not found: {0}")]
    EntryNotFound(String),

    #[error("invalid ledger update: {0}")]
    InvalidUpdate(String),

    #[error("ledger database error: {0}")]
    DatabaseError(String),

    #[error("ledger validation error: {0}")]
    LedgerValidation(String),

    #[error("calculation error: {0}")]
    CalculationError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable wire code, matching spec.md §7's taxonomy names.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::SchemaValidation(_) => "SCHEMA_VALIDATION",
            Self::UnknownSource(_) => "UNKNOWN_SOURCE",
            Self::MissingField(_) | Self::InvalidField { .. } => "SCHEMA_VALIDATION",
            Self::IdentityConflict { .. } => "RULE_VIOLATION",
            Self::ProcessingTimeout => "PROCESSING_TIMEOUT",
            Self::SignatureInvalid | Self::Unauthorized => "AUTHENTICATION_FAILED",
            Self::IncompleteContext => "INCOMPLETE_CONTEXT",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::RuleViolation(_) => "RULE_VIOLATION",
            Self::ProviderTimeout { .. } => "TIMEOUT",
            Self::RateLimitExceeded { .. } => "RATE_LIMITED",
            Self::ProviderAuthFailed { .. } => "AUTHENTICATION_FAILED",
            Self::ProviderApiError { .. } => "API_ERROR",
            Self::ProviderNetworkError { .. } => "NETWORK_ERROR",
            Self::DeleteNotAllowed => "DELETE_NOT_ALLOWED",
            Self::OverwriteNotAllowed(_) => "OVERWRITE_NOT_ALLOWED",
            Self::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            Self::InvalidUpdate(_) => "INVALID_UPDATE",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::LedgerValidation(_) => "VALIDATION_ERROR",
            Self::CalculationError(_) => "CALCULATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidJson(_)
            | Self::SchemaValidation(_)
            | Self::UnknownSource(_)
            | Self::MissingField(_)
            | Self::InvalidField { .. }
            | Self::IdentityConflict { .. }
            | Self::InvalidInput(_)
            | Self::RuleViolation(_) => StatusCode::BAD_REQUEST,
            Self::SignatureInvalid | Self::Unauthorized | Self::ProviderAuthFailed { .. } => {
                StatusCode::UNAUTHORIZED
            }
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::EntryNotFound(_) => StatusCode::NOT_FOUND,
            Self::ProviderTimeout { .. } | Self::ProviderApiError { .. } | Self::ProviderNetworkError { .. } => {
                StatusCode::ACCEPTED
            }
            Self::ProcessingTimeout
            | Self::IncompleteContext
            | Self::DeleteNotAllowed
            | Self::OverwriteNotAllowed(_)
            | Self::InvalidUpdate(_)
            | Self::DatabaseError(_)
            | Self::LedgerValidation(_)
            | Self::CalculationError(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a caller may retry this failure. Provider timeouts and
    /// network errors are retryable; everything shaped by the caller's own
    /// request (bad payload, auth, identity conflicts) or a non-transient
    /// provider/API failure is not.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderTimeout { .. } | Self::ProviderNetworkError { .. }
        )
    }
}

/// Wire shape for an error response, matching spec.md §7's `ErrorResponse`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&EngineError> for ErrorResponse {
    fn from(e: &EngineError) -> Self {
        Self {
            code: e.code(),
            message: redact(&e.to_string()),
            retryable: e.retryable(),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse::from(&self);
        (status, Json(body)).into_response()
    }
}

/// Field names whose values are redacted before logging or inclusion in any
/// error message or payload echo. Mirrors the teacher's own redaction list
/// for credential-bearing headers, generalized to JSON field names.
const SENSITIVE_FIELDS: &[&str] = &["apikey", "api_key", "secret", "token", "auth", "password"];

/// Case-insensitive substring redaction: if `text` looks like it carries a
/// sensitive field name, the whole value is replaced rather than risk a
/// partial leak.
pub fn redact(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    if SENSITIVE_FIELDS.iter().any(|f| lower.contains(f)) {
        "[redacted]".to_string()
    } else {
        text.to_string()
    }
}

/// Recursively redact sensitive keys out of a JSON value, used before a
/// payload is echoed back in a diagnostic or logged at error level.
pub fn redact_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let key_lower = k.to_ascii_lowercase();
                if SENSITIVE_FIELDS.iter().any(|f| key_lower.contains(f)) {
                    out.insert(k.clone(), serde_json::Value::String("[redacted]".into()));
                } else {
                    out.insert(k.clone(), redact_json(v));
                }
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            let truncated: Vec<_> = items.iter().take(10).map(redact_json).collect();
            let residual = items.len().saturating_sub(10);
            if residual > 0 {
                let mut arr = truncated;
                arr.push(serde_json::json!({ "_truncated": residual }));
                serde_json::Value::Array(arr)
            } else {
                serde_json::Value::Array(truncated)
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            EngineError::UnknownSource("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(EngineError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            EngineError::RateLimitExceeded {
                provider: "options".into()
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            EngineError::EntryNotFound("id".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            EngineError::CalculationError("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn retryable_only_for_provider_transience() {
        assert!(EngineError::ProviderTimeout {
            provider: "analytics".into(),
            timeout_ms: 600
        }
        .retryable());
        assert!(!EngineError::Unauthorized.retryable());
        assert!(!EngineError::MissingField("symbol".into()).retryable());
    }

    #[test]
    fn redact_hides_sensitive_text() {
        assert_eq!(redact("apiKey=deadbeef"), "[redacted]");
        assert_eq!(redact("symbol BTCUSDT not found"), "symbol BTCUSDT not found");
    }

    #[test]
    fn redact_json_hides_keys_and_truncates_arrays() {
        let value = serde_json::json!({
            "symbol": "BTCUSDT",
            "apiKey": "sk-secret",
            "items": (0..15).collect::<Vec<_>>(),
        });
        let redacted = redact_json(&value);
        assert_eq!(redacted["apiKey"], serde_json::json!("[redacted]"));
        assert_eq!(redacted["symbol"], serde_json::json!("BTCUSDT"));
        assert_eq!(redacted["items"].as_array().unwrap().len(), 11);
    }
}
