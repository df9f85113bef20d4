// =============================================================================
// Ledger (C9) — append-only persistence, filtered query, aggregates
// =============================================================================
//
// One `trait LedgerStore` (async_trait, mirroring the teacher's provider
// trait shapes in `market::providers`) with two interchangeable
// implementations: `InMemoryLedger` (a `parking_lot::RwLock<Vec<...>>` kept
// exactly the way `AppState::recent_decisions`/`recent_errors` are kept,
// just unbounded and append-only instead of ring-buffer-capped) and
// `SqlLedger` (a durable `sqlx` Postgres backend). Both enforce the same
// append-only invariants so callers never need to know which backend they
// are talking to.
// =============================================================================

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::model::{ExitRecord, HypotheticalRecord, LedgerEntry, WebhookReceipt};
use crate::types::{Action, MillisTimestamp, Volatility};

pub use memory::InMemoryLedger;
pub use sql::SqlLedger;

/// Maximum rows a single `query` may return, regardless of a caller-supplied
/// `limit`.
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Combination of filters `query` accepts. Every field is optional; absent
/// fields are not filtered on.
#[derive(Debug, Clone, Default)]
pub struct LedgerQuery {
    pub timeframe: Option<String>,
    pub quality: Option<crate::types::Quality>,
    pub decision: Option<Action>,
    pub trade_type: Option<&'static str>,
    pub regime_volatility: Option<Volatility>,
    pub from: Option<MillisTimestamp>,
    pub to: Option<MillisTimestamp>,
    pub ticker: Option<String>,
    pub has_exit: Option<bool>,
    pub has_hypothetical: Option<bool>,
    pub min_confluence: Option<f64>,
    pub max_confluence: Option<f64>,
    pub exit_reason: Option<String>,
    pub limit: Option<usize>,
}

impl LedgerQuery {
    /// Effective row cap after clamping any caller-supplied `limit` to
    /// [`MAX_QUERY_LIMIT`].
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(MAX_QUERY_LIMIT).min(MAX_QUERY_LIMIT)
    }

    fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(tf) = &self.timeframe {
            if entry.timeframe.as_deref() != Some(tf.as_str()) {
                return false;
            }
        }
        if let Some(q) = self.quality {
            if entry.signal.quality != q {
                return false;
            }
        }
        if let Some(decision) = self.decision {
            if entry.decision != decision {
                return false;
            }
        }
        if let Some(tt) = self.trade_type {
            if entry.trade_type() != Some(tt) {
                return false;
            }
        }
        if let Some(vol) = self.regime_volatility {
            if entry.regime.volatility != vol {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.created_at > to {
                return false;
            }
        }
        if let Some(ticker) = &self.ticker {
            if &entry.symbol != ticker {
                return false;
            }
        }
        if let Some(has_exit) = self.has_exit {
            if entry.exit.is_some() != has_exit {
                return false;
            }
        }
        if let Some(has_hyp) = self.has_hypothetical {
            if entry.hypothetical.is_some() != has_hyp {
                return false;
            }
        }
        if let Some(min_c) = self.min_confluence {
            if entry.confluence_score < min_c {
                return false;
            }
        }
        if let Some(max_c) = self.max_confluence {
            if entry.confluence_score > max_c {
                return false;
            }
        }
        if let Some(reason) = &self.exit_reason {
            match &entry.exit {
                Some(exit) if &exit.exit_reason == reason => {}
                _ => return false,
            }
        }
        true
    }
}

/// `calculateAggregates` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAggregates {
    pub total: usize,
    pub execute_count: usize,
    pub wait_count: usize,
    pub skip_count: usize,
    pub with_exit: usize,
    pub without_exit: usize,
    pub with_hypothetical: usize,
    pub without_hypothetical: usize,
    pub average_confluence: f64,
    pub net_pnl: f64,
    pub wins: usize,
    pub losses: usize,
}

/// Append-only audit ledger. `append` is the only way to create a row;
/// `update_exit`/`update_hypothetical` are the only permitted mutations, and
/// each may succeed at most once per entry. There is no `delete`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append(&self, entry: LedgerEntry) -> Result<LedgerEntry, EngineError>;

    async fn update_exit(&self, id: Uuid, exit: ExitRecord) -> Result<LedgerEntry, EngineError>;

    async fn update_hypothetical(
        &self,
        id: Uuid,
        hypothetical: HypotheticalRecord,
    ) -> Result<LedgerEntry, EngineError>;

    async fn get(&self, id: Uuid) -> Result<LedgerEntry, EngineError>;

    async fn query(&self, filter: LedgerQuery) -> Result<Vec<LedgerEntry>, EngineError>;

    async fn calculate_aggregates(&self, filter: LedgerQuery) -> Result<LedgerAggregates, EngineError>;

    /// Record one inbound webhook call for the `webhook_receipts` audit log,
    /// independent of whether it produced a ledger entry. Backends that
    /// don't maintain a separate receipt log may leave this a no-op; the
    /// in-memory and SQL backends both implement it so `/api/webhooks/recent`
    /// is never backed by ledger rows as a stand-in.
    async fn record_receipt(&self, receipt: WebhookReceipt) -> Result<(), EngineError> {
        let _ = receipt;
        Ok(())
    }

    /// Most recent receipts, newest first, capped at `limit`.
    async fn recent_receipts(&self, limit: usize) -> Result<Vec<WebhookReceipt>, EngineError> {
        let _ = limit;
        Ok(Vec::new())
    }
}

/// Shared aggregate computation over an already-filtered slice of entries,
/// used by both backends so the arithmetic lives in exactly one place.
pub(crate) fn aggregate(entries: &[LedgerEntry]) -> LedgerAggregates {
    let total = entries.len();
    let execute_count = entries.iter().filter(|e| e.decision == Action::Execute).count();
    let wait_count = entries.iter().filter(|e| e.decision == Action::Wait).count();
    let skip_count = entries.iter().filter(|e| e.decision == Action::Skip).count();
    let with_exit = entries.iter().filter(|e| e.exit.is_some()).count();
    let with_hypothetical = entries.iter().filter(|e| e.hypothetical.is_some()).count();

    let average_confluence = if total == 0 {
        0.0
    } else {
        entries.iter().map(|e| e.confluence_score).sum::<f64>() / total as f64
    };

    let net_pnl = entries
        .iter()
        .filter_map(|e| e.exit.as_ref())
        .map(|exit| exit.pnl)
        .sum();

    let wins = entries
        .iter()
        .filter_map(|e| e.exit.as_ref())
        .filter(|exit| exit.pnl > 0.0)
        .count();
    let losses = entries
        .iter()
        .filter_map(|e| e.exit.as_ref())
        .filter(|exit| exit.pnl < 0.0)
        .count();

    LedgerAggregates {
        total,
        execute_count,
        wait_count,
        skip_count,
        with_exit,
        without_exit: total - with_exit,
        with_hypothetical,
        without_hypothetical: total - with_hypothetical,
        average_confluence,
        net_pnl,
        wins,
        losses,
    }
}

/// Filter + sort without truncation, used by `calculateAggregates` which
/// must consider every matching row, not just the page a `query` call would
/// return.
pub(crate) fn filter_matching(entries: Vec<LedgerEntry>, filter: &LedgerQuery) -> Vec<LedgerEntry> {
    let mut matched: Vec<LedgerEntry> = entries.into_iter().filter(|e| filter.matches(e)).collect();
    matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    matched
}

pub(crate) fn filter_and_sort(entries: Vec<LedgerEntry>, filter: &LedgerQuery) -> Vec<LedgerEntry> {
    let mut matched = filter_matching(entries, filter);
    matched.truncate(filter.effective_limit());
    matched
}
