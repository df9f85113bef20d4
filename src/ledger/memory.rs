// =============================================================================
// In-memory Ledger backend
// =============================================================================
//
// A `parking_lot::RwLock<Vec<LedgerEntry>>` plus a `HashMap<Uuid, usize>`
// index, kept the way `AppState::recent_decisions` is kept — just unbounded
// and append-only rather than ring-buffer-capped, since an audit ledger may
// never drop a row.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::model::{ExitRecord, HypotheticalRecord, LedgerEntry, WebhookReceipt};
use crate::types::Action;

use super::{aggregate, filter_and_sort, filter_matching, LedgerAggregates, LedgerQuery, LedgerStore};

#[derive(Default)]
pub struct InMemoryLedger {
    entries: RwLock<Vec<LedgerEntry>>,
    index: RwLock<HashMap<Uuid, usize>>,
    receipts: RwLock<Vec<WebhookReceipt>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn append(&self, entry: LedgerEntry) -> Result<LedgerEntry, EngineError> {
        let mut entries = self.entries.write();
        let mut index = self.index.write();
        let position = entries.len();
        index.insert(entry.id, position);
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn update_exit(&self, id: Uuid, exit: ExitRecord) -> Result<LedgerEntry, EngineError> {
        let index = self.index.read();
        let position = *index
            .get(&id)
            .ok_or_else(|| EngineError::EntryNotFound(id.to_string()))?;
        drop(index);

        let mut entries = self.entries.write();
        let entry = &mut entries[position];
        if entry.decision != Action::Execute {
            return Err(EngineError::InvalidUpdate(
                "exit may only be set on an EXECUTE entry".to_string(),
            ));
        }
        if entry.exit.is_some() {
            return Err(EngineError::OverwriteNotAllowed(
                "exit already set for this entry".to_string(),
            ));
        }
        entry.exit = Some(exit);
        Ok(entry.clone())
    }

    async fn update_hypothetical(
        &self,
        id: Uuid,
        hypothetical: HypotheticalRecord,
    ) -> Result<LedgerEntry, EngineError> {
        let index = self.index.read();
        let position = *index
            .get(&id)
            .ok_or_else(|| EngineError::EntryNotFound(id.to_string()))?;
        drop(index);

        let mut entries = self.entries.write();
        let entry = &mut entries[position];
        if entry.decision == Action::Execute {
            return Err(EngineError::InvalidUpdate(
                "hypothetical may only be set on a non-EXECUTE entry".to_string(),
            ));
        }
        if entry.hypothetical.is_some() {
            return Err(EngineError::OverwriteNotAllowed(
                "hypothetical already set for this entry".to_string(),
            ));
        }
        entry.hypothetical = Some(hypothetical);
        Ok(entry.clone())
    }

    async fn get(&self, id: Uuid) -> Result<LedgerEntry, EngineError> {
        let index = self.index.read();
        let position = *index
            .get(&id)
            .ok_or_else(|| EngineError::EntryNotFound(id.to_string()))?;
        Ok(self.entries.read()[position].clone())
    }

    async fn query(&self, filter: LedgerQuery) -> Result<Vec<LedgerEntry>, EngineError> {
        let snapshot = self.entries.read().clone();
        Ok(filter_and_sort(snapshot, &filter))
    }

    async fn calculate_aggregates(&self, filter: LedgerQuery) -> Result<LedgerAggregates, EngineError> {
        let snapshot = self.entries.read().clone();
        let matched = filter_matching(snapshot, &filter);
        Ok(aggregate(&matched))
    }

    async fn record_receipt(&self, receipt: WebhookReceipt) -> Result<(), EngineError> {
        self.receipts.write().push(receipt);
        Ok(())
    }

    async fn recent_receipts(&self, limit: usize) -> Result<Vec<WebhookReceipt>, EngineError> {
        let mut receipts = self.receipts.read().clone();
        receipts.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        receipts.truncate(limit.min(super::MAX_QUERY_LIMIT));
        Ok(receipts)
    }
}
