// =============================================================================
// SQL Ledger backend
// =============================================================================
//
// Durable Postgres-backed implementation of `LedgerStore`. Each entry is
// stored once as a JSONB payload (the whole `LedgerEntry`, matching the
// in-memory backend's representation byte-for-byte) alongside the handful
// of columns the query surface pushes down to SQL: `decision`, `timeframe`,
// `symbol`, and `created_at`. Filters that don't map cleanly onto a column
// (quality, trade-type bucket, confluence bounds, exit reason, ...) are
// applied in Rust against the deserialized payload using the same
// `LedgerQuery::matches` predicate the in-memory backend uses, so both
// backends agree on every filter's semantics by construction.
//
// `sqlx::query`/`query_as` (not the `query!` compile-time-checked macros)
// are used throughout since this engine does not assume a live database at
// build time.
// =============================================================================

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::model::{ExitRecord, HypotheticalRecord, LedgerEntry, WebhookReceipt};
use crate::types::Action;

use super::{aggregate, filter_and_sort, filter_matching, LedgerAggregates, LedgerQuery, LedgerStore};

pub struct SqlLedger {
    pool: PgPool,
}

impl SqlLedger {
    /// Connect to `database_url` and ensure the ledger schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| EngineError::DatabaseError(format!("connect: {e}")))?;

        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn init_schema(&self) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                id UUID PRIMARY KEY,
                created_at BIGINT NOT NULL,
                decision TEXT NOT NULL,
                timeframe TEXT,
                symbol TEXT NOT NULL,
                payload JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(format!("create ledger_entries: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS ledger_entries_created_at_idx ON ledger_entries (created_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::DatabaseError(format!("create created_at index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS ledger_entries_decision_idx ON ledger_entries (decision)")
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::DatabaseError(format!("create decision index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ledger_entries_decision_timeframe_idx ON ledger_entries (decision, timeframe)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(format!("create decision/timeframe index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_receipts (
                id UUID PRIMARY KEY,
                received_at BIGINT NOT NULL,
                source TEXT NOT NULL,
                signature_valid BOOLEAN NOT NULL,
                redacted_body JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(format!("create webhook_receipts: {e}")))?;

        Ok(())
    }

    async fn fetch_payload(&self, id: Uuid) -> Result<LedgerEntry, EngineError> {
        let row = sqlx::query("SELECT payload FROM ledger_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::DatabaseError(format!("select by id: {e}")))?
            .ok_or_else(|| EngineError::EntryNotFound(id.to_string()))?;

        let payload: serde_json::Value = row
            .try_get("payload")
            .map_err(|e| EngineError::DatabaseError(format!("decode payload: {e}")))?;
        serde_json::from_value(payload)
            .map_err(|e| EngineError::DatabaseError(format!("deserialize entry: {e}")))
    }

    async fn overwrite_payload(&self, entry: &LedgerEntry) -> Result<(), EngineError> {
        let payload = serde_json::to_value(entry)
            .map_err(|e| EngineError::DatabaseError(format!("serialize entry: {e}")))?;
        sqlx::query("UPDATE ledger_entries SET payload = $1 WHERE id = $2")
            .bind(payload)
            .bind(entry.id)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::DatabaseError(format!("update payload: {e}")))?;
        Ok(())
    }

    /// Fetch the superset of rows SQL can push down (decision, timeframe,
    /// symbol, created_at range), newest first; the caller applies the
    /// remaining `LedgerQuery` fields and the final limit in Rust.
    async fn fetch_pushdown_superset(&self, filter: &LedgerQuery) -> Result<Vec<LedgerEntry>, EngineError> {
        let mut sql = String::from("SELECT payload FROM ledger_entries WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(decision) = filter.decision {
            sql.push_str(&format!(" AND decision = ${}", binds.len() + 1));
            binds.push(decision.to_string());
        }
        if let Some(timeframe) = &filter.timeframe {
            sql.push_str(&format!(" AND timeframe = ${}", binds.len() + 1));
            binds.push(timeframe.clone());
        }
        if let Some(ticker) = &filter.ticker {
            sql.push_str(&format!(" AND symbol = ${}", binds.len() + 1));
            binds.push(ticker.clone());
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::DatabaseError(format!("query ledger_entries: {e}")))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: serde_json::Value = row
                .try_get("payload")
                .map_err(|e| EngineError::DatabaseError(format!("decode payload: {e}")))?;
            let entry: LedgerEntry = serde_json::from_value(payload)
                .map_err(|e| EngineError::DatabaseError(format!("deserialize entry: {e}")))?;
            if let Some(from) = filter.from {
                if entry.created_at < from {
                    continue;
                }
            }
            if let Some(to) = filter.to {
                if entry.created_at > to {
                    continue;
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[async_trait]
impl LedgerStore for SqlLedger {
    async fn append(&self, entry: LedgerEntry) -> Result<LedgerEntry, EngineError> {
        let payload = serde_json::to_value(&entry)
            .map_err(|e| EngineError::DatabaseError(format!("serialize entry: {e}")))?;

        sqlx::query(
            "INSERT INTO ledger_entries (id, created_at, decision, timeframe, symbol, payload) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.id)
        .bind(entry.created_at)
        .bind(entry.decision.to_string())
        .bind(&entry.timeframe)
        .bind(&entry.symbol)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(format!("insert ledger_entry: {e}")))?;

        Ok(entry)
    }

    async fn update_exit(&self, id: Uuid, exit: ExitRecord) -> Result<LedgerEntry, EngineError> {
        let mut entry = self.fetch_payload(id).await?;
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
        self.overwrite_payload(&entry).await?;
        Ok(entry)
    }

    async fn update_hypothetical(
        &self,
        id: Uuid,
        hypothetical: HypotheticalRecord,
    ) -> Result<LedgerEntry, EngineError> {
        let mut entry = self.fetch_payload(id).await?;
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
        self.overwrite_payload(&entry).await?;
        Ok(entry)
    }

    async fn get(&self, id: Uuid) -> Result<LedgerEntry, EngineError> {
        self.fetch_payload(id).await
    }

    async fn query(&self, filter: LedgerQuery) -> Result<Vec<LedgerEntry>, EngineError> {
        let superset = self.fetch_pushdown_superset(&filter).await?;
        Ok(filter_and_sort(superset, &filter))
    }

    async fn calculate_aggregates(&self, filter: LedgerQuery) -> Result<LedgerAggregates, EngineError> {
        let superset = self.fetch_pushdown_superset(&filter).await?;
        let matched = filter_matching(superset, &filter);
        Ok(aggregate(&matched))
    }

    /// Record an inbound webhook for the audit log independently of whether
    /// it produced a ledger entry (e.g. a context-update-only webhook).
    async fn record_receipt(&self, receipt: WebhookReceipt) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO webhook_receipts (id, received_at, source, signature_valid, redacted_body) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(receipt.id)
        .bind(receipt.received_at)
        .bind(&receipt.source)
        .bind(receipt.signature_valid)
        .bind(&receipt.redacted_body)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(format!("insert webhook_receipt: {e}")))?;
        Ok(())
    }

    async fn recent_receipts(&self, limit: usize) -> Result<Vec<WebhookReceipt>, EngineError> {
        let capped = (limit.min(super::MAX_QUERY_LIMIT)) as i64;
        let rows = sqlx::query(
            "SELECT id, received_at, source, signature_valid, redacted_body FROM webhook_receipts ORDER BY received_at DESC LIMIT $1",
        )
        .bind(capped)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(format!("query webhook_receipts: {e}")))?;

        rows.into_iter()
            .map(|row| {
                Ok(WebhookReceipt {
                    id: row
                        .try_get("id")
                        .map_err(|e| EngineError::DatabaseError(format!("decode receipt id: {e}")))?,
                    received_at: row
                        .try_get("received_at")
                        .map_err(|e| EngineError::DatabaseError(format!("decode received_at: {e}")))?,
                    source: row
                        .try_get("source")
                        .map_err(|e| EngineError::DatabaseError(format!("decode source: {e}")))?,
                    signature_valid: row
                        .try_get("signature_valid")
                        .map_err(|e| EngineError::DatabaseError(format!("decode signature_valid: {e}")))?,
                    redacted_body: row
                        .try_get("redacted_body")
                        .map_err(|e| EngineError::DatabaseError(format!("decode redacted_body: {e}")))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `Action`'s `Display` impl is what gets persisted into the `decision`
    /// column; this pins the wire format so a future rename of the enum's
    /// `Display` output can't silently desync stored rows from query filters.
    #[test]
    fn decision_display_matches_stored_column_format() {
        assert_eq!(Action::Execute.to_string(), "EXECUTE");
        assert_eq!(Action::Wait.to_string(), "WAIT");
        assert_eq!(Action::Skip.to_string(), "SKIP");
    }
}
