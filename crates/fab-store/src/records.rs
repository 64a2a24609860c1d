// SPDX-License-Identifier: MIT OR Apache-2.0
//! Record-of-fact store.
//!
//! Records persist independently of their sources. Purging working
//! material stamps `source_expired_at` on derived records; it never
//! deletes them.

use chrono::{DateTime, Utc};
use fab_capability::{Predicate, RowStore};
use fab_core::RecordOfFact;
use fab_error::{FabricError, Result};
use std::sync::Arc;
use uuid::Uuid;

const TABLE: &str = "records_of_fact";

/// Storage for records of fact.
#[derive(Clone)]
pub struct RecordOfFactStore {
    rows: Arc<dyn RowStore>,
}

impl RecordOfFactStore {
    /// Create a store over the given row store.
    pub fn new(rows: Arc<dyn RowStore>) -> Self {
        Self { rows }
    }

    fn key(tenant_id: &str, record_id: Uuid) -> String {
        format!("{tenant_id}/{record_id}")
    }

    fn decode(value: serde_json::Value) -> Result<RecordOfFact> {
        serde_json::from_value(value)
            .map_err(|e| FabricError::internal("decode record of fact").with_source(e))
    }

    /// Insert a record.
    pub async fn insert(&self, record: &RecordOfFact) -> Result<()> {
        let value = serde_json::to_value(record)
            .map_err(|e| FabricError::internal("encode record of fact").with_source(e))?;
        self.rows
            .put(TABLE, &Self::key(&record.tenant_id, record.record_id), value)
            .await?;
        Ok(())
    }

    /// Read one record.
    pub async fn get(&self, tenant_id: &str, record_id: Uuid) -> Result<Option<RecordOfFact>> {
        match self.rows.get(TABLE, &Self::key(tenant_id, record_id)).await? {
            Some(row) => Ok(Some(Self::decode(row.value)?)),
            None => Ok(None),
        }
    }

    /// All of a tenant's records.
    pub async fn list(&self, tenant_id: &str) -> Result<Vec<RecordOfFact>> {
        let rows = self
            .rows
            .query(TABLE, &Predicate::new().eq("tenant_id", tenant_id))
            .await?;
        rows.into_iter().map(|r| Self::decode(r.value)).collect()
    }

    /// Records derived from one source file.
    pub async fn list_by_source_file(
        &self,
        tenant_id: &str,
        source_file_id: Uuid,
    ) -> Result<Vec<RecordOfFact>> {
        let rows = self
            .rows
            .query(
                TABLE,
                &Predicate::new()
                    .eq("tenant_id", tenant_id)
                    .eq("source_file_id", source_file_id.to_string()),
            )
            .await?;
        rows.into_iter().map(|r| Self::decode(r.value)).collect()
    }

    /// Stamp `source_expired_at` on every record derived from the given
    /// source file. Returns how many records were stamped. The records
    /// themselves persist.
    pub async fn mark_source_expired(
        &self,
        tenant_id: &str,
        source_file_id: Uuid,
        expired_at: DateTime<Utc>,
    ) -> Result<usize> {
        let affected = self.list_by_source_file(tenant_id, source_file_id).await?;
        let count = affected.len();
        for mut record in affected {
            record.source_expired_at = Some(expired_at);
            self.insert(&record).await?;
        }
        Ok(count)
    }
}
