// SPDX-License-Identifier: MIT OR Apache-2.0
//! The materialization index: the authoritative record of every persisted
//! representation of external data.
//!
//! Rows enter only through [`MaterializationIndex::insert`], which requires
//! the governing contract id up front. Visibility decisions (contract
//! active, scope covers the reader) belong to the steward; this index
//! stores and finds rows.

use chrono::{DateTime, Utc};
use fab_capability::{Predicate, RowStore};
use fab_core::MaterializationRecord;
use fab_error::{FabricError, Result};
use std::sync::Arc;
use uuid::Uuid;

const TABLE: &str = "materializations";

/// The index of materialized representations.
#[derive(Clone)]
pub struct MaterializationIndex {
    rows: Arc<dyn RowStore>,
}

impl MaterializationIndex {
    /// Create an index over the given row store.
    pub fn new(rows: Arc<dyn RowStore>) -> Self {
        Self { rows }
    }

    fn key(tenant_id: &str, uuid: Uuid) -> String {
        format!("{tenant_id}/{uuid}")
    }

    fn decode(value: serde_json::Value) -> Result<MaterializationRecord> {
        serde_json::from_value(value)
            .map_err(|e| FabricError::internal("decode materialization row").with_source(e))
    }

    /// Insert a new index row.
    pub async fn insert(&self, record: &MaterializationRecord) -> Result<()> {
        let value = serde_json::to_value(record)
            .map_err(|e| FabricError::internal("encode materialization row").with_source(e))?;
        self.rows
            .put(TABLE, &Self::key(&record.tenant_id, record.uuid), value)
            .await?;
        Ok(())
    }

    /// Replace an existing row.
    pub async fn update(&self, record: &MaterializationRecord) -> Result<()> {
        self.insert(record).await
    }

    /// Read one row.
    pub async fn get(&self, tenant_id: &str, uuid: Uuid) -> Result<Option<MaterializationRecord>> {
        match self.rows.get(TABLE, &Self::key(tenant_id, uuid)).await? {
            Some(row) => Ok(Some(Self::decode(row.value)?)),
            None => Ok(None),
        }
    }

    /// All live (non-deleted) rows of one tenant.
    pub async fn list(&self, tenant_id: &str) -> Result<Vec<MaterializationRecord>> {
        let rows = self
            .rows
            .query(TABLE, &Predicate::new().eq("tenant_id", tenant_id))
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let record = Self::decode(row.value)?;
            if !record.deleted {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Rows whose purge deadline has passed, across all tenants.
    pub async fn due_for_purge(&self, now: DateTime<Utc>) -> Result<Vec<MaterializationRecord>> {
        let rows = self.rows.query(TABLE, &Predicate::new()).await?;
        let mut out = Vec::new();
        for row in rows {
            let record = Self::decode(row.value)?;
            let due = record
                .materialization_expires_at
                .is_some_and(|deadline| deadline <= now);
            if due && !record.deleted {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Soft-delete a row, stamping the update time.
    pub async fn mark_deleted(&self, tenant_id: &str, uuid: Uuid) -> Result<()> {
        let mut record = self
            .get(tenant_id, uuid)
            .await?
            .ok_or_else(|| FabricError::not_found(format!("materialization {uuid} not found")))?;
        record.deleted = true;
        record.updated_at = Utc::now();
        self.update(&record).await
    }
}
