// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tenant-scoped row views.
//!
//! Tenant isolation is enforced at the predicate layer: a scoped view
//! injects the tenant condition into every query and refuses to return a
//! row whose `tenant_id` disagrees with its scope, no matter how the row
//! was addressed.

use fab_capability::{Predicate, Row, RowStore};
use fab_error::{FabricError, Result};
use serde_json::Value;
use std::sync::Arc;

/// A row-store view restricted to one tenant.
#[derive(Clone)]
pub struct TenantScopedRows {
    rows: Arc<dyn RowStore>,
    tenant_id: String,
}

impl TenantScopedRows {
    /// Create a view scoped to the given tenant.
    pub fn new(rows: Arc<dyn RowStore>, tenant_id: impl Into<String>) -> Self {
        Self {
            rows,
            tenant_id: tenant_id.into(),
        }
    }

    /// The tenant this view is scoped to.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn owns(&self, value: &Value) -> bool {
        value.get("tenant_id").and_then(Value::as_str) == Some(self.tenant_id.as_str())
    }

    /// Read a row by key; rows of other tenants read as absent.
    pub async fn get(&self, table: &str, key: &str) -> Result<Option<Row>> {
        let row = self.rows.get(table, key).await?;
        Ok(row.filter(|r| self.owns(&r.value)))
    }

    /// Query with the tenant condition injected.
    pub async fn query(&self, table: &str, predicate: Predicate) -> Result<Vec<Row>> {
        let scoped = predicate.eq("tenant_id", self.tenant_id.clone());
        self.rows.query(table, &scoped).await
    }

    /// Write a row; the value must carry this view's tenant.
    ///
    /// # Errors
    ///
    /// `denied_by_policy` when the value's `tenant_id` disagrees.
    pub async fn put(&self, table: &str, key: &str, value: Value) -> Result<u64> {
        if !self.owns(&value) {
            return Err(FabricError::denied(
                "row tenant does not match the scoped view",
            ));
        }
        self.rows.put(table, key, value).await
    }

    /// Guarded write; the value must carry this view's tenant.
    ///
    /// # Errors
    ///
    /// `denied_by_policy` on a tenant mismatch, `integrity_violation` on
    /// a revision conflict.
    pub async fn compare_and_swap(
        &self,
        table: &str,
        key: &str,
        expected_rev: u64,
        value: Value,
    ) -> Result<u64> {
        if !self.owns(&value) {
            return Err(FabricError::denied(
                "row tenant does not match the scoped view",
            ));
        }
        self.rows
            .compare_and_swap(table, key, expected_rev, value)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fab_capability::MemoryRowStore;
    use serde_json::json;

    async fn seeded() -> (Arc<MemoryRowStore>, TenantScopedRows) {
        let rows = Arc::new(MemoryRowStore::new());
        rows.put("t", "a", json!({"tenant_id": "acme", "v": 1}))
            .await
            .unwrap();
        rows.put("t", "g", json!({"tenant_id": "globex", "v": 2}))
            .await
            .unwrap();
        let scoped = TenantScopedRows::new(rows.clone(), "acme");
        (rows, scoped)
    }

    #[tokio::test]
    async fn query_never_returns_foreign_rows() {
        let (_, scoped) = seeded().await;
        let rows = scoped.query("t", Predicate::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value["tenant_id"], "acme");
    }

    #[tokio::test]
    async fn get_by_key_hides_foreign_rows() {
        let (_, scoped) = seeded().await;
        // Direct addressing of another tenant's key reads as absent.
        assert!(scoped.get("t", "g").await.unwrap().is_none());
        assert!(scoped.get("t", "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn put_rejects_foreign_values() {
        let (_, scoped) = seeded().await;
        let err = scoped
            .put("t", "x", json!({"tenant_id": "globex"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, fab_error::ErrorCode::DeniedByPolicy);
    }

    #[tokio::test]
    async fn compare_and_swap_guards_both_tenant_and_revision() {
        let (_, scoped) = seeded().await;

        let err = scoped
            .compare_and_swap("t", "x", 0, json!({"tenant_id": "globex"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, fab_error::ErrorCode::DeniedByPolicy);

        scoped
            .compare_and_swap("t", "x", 0, json!({"tenant_id": "acme", "v": 1}))
            .await
            .unwrap();
        let err = scoped
            .compare_and_swap("t", "x", 0, json!({"tenant_id": "acme", "v": 2}))
            .await
            .unwrap_err();
        assert_eq!(err.code, fab_error::ErrorCode::IntegrityViolation);
    }
}
