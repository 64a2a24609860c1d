// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-execution state surface: durable rows fronted by a short-TTL cache.
//!
//! Handlers use this for step markers and intermediate values. Writes are
//! WAL-logged by the execution context that wraps this surface, not here.

use fab_capability::{Cache, RowStore};
use fab_error::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TABLE: &str = "exec_state";
const CACHE_TTL: Duration = Duration::from_secs(30);

/// Scoped read/write access to one execution's state.
#[derive(Clone)]
pub struct StateSurface {
    rows: Arc<dyn RowStore>,
    cache: Arc<dyn Cache>,
    tenant_id: String,
    execution_id: Uuid,
}

impl StateSurface {
    /// Create a surface scoped to (tenant, execution).
    pub fn new(
        rows: Arc<dyn RowStore>,
        cache: Arc<dyn Cache>,
        tenant_id: impl Into<String>,
        execution_id: Uuid,
    ) -> Self {
        Self {
            rows,
            cache,
            tenant_id: tenant_id.into(),
            execution_id,
        }
    }

    fn row_key(&self, key: &str) -> String {
        format!("{}/{}/{}", self.tenant_id, self.execution_id, key)
    }

    /// Read a state value.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row_key = self.row_key(key);
        if let Some(cached) = self.cache.get(&row_key).await? {
            return Ok(Some(cached));
        }
        let row = self.rows.get(TABLE, &row_key).await?;
        if let Some(row) = &row {
            self.cache
                .set(&row_key, row.value.clone(), CACHE_TTL)
                .await?;
        }
        Ok(row.map(|r| r.value))
    }

    /// Write a state value. The durable row is the source of truth; the
    /// cache entry is refreshed alongside.
    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        let row_key = self.row_key(key);
        self.rows.put(TABLE, &row_key, value.clone()).await?;
        self.cache.set(&row_key, value, CACHE_TTL).await?;
        Ok(())
    }

    /// The execution this surface is scoped to.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }
}
