// SPDX-License-Identifier: MIT OR Apache-2.0
//! Platform DNA registry store.
//!
//! Rows are versioned and immutable. Promoting a new version writes the
//! new row and flips the prior current row's flag in one transactional
//! batch, so at most one row per identifier is ever current.

use chrono::Utc;
use fab_capability::{Predicate, RowOp, RowStore};
use fab_core::{DnaRegistry, DnaRegistryEntry};
use fab_error::{FabricError, Result};
use std::sync::Arc;

const TABLE: &str = "platform_dna";

fn registry_name(registry: DnaRegistry) -> &'static str {
    match registry {
        DnaRegistry::Solution => "solution",
        DnaRegistry::Intent => "intent",
        DnaRegistry::Realm => "realm",
    }
}

/// Storage for the solution / intent / realm registries.
#[derive(Clone)]
pub struct DnaRegistryStore {
    rows: Arc<dyn RowStore>,
}

impl DnaRegistryStore {
    /// Create a store over the given row store.
    pub fn new(rows: Arc<dyn RowStore>) -> Self {
        Self { rows }
    }

    fn key(registry: DnaRegistry, identifier: &str, version: u32) -> String {
        format!("{}/{identifier}/v{version}", registry_name(registry))
    }

    fn decode(value: serde_json::Value) -> Result<DnaRegistryEntry> {
        serde_json::from_value(value)
            .map_err(|e| FabricError::internal("decode registry row").with_source(e))
    }

    fn encode(entry: &DnaRegistryEntry) -> Result<serde_json::Value> {
        serde_json::to_value(entry)
            .map_err(|e| FabricError::internal("encode registry row").with_source(e))
    }

    /// Promote a definition into a registry, assigning the next version
    /// and flipping the prior current row atomically.
    pub async fn promote(
        &self,
        registry: DnaRegistry,
        identifier: &str,
        definition: serde_json::Value,
        source_artifact_id: &str,
        promoted_by: &str,
    ) -> Result<DnaRegistryEntry> {
        let prior = self.current(registry, identifier).await?;
        let version = prior.as_ref().map_or(1, |p| p.version + 1);

        let entry = DnaRegistryEntry {
            registry,
            identifier: identifier.to_string(),
            version,
            definition,
            source_artifact_id: source_artifact_id.to_string(),
            promoted_by: promoted_by.to_string(),
            is_current_version: true,
            promoted_at: Utc::now(),
        };

        let mut ops = Vec::new();
        if let Some(mut prior) = prior {
            prior.is_current_version = false;
            ops.push(RowOp::Put {
                table: TABLE.into(),
                key: Self::key(registry, identifier, prior.version),
                value: Self::encode(&prior)?,
            });
        }
        ops.push(RowOp::Put {
            table: TABLE.into(),
            key: Self::key(registry, identifier, version),
            value: Self::encode(&entry)?,
        });
        self.rows.apply(ops).await?;
        Ok(entry)
    }

    /// The current version of an identifier, if any.
    pub async fn current(
        &self,
        registry: DnaRegistry,
        identifier: &str,
    ) -> Result<Option<DnaRegistryEntry>> {
        let rows = self
            .rows
            .query(
                TABLE,
                &Predicate::new()
                    .eq("registry", registry_name(registry))
                    .eq("identifier", identifier)
                    .eq("is_current_version", true),
            )
            .await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(Self::decode(row.value)?)),
            None => Ok(None),
        }
    }

    /// Every version of an identifier, oldest first.
    pub async fn versions(
        &self,
        registry: DnaRegistry,
        identifier: &str,
    ) -> Result<Vec<DnaRegistryEntry>> {
        let rows = self
            .rows
            .query(
                TABLE,
                &Predicate::new()
                    .eq("registry", registry_name(registry))
                    .eq("identifier", identifier),
            )
            .await?;
        let mut entries: Vec<DnaRegistryEntry> = rows
            .into_iter()
            .map(|r| Self::decode(r.value))
            .collect::<Result<_>>()?;
        entries.sort_by_key(|e| e.version);
        Ok(entries)
    }
}
