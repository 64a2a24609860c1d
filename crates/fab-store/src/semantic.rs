// SPDX-License-Identifier: MIT OR Apache-2.0
//! Semantic store: tenant-scoped vector storage over a pluggable backend.

use fab_capability::{Predicate, VectorBackend, VectorHit};
use fab_error::Result;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Tenant-scoped semantic storage.
///
/// Every stored vector carries its tenant in metadata and every search
/// injects the tenant filter, so a backend shared across tenants still
/// never leaks across them.
#[derive(Clone)]
pub struct SemanticStore {
    backend: Arc<dyn VectorBackend>,
}

impl SemanticStore {
    /// Create a store over the given backend.
    pub fn new(backend: Arc<dyn VectorBackend>) -> Self {
        Self { backend }
    }

    /// Store an embedding with its tenant and source stamped into metadata.
    pub async fn store_embedding(
        &self,
        tenant_id: &str,
        collection: &str,
        embedding_id: Uuid,
        vector: Vec<f32>,
        mut metadata: Value,
    ) -> Result<()> {
        if let Some(obj) = metadata.as_object_mut() {
            obj.insert("tenant_id".into(), Value::String(tenant_id.to_string()));
        }
        self.backend
            .upsert(collection, &embedding_id.to_string(), vector, metadata)
            .await
    }

    /// Similarity search within one tenant.
    pub async fn vector_search(
        &self,
        tenant_id: &str,
        collection: &str,
        query: &[f32],
        filter: Predicate,
        k: usize,
        min_sim: f32,
    ) -> Result<Vec<VectorHit>> {
        let scoped = filter.eq("tenant_id", tenant_id);
        self.backend
            .search(collection, query, &scoped, k, min_sim)
            .await
    }

    /// Remove an embedding.
    pub async fn remove(&self, collection: &str, embedding_id: Uuid) -> Result<()> {
        self.backend
            .remove(collection, &embedding_id.to_string())
            .await
    }
}
