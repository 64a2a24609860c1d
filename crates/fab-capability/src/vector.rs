// SPDX-License-Identifier: MIT OR Apache-2.0
//! Vector similarity behind a pluggable backend.
//!
//! Switching backends is a config change, never a business-logic change:
//! realms only see [`VectorBackend`].

use crate::row::Predicate;
use async_trait::async_trait;
use fab_error::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    /// Stored vector id.
    pub id: String,
    /// Similarity score in `[0, 1]` (cosine; L2-derived when degenerate).
    pub score: f32,
    /// Metadata stored with the vector.
    pub metadata: Value,
}

/// Narrow contract for vector storage and similarity search.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Insert or replace a vector.
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        metadata: Value,
    ) -> Result<()>;

    /// Return up to `k` hits with similarity ≥ `min_sim`, filtered by
    /// metadata predicate, ordered by descending similarity.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        filter: &Predicate,
        k: usize,
        min_sim: f32,
    ) -> Result<Vec<VectorHit>>;

    /// Remove a vector. Removing an absent id is not an error.
    async fn remove(&self, collection: &str, id: &str) -> Result<()>;
}

/// Cosine similarity, falling back to an L2-derived score when either
/// vector has zero norm.
#[must_use]
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        let dist: f32 = a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt();
        return 1.0 / (1.0 + dist);
    }
    dot / (norm_a * norm_b)
}

// ---------------------------------------------------------------------------
// MemoryVectorStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredVector {
    vector: Vec<f32>,
    metadata: Value,
}

/// In-memory [`VectorBackend`] for tests and default wiring.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    collections: Mutex<HashMap<String, HashMap<String, StoredVector>>>,
}

impl MemoryVectorStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vectors in a collection.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .expect("vector lock poisoned")
            .get(collection)
            .map_or(0, HashMap::len)
    }

    /// Whether the collection is empty or absent.
    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl VectorBackend for MemoryVectorStore {
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        metadata: Value,
    ) -> Result<()> {
        let mut collections = self.collections.lock().expect("vector lock poisoned");
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), StoredVector { vector, metadata });
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        filter: &Predicate,
        k: usize,
        min_sim: f32,
    ) -> Result<Vec<VectorHit>> {
        let collections = self.collections.lock().expect("vector lock poisoned");
        let mut hits: Vec<VectorHit> = collections
            .get(collection)
            .map(|vectors| {
                vectors
                    .iter()
                    .filter(|(_, stored)| filter.matches(&stored.metadata))
                    .map(|(id, stored)| VectorHit {
                        id: id.clone(),
                        score: similarity(query, &stored.vector),
                        metadata: stored.metadata.clone(),
                    })
                    .filter(|hit| hit.score >= min_sim)
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<()> {
        let mut collections = self.collections.lock().expect("vector lock poisoned");
        if let Some(vectors) = collections.get_mut(collection) {
            vectors.remove(id);
        }
        Ok(())
    }
}
