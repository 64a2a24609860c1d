// SPDX-License-Identifier: MIT OR Apache-2.0
//! Blob storage: opaque bytes behind opaque references.

use async_trait::async_trait;
use fab_error::{ErrorCode, FabricError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Opaque reference to stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    /// Store key the bytes live under.
    pub key: String,
    /// sha-256 hex digest of the content.
    pub content_hash: String,
}

/// Options for [`BlobStore::put`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Derive the storage key from the content hash, making `put`
    /// idempotent: the same bytes always land on the same reference.
    pub content_addressed: bool,
}

/// Narrow contract for blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key` (or a content-derived key) and return a
    /// reference.
    async fn put(&self, key: &str, bytes: Vec<u8>, opts: PutOptions) -> Result<BlobRef>;

    /// Fetch the bytes behind a reference.
    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>>;

    /// Delete the bytes behind a reference. Deleting an absent blob is
    /// not an error.
    async fn delete(&self, blob: &BlobRef) -> Result<()>;

    /// Produce a time-limited read URL for the reference.
    async fn presign_read(&self, blob: &BlobRef, ttl: Duration) -> Result<String>;
}

/// Hex sha-256 of a byte slice.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-memory [`BlobStore`] for tests and default wiring.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob lock poisoned").len()
    }

    /// Whether the store holds no blobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, opts: PutOptions) -> Result<BlobRef> {
        let hash = content_hash(&bytes);
        let key = if opts.content_addressed {
            format!("cas/{hash}")
        } else {
            key.to_string()
        };
        let mut blobs = self.blobs.lock().expect("blob lock poisoned");
        blobs.insert(key.clone(), bytes);
        Ok(BlobRef {
            key,
            content_hash: hash,
        })
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>> {
        let blobs = self.blobs.lock().expect("blob lock poisoned");
        blobs
            .get(&blob.key)
            .cloned()
            .ok_or_else(|| FabricError::not_found(format!("blob '{}' not found", blob.key)))
    }

    async fn delete(&self, blob: &BlobRef) -> Result<()> {
        let mut blobs = self.blobs.lock().expect("blob lock poisoned");
        blobs.remove(&blob.key);
        Ok(())
    }

    async fn presign_read(&self, blob: &BlobRef, ttl: Duration) -> Result<String> {
        let blobs = self.blobs.lock().expect("blob lock poisoned");
        if !blobs.contains_key(&blob.key) {
            return Err(FabricError::new(
                ErrorCode::NotFound,
                format!("blob '{}' not found", blob.key),
            ));
        }
        Ok(format!(
            "memory://{}?expires_in={}",
            blob.key,
            ttl.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = MemoryBlobStore::new();
        let blob = store
            .put("tmp/acme/f-1", b"hello".to_vec(), PutOptions::default())
            .await
            .unwrap();
        assert_eq!(blob.key, "tmp/acme/f-1");
        let bytes = store.get(&blob).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn content_addressed_put_is_idempotent() {
        let store = MemoryBlobStore::new();
        let opts = PutOptions {
            content_addressed: true,
        };
        let a = store.put("ignored", b"same".to_vec(), opts).await.unwrap();
        let b = store.put("other", b"same".to_vec(), opts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert!(a.key.starts_with("cas/"));
    }

    #[tokio::test]
    async fn get_missing_blob_is_not_found() {
        let store = MemoryBlobStore::new();
        let blob = BlobRef {
            key: "gone".into(),
            content_hash: String::new(),
        };
        let err = store.get(&blob).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryBlobStore::new();
        let blob = store
            .put("k", b"x".to_vec(), PutOptions::default())
            .await
            .unwrap();
        store.delete(&blob).await.unwrap();
        store.delete(&blob).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn presign_embeds_ttl() {
        let store = MemoryBlobStore::new();
        let blob = store
            .put("k", b"x".to_vec(), PutOptions::default())
            .await
            .unwrap();
        let url = store
            .presign_read(&blob, Duration::from_secs(300))
            .await
            .unwrap();
        assert!(url.contains("expires_in=300"));
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
        assert_eq!(content_hash(b"hello").len(), 64);
    }
}
