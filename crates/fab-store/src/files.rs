// SPDX-License-Identifier: MIT OR Apache-2.0
//! File storage: blob bytes plus a row index.
//!
//! Uploaded bytes land under a temp path scoped to (tenant, user) until a
//! materialization is authorized; the materialization index (not this
//! module) decides visibility.

use fab_capability::{BlobRef, BlobStore, PutOptions};
use fab_error::Result;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of storing bytes.
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Reference to the stored bytes.
    pub blob_ref: BlobRef,
    /// sha-256 of the content.
    pub content_hash: String,
    /// Size in bytes.
    pub size: u64,
}

/// Blob-backed file storage.
#[derive(Clone)]
pub struct FileStorage {
    blobs: Arc<dyn BlobStore>,
}

impl FileStorage {
    /// Create file storage over the given blob store.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Temp path for a pending upload, scoped to (tenant, user).
    #[must_use]
    pub fn temp_key(tenant_id: &str, user_id: &str, file_id: Uuid) -> String {
        format!("tmp/{tenant_id}/{user_id}/{file_id}")
    }

    /// Store pending upload bytes under the tenant/user temp path.
    pub async fn put_temp(
        &self,
        tenant_id: &str,
        user_id: &str,
        file_id: Uuid,
        bytes: Vec<u8>,
    ) -> Result<StoredFile> {
        let size = bytes.len() as u64;
        let key = Self::temp_key(tenant_id, user_id, file_id);
        let blob_ref = self.blobs.put(&key, bytes, PutOptions::default()).await?;
        Ok(StoredFile {
            content_hash: blob_ref.content_hash.clone(),
            blob_ref,
            size,
        })
    }

    /// Store a derived representation (parsed text, extractions) under a
    /// kind-scoped path.
    pub async fn put_derived(
        &self,
        tenant_id: &str,
        kind: &str,
        file_id: Uuid,
        bytes: Vec<u8>,
    ) -> Result<StoredFile> {
        let size = bytes.len() as u64;
        let key = format!("derived/{kind}/{tenant_id}/{file_id}");
        let blob_ref = self.blobs.put(&key, bytes, PutOptions::default()).await?;
        Ok(StoredFile {
            content_hash: blob_ref.content_hash.clone(),
            blob_ref,
            size,
        })
    }

    /// Read stored bytes.
    pub async fn read(&self, blob_ref: &BlobRef) -> Result<Vec<u8>> {
        self.blobs.get(blob_ref).await
    }

    /// Delete stored bytes (idempotent).
    pub async fn delete(&self, blob_ref: &BlobRef) -> Result<()> {
        self.blobs.delete(blob_ref).await
    }

    /// Produce a time-limited read URL.
    pub async fn presign_read(&self, blob_ref: &BlobRef, ttl: Duration) -> Result<String> {
        self.blobs.presign_read(blob_ref, ttl).await
    }
}
