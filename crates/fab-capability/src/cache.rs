// SPDX-License-Identifier: MIT OR Apache-2.0
//! Short-TTL cache. Never a source of truth.

use async_trait::async_trait;
use fab_error::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Narrow contract for a TTL cache.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Read a value; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value for at most `ttl`.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Drop a value. Dropping an absent key is not an error.
    async fn invalidate(&self, key: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

/// In-memory [`Cache`] with lazy expiry.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, Value)>>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some((deadline, value)) if *deadline > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(key.to_string(), (Instant::now() + ttl, value));
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.remove(key);
        Ok(())
    }
}
