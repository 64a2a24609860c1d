// SPDX-License-Identifier: MIT OR Apache-2.0
//! Row storage: versioned JSON rows with predicate queries, transactional
//! batches, and monotonic append streams.
//!
//! The append streams are what the write-ahead log rides on: per-stream
//! sequences start at 1 and never repeat or skip.

use async_trait::async_trait;
use fab_error::{ErrorCode, FabricError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// A stored row: key, optimistic-concurrency revision, and JSON value.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Row key, unique within its table.
    pub key: String,
    /// Revision, bumped on every write. Used for compare-and-swap.
    pub rev: u64,
    /// The row value.
    pub value: Value,
}

/// One condition of a [`Predicate`].
///
/// Field paths are dot-separated into the row value
/// (`"semantic_descriptor.file_id"`).
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals value.
    Eq(String, Value),
    /// Array field contains value.
    Contains(String, Value),
    /// Field is less than or equal to value (numbers and strings).
    LtEq(String, Value),
}

/// Conjunction of [`Condition`]s. An empty predicate matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    /// All conditions must hold.
    pub conditions: Vec<Condition>,
}

impl Predicate {
    /// An empty predicate (matches everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(field.into(), value.into()));
        self
    }

    /// Add an array-contains condition.
    #[must_use]
    pub fn contains(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Contains(field.into(), value.into()));
        self
    }

    /// Add a less-than-or-equal condition.
    #[must_use]
    pub fn lt_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::LtEq(field.into(), value.into()));
        self
    }

    /// Evaluate against a row value.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        self.conditions.iter().all(|c| c.matches(value))
    }
}

impl Condition {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Eq(path, expected) => lookup(value, path) == Some(expected),
            Self::Contains(path, needle) => lookup(value, path)
                .and_then(Value::as_array)
                .is_some_and(|arr| arr.contains(needle)),
            Self::LtEq(path, bound) => match (lookup(value, path), bound) {
                (Some(Value::Number(actual)), Value::Number(bound)) => {
                    match (actual.as_f64(), bound.as_f64()) {
                        (Some(a), Some(b)) => a <= b,
                        _ => false,
                    }
                }
                (Some(Value::String(actual)), Value::String(bound)) => {
                    actual.as_str() <= bound.as_str()
                }
                _ => false,
            },
        }
    }
}

/// Resolve a dot-separated path into a JSON value.
fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// One operation of a transactional [`RowStore::apply`] batch.
#[derive(Debug, Clone)]
pub enum RowOp {
    /// Unconditional write.
    Put {
        /// Target table.
        table: String,
        /// Row key.
        key: String,
        /// New value.
        value: Value,
    },
    /// Write guarded by the expected revision.
    CasPut {
        /// Target table.
        table: String,
        /// Row key.
        key: String,
        /// Revision the row must currently have (0 = must not exist).
        expected_rev: u64,
        /// New value.
        value: Value,
    },
    /// Delete a row (absent rows are fine).
    Delete {
        /// Target table.
        table: String,
        /// Row key.
        key: String,
    },
}

/// Narrow contract for transactional row storage.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Write a row, returning its new revision.
    async fn put(&self, table: &str, key: &str, value: Value) -> Result<u64>;

    /// Read a row.
    async fn get(&self, table: &str, key: &str) -> Result<Option<Row>>;

    /// Write a row only if its current revision matches `expected_rev`
    /// (0 = the row must not exist). Returns the new revision.
    ///
    /// # Errors
    ///
    /// `integrity_violation` on revision mismatch.
    async fn compare_and_swap(
        &self,
        table: &str,
        key: &str,
        expected_rev: u64,
        value: Value,
    ) -> Result<u64>;

    /// Delete a row. Deleting an absent row is not an error.
    async fn delete(&self, table: &str, key: &str) -> Result<()>;

    /// Return every row of `table` matching the predicate.
    async fn query(&self, table: &str, predicate: &Predicate) -> Result<Vec<Row>>;

    /// Apply a batch of operations atomically: either every operation
    /// takes effect or none does.
    ///
    /// # Errors
    ///
    /// `integrity_violation` if any CAS guard fails; no operation is applied.
    async fn apply(&self, ops: Vec<RowOp>) -> Result<()>;

    /// Append a payload to a monotonic stream, returning its 1-based
    /// sequence number.
    async fn append_seq(&self, stream: &str, payload: Value) -> Result<u64>;

    /// Read stream entries with `seq >= from_seq`, in order.
    async fn read_seq(&self, stream: &str, from_seq: u64) -> Result<Vec<(u64, Value)>>;
}

// ---------------------------------------------------------------------------
// MemoryRowStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, BTreeMap<String, (u64, Value)>>,
    streams: HashMap<String, Vec<Value>>,
}

/// In-memory [`RowStore`] for tests and default wiring.
///
/// A single mutex serializes every operation, which makes `apply`
/// trivially atomic and stream appends trivially monotonic.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    inner: Mutex<Inner>,
}

impl MemoryRowStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn cas_conflict(table: &str, key: &str, expected: u64, actual: u64) -> FabricError {
    FabricError::new(
        ErrorCode::IntegrityViolation,
        format!("revision conflict on {table}/{key}"),
    )
    .with_context("expected_rev", expected)
    .with_context("actual_rev", actual)
}

impl Inner {
    fn current_rev(&self, table: &str, key: &str) -> u64 {
        self.tables
            .get(table)
            .and_then(|t| t.get(key))
            .map_or(0, |(rev, _)| *rev)
    }

    fn write(&mut self, table: &str, key: &str, value: Value) -> u64 {
        let t = self.tables.entry(table.to_string()).or_default();
        let rev = t.get(key).map_or(0, |(rev, _)| *rev) + 1;
        t.insert(key.to_string(), (rev, value));
        rev
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn put(&self, table: &str, key: &str, value: Value) -> Result<u64> {
        let mut inner = self.inner.lock().expect("row lock poisoned");
        Ok(inner.write(table, key, value))
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<Row>> {
        let inner = self.inner.lock().expect("row lock poisoned");
        Ok(inner
            .tables
            .get(table)
            .and_then(|t| t.get(key))
            .map(|(rev, value)| Row {
                key: key.to_string(),
                rev: *rev,
                value: value.clone(),
            }))
    }

    async fn compare_and_swap(
        &self,
        table: &str,
        key: &str,
        expected_rev: u64,
        value: Value,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().expect("row lock poisoned");
        let actual = inner.current_rev(table, key);
        if actual != expected_rev {
            return Err(cas_conflict(table, key, expected_rev, actual));
        }
        Ok(inner.write(table, key, value))
    }

    async fn delete(&self, table: &str, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("row lock poisoned");
        if let Some(t) = inner.tables.get_mut(table) {
            t.remove(key);
        }
        Ok(())
    }

    async fn query(&self, table: &str, predicate: &Predicate) -> Result<Vec<Row>> {
        let inner = self.inner.lock().expect("row lock poisoned");
        Ok(inner
            .tables
            .get(table)
            .map(|t| {
                t.iter()
                    .filter(|(_, (_, value))| predicate.matches(value))
                    .map(|(key, (rev, value))| Row {
                        key: key.clone(),
                        rev: *rev,
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn apply(&self, ops: Vec<RowOp>) -> Result<()> {
        let mut inner = self.inner.lock().expect("row lock poisoned");

        // Validate every guard before touching anything.
        for op in &ops {
            if let RowOp::CasPut {
                table,
                key,
                expected_rev,
                ..
            } = op
            {
                let actual = inner.current_rev(table, key);
                if actual != *expected_rev {
                    return Err(cas_conflict(table, key, *expected_rev, actual));
                }
            }
        }

        for op in ops {
            match op {
                RowOp::Put { table, key, value } | RowOp::CasPut { table, key, value, .. } => {
                    inner.write(&table, &key, value);
                }
                RowOp::Delete { table, key } => {
                    if let Some(t) = inner.tables.get_mut(&table) {
                        t.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    async fn append_seq(&self, stream: &str, payload: Value) -> Result<u64> {
        let mut inner = self.inner.lock().expect("row lock poisoned");
        let entries = inner.streams.entry(stream.to_string()).or_default();
        entries.push(payload);
        Ok(entries.len() as u64)
    }

    async fn read_seq(&self, stream: &str, from_seq: u64) -> Result<Vec<(u64, Value)>> {
        let inner = self.inner.lock().expect("row lock poisoned");
        Ok(inner
            .streams
            .get(stream)
            .map(|entries| {
                entries
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i as u64 + 1, v.clone()))
                    .filter(|(seq, _)| *seq >= from_seq)
                    .collect()
            })
            .unwrap_or_default())
    }
}
