// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! fab-capability
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Blob storage contract and in-memory adapter.
pub mod blob;
/// TTL cache contract and in-memory adapter.
pub mod cache;
/// Topic pub/sub contract and in-memory adapter.
pub mod pubsub;
/// Row storage contract (rows, predicates, append streams) and in-memory adapter.
pub mod row;
/// Vector similarity contract and in-memory adapter.
pub mod vector;

pub use blob::{BlobRef, BlobStore, MemoryBlobStore, PutOptions};
pub use cache::{Cache, MemoryCache};
pub use pubsub::{MemoryPubSub, PubSub, PubSubStats, Subscription};
pub use row::{Condition, MemoryRowStore, Predicate, Row, RowOp, RowStore};
pub use vector::{MemoryVectorStore, VectorBackend, VectorHit};
