// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! fab-store
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Platform DNA registry store: versioned, immutable, single-current.
pub mod dna;
/// File storage: blob bytes plus a row index.
pub mod files;
/// Materialization index: the authoritative record of persisted external data.
pub mod materialization;
/// Materialization policy store with uniqueness enforcement.
pub mod policy_store;
/// Record-of-fact store: meaning that outlives its sources.
pub mod records;
/// Semantic store over a pluggable vector backend.
pub mod semantic;
/// Per-execution state surface.
pub mod state;
/// Tenant-scoped row views.
pub mod tenant;
/// Per-tenant write-ahead log.
pub mod wal;

pub use dna::DnaRegistryStore;
pub use files::{FileStorage, StoredFile};
pub use materialization::MaterializationIndex;
pub use policy_store::PolicyStore;
pub use records::RecordOfFactStore;
pub use semantic::SemanticStore;
pub use state::StateSurface;
pub use tenant::TenantScopedRows;
pub use wal::{Wal, WalAppend};
