// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! fab-realm
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The Content realm: file ingestion, parsing, embeddings, listing.
pub mod content;
/// Deterministic bag-of-words embeddings.
pub mod embedding;
/// Content parsers.
pub mod parse;
/// The platform maintenance realm.
pub mod platform;

pub use content::ContentRealm;
pub use embedding::{deterministic_embedding, EMBEDDING_DIMS};
pub use parse::{parse_bytes, ParsedContent};
pub use platform::PlatformRealm;
