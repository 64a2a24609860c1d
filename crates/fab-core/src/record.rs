// SPDX-License-Identifier: MIT OR Apache-2.0
//! Records of fact: persistent interpreted meaning.
//!
//! A record of fact outlives the working material it was derived from.
//! When the source expires or is purged, the record is stamped with
//! `source_expired_at` but never deleted.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of persistent interpreted meaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// Deterministic (hash-derived) embedding.
    DeterministicEmbedding,
    /// Model-derived embedding.
    SemanticEmbedding,
    /// Interpreted reading of source material.
    Interpretation,
    /// A drawn conclusion.
    Conclusion,
}

/// Persistent interpreted meaning, owned by the Insights subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordOfFact {
    /// Unique record identifier.
    pub record_id: Uuid,
    /// Tenant scope.
    pub tenant_id: String,
    /// Record kind.
    pub record_type: RecordType,
    /// Source file; may later become orphaned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_id: Option<Uuid>,
    /// Contract that governed the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_boundary_contract_id: Option<Uuid>,
    /// Set when the source expired or was purged. The record persists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_expired_at: Option<DateTime<Utc>>,
    /// Backing embedding row, when the record is embedding-shaped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_id: Option<Uuid>,
    /// Backing interpretation row, when interpretation-shaped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation_id: Option<Uuid>,
    /// Optional inline content.
    #[serde(default)]
    pub content: serde_json::Value,
    /// Promotion timestamp.
    pub promoted_at: DateTime<Utc>,
    /// Who promoted it.
    pub promoted_by: String,
    /// Why it was promoted.
    pub promotion_reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&RecordType::DeterministicEmbedding).unwrap(),
            "\"deterministic_embedding\""
        );
        assert_eq!(
            serde_json::to_string(&RecordType::Conclusion).unwrap(),
            "\"conclusion\""
        );
    }

    #[test]
    fn record_serde_roundtrip() {
        let rec = RecordOfFact {
            record_id: Uuid::new_v4(),
            tenant_id: "acme".into(),
            record_type: RecordType::DeterministicEmbedding,
            source_file_id: Some(Uuid::new_v4()),
            source_boundary_contract_id: Some(Uuid::new_v4()),
            source_expired_at: None,
            embedding_id: Some(Uuid::new_v4()),
            interpretation_id: None,
            content: serde_json::json!({"dims": 64}),
            promoted_at: Utc::now(),
            promoted_by: "content".into(),
            promotion_reason: "extract_embeddings".into(),
        };
        let json = serde_json::to_string(&rec).unwrap();
        let back: RecordOfFact = serde_json::from_str(&json).unwrap();
        assert_eq!(back.record_id, rec.record_id);
        assert_eq!(back.record_type, RecordType::DeterministicEmbedding);
        assert!(back.source_expired_at.is_none());
    }
}
