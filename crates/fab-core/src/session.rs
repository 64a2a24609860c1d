// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sessions: scoped context for a client interaction.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Sub-state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No tenant bound yet.
    Anonymous,
    /// Tenant and user bound via upgrade.
    Active,
}

/// Scoped context for a client interaction.
///
/// Starts anonymous (no tenant); a Runtime upgrade binds identity. Both
/// states are terminal on expiry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Session {
    /// Unique session identifier.
    pub session_id: Uuid,
    /// Bound tenant; `None` while anonymous.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Bound user; `None` while anonymous.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Session {
    /// A fresh anonymous session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tenant_id: None,
            user_id: None,
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Derived sub-state: active once a tenant is bound.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.tenant_id.is_some() {
            SessionState::Active
        } else {
            SessionState::Anonymous
        }
    }
}
