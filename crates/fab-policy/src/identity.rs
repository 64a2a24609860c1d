// SPDX-License-Identifier: MIT OR Apache-2.0
//! Identity and authorization decisions.
//!
//! Token issuance and signature verification happen upstream; the fabric
//! consumes validated identity. What is decided here: the session must be
//! active, tenants must agree, and the intent type's own permission
//! predicate must allow the caller.

use fab_core::{Intent, Session, SessionState};
use std::sync::Arc;

/// Validated caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User identifier.
    pub user_id: String,
    /// Tenant identifier.
    pub tenant_id: String,
}

/// Outcome of an authorization decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The operation may proceed.
    Allow,
    /// The operation is denied with a reason suitable for audit.
    Deny {
        /// Why.
        reason: String,
    },
}

impl Decision {
    /// Returns `true` for [`Decision::Allow`].
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Per-intent-type permission predicate, registered by the owning realm.
pub type AuthzPredicate = Arc<dyn Fn(&Identity, &Intent) -> bool + Send + Sync>;

/// An [`AuthzPredicate`] that allows every caller.
#[must_use]
pub fn allow_all() -> AuthzPredicate {
    Arc::new(|_, _| true)
}

/// Decide whether `identity` may run `intent` in `session`.
#[must_use]
pub fn authorize(
    identity: &Identity,
    intent: &Intent,
    session: &Session,
    permission: &AuthzPredicate,
) -> Decision {
    if session.state() != SessionState::Active {
        return Decision::Deny {
            reason: "session is anonymous; upgrade before submitting intents".into(),
        };
    }
    if session.tenant_id.as_deref() != Some(intent.tenant_id.as_str()) {
        return Decision::Deny {
            reason: "session tenant does not match intent tenant".into(),
        };
    }
    if identity.tenant_id != intent.tenant_id {
        return Decision::Deny {
            reason: "identity tenant does not match intent tenant".into(),
        };
    }
    if !permission(identity, intent) {
        return Decision::Deny {
            reason: format!("intent type '{}' denied for caller", intent.intent_type),
        };
    }
    Decision::Allow
}
