// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! fab-policy
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Curator: promotion into records of fact and platform DNA.
pub mod curator;
/// Identity and authorization decisions.
pub mod identity;
/// Nurse: retry policy for retriable failure classes.
pub mod nurse;
/// Traffic cop: session establishment, upgrade, lookup, expiry.
pub mod sessions;
/// Data steward: boundary contracts and two-phase materialization.
pub mod steward;

pub use curator::Curator;
pub use identity::{allow_all, authorize, AuthzPredicate, Decision, Identity};
pub use nurse::{RetryDecision, RetryPolicy};
pub use sessions::SessionManager;
pub use steward::{AccessContext, DataAccessRequest, DataSteward, PolicyContext};

use std::sync::Arc;

/// Bundle of the Smart City primitives a handler may consult.
///
/// Cloneable and cheap to pass around; all members share underlying
/// stores.
#[derive(Clone)]
pub struct SmartCity {
    sessions: SessionManager,
    steward: DataSteward,
    curator: Curator,
    nurse: Arc<RetryPolicy>,
}

impl SmartCity {
    /// Assemble the Smart City from its members.
    pub fn new(
        sessions: SessionManager,
        steward: DataSteward,
        curator: Curator,
        nurse: RetryPolicy,
    ) -> Self {
        Self {
            sessions,
            steward,
            curator,
            nurse: Arc::new(nurse),
        }
    }

    /// Session management.
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// The data steward.
    #[must_use]
    pub fn steward(&self) -> &DataSteward {
        &self.steward
    }

    /// The curator.
    #[must_use]
    pub fn curator(&self) -> &Curator {
        &self.curator
    }

    /// The nurse's retry policy.
    #[must_use]
    pub fn nurse(&self) -> &RetryPolicy {
        &self.nurse
    }
}
