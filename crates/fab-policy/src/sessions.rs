// SPDX-License-Identifier: MIT OR Apache-2.0
//! Traffic cop: session establishment, upgrade, lookup, expiry.

use fab_capability::RowStore;
use fab_core::{Session, SessionState};
use fab_error::{ErrorCode, FabricError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const TABLE: &str = "sessions";

/// Session storage and state transitions.
#[derive(Clone)]
pub struct SessionManager {
    rows: Arc<dyn RowStore>,
}

impl SessionManager {
    /// Create a manager over the given row store.
    pub fn new(rows: Arc<dyn RowStore>) -> Self {
        Self { rows }
    }

    fn decode(value: Value) -> Result<Session> {
        serde_json::from_value(value)
            .map_err(|e| FabricError::internal("decode session row").with_source(e))
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let value = serde_json::to_value(session)
            .map_err(|e| FabricError::internal("encode session row").with_source(e))?;
        self.rows
            .put(TABLE, &session.session_id.to_string(), value)
            .await?;
        Ok(())
    }

    /// Establish a fresh anonymous session.
    pub async fn establish(&self) -> Result<Session> {
        let session = Session::anonymous();
        self.save(&session).await?;
        info!(target: "fab.sessions", session_id = %session.session_id, "session established");
        Ok(session)
    }

    /// Upgrade an anonymous session with validated identity.
    ///
    /// # Errors
    ///
    /// `not_found` for unknown sessions; `denied_by_policy` when the
    /// session is already bound to a different tenant.
    pub async fn upgrade(
        &self,
        session_id: Uuid,
        user_id: &str,
        tenant_id: &str,
        metadata: BTreeMap<String, Value>,
    ) -> Result<Session> {
        let mut session = self.get(session_id).await?;
        if let Some(bound) = &session.tenant_id {
            if bound != tenant_id {
                return Err(FabricError::denied(
                    "session is already bound to another tenant",
                ));
            }
        }
        session.tenant_id = Some(tenant_id.to_string());
        session.user_id = Some(user_id.to_string());
        session.metadata.extend(metadata);
        self.save(&session).await?;
        info!(
            target: "fab.sessions",
            session_id = %session.session_id,
            tenant_id = %tenant_id,
            "session upgraded"
        );
        debug_assert_eq!(session.state(), SessionState::Active);
        Ok(session)
    }

    /// Look up a session.
    ///
    /// # Errors
    ///
    /// `not_found` when absent or expired.
    pub async fn get(&self, session_id: Uuid) -> Result<Session> {
        match self.rows.get(TABLE, &session_id.to_string()).await? {
            Some(row) => Self::decode(row.value),
            None => Err(FabricError::new(
                ErrorCode::NotFound,
                format!("session {session_id} not found"),
            )),
        }
    }

    /// Expire a session. Both sub-states are terminal on expiry; the row
    /// is removed and later lookups return `not_found`.
    pub async fn expire(&self, session_id: Uuid) -> Result<()> {
        self.rows.delete(TABLE, &session_id.to_string()).await
    }
}
