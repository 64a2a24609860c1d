// SPDX-License-Identifier: MIT OR Apache-2.0
//! The platform maintenance realm.
//!
//! TTL purge runs as the periodic intent `purge_expired_materializations`
//! submitted by a trusted scheduler, never as a hidden process-wide
//! timer: every purge shows up in the WAL and honors cancellation between
//! records.

use async_trait::async_trait;
use chrono::Utc;
use fab_capability::BlobRef;
use fab_core::Intent;
use fab_error::Result;
use fab_policy::AuthzPredicate;
use fab_runtime::{DomainService, ExecutionContext, IntentRegistration};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const REALM: &str = "platform";

/// User id the trusted scheduler submits maintenance intents as.
pub const SYSTEM_USER: &str = "system";

/// The platform maintenance realm.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformRealm;

impl PlatformRealm {
    /// Create the realm.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn system_only() -> AuthzPredicate {
    Arc::new(|identity, _| identity.user_id == SYSTEM_USER)
}

#[async_trait]
impl DomainService for PlatformRealm {
    fn realm_id(&self) -> &str {
        REALM
    }

    fn registrations(&self) -> Vec<IntentRegistration> {
        vec![
            IntentRegistration::open("purge_expired_materializations")
                .with_schema(json!({"type": "object"}))
                .with_authorize(system_only()),
        ]
    }

    async fn handle_intent(&self, ctx: &ExecutionContext, _intent: &Intent) -> Result<()> {
        purge_expired(ctx).await
    }
}

/// Purge every materialization whose deadline passed: contract expires,
/// blob bytes go away, the index row is soft-deleted, and records of
/// fact derived from the source survive, stamped with the expiry time.
async fn purge_expired(ctx: &ExecutionContext) -> Result<()> {
    let steward = ctx.policy().steward();
    let now = Utc::now();
    let due = steward.index().due_for_purge(now).await?;
    let mut purged = 0usize;

    for record in due {
        ctx.checkpoint()?;

        if let Err(e) = steward
            .expire_contract(&record.tenant_id, record.boundary_contract_id)
            .await
        {
            // Already settled (revoked, fulfilled): purge the row anyway.
            warn!(
                target: "fab.platform",
                contract_id = %record.boundary_contract_id,
                error = %e,
                "contract did not expire cleanly"
            );
        }

        if let Some(path) = &record.file_path {
            ctx.files()
                .delete(&BlobRef {
                    key: path.clone(),
                    content_hash: record.file_hash.clone(),
                })
                .await?;
        }

        steward
            .index()
            .mark_deleted(&record.tenant_id, record.uuid)
            .await?;

        let stamped = ctx
            .policy()
            .curator()
            .records()
            .mark_source_expired(&record.tenant_id, record.uuid, now)
            .await?;

        info!(
            target: "fab.platform",
            file_id = %record.uuid,
            tenant_id = %record.tenant_id,
            records_stamped = stamped,
            "materialization purged"
        );
        purged += 1;
    }

    ctx.emit_event("materializations_purged", json!({"count": purged}));
    Ok(())
}
