// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Content realm: the reference implementation of the domain-service
//! contract.
//!
//! File ingestion follows the two-phase protocol. Phase A (`ingest_file`)
//! creates a pending boundary contract and writes bytes to a temp blob;
//! no materialization row exists yet, so the file is invisible. Phase B
//! (`save_materialization`) activates the contract under policy and
//! inserts the index row, which is when `list_files` starts returning the
//! file to users inside the reference scope.

use crate::embedding::{deterministic_embedding, EMBEDDING_DIMS};
use crate::parse::parse_bytes;
use async_trait::async_trait;
use fab_artifact::NewArtifact;
use fab_capability::BlobRef;
use fab_core::{
    deterministic_artifact_id, BackingStore, ExternalSourceType, LifecycleState,
    MaterializationAuthorization, MaterializationRecord, MaterializationType, PayloadRef,
    RecordType,
};
use fab_core::Intent;
use fab_error::{ErrorCode, FabricError, Result};
use fab_policy::{AccessContext, PolicyContext};
use fab_runtime::{DomainService, ExecutionContext, IntentRegistration};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

const REALM: &str = "content";

/// The Content realm.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentRealm;

impl ContentRealm {
    /// Create the realm.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Deterministic artifact id of the `file` artifact for a file.
#[must_use]
pub fn file_artifact_id(tenant_id: &str, file_id: Uuid) -> String {
    deterministic_artifact_id(tenant_id, "file", &file_id.to_string())
}

fn str_param<'a>(intent: &'a Intent, key: &str) -> Result<&'a str> {
    intent
        .parameters
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| FabricError::invalid_parameters(format!("'{key}' must be a string")))
}

fn opt_str_param<'a>(intent: &'a Intent, key: &str, default: &'a str) -> &'a str {
    intent
        .parameters
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
}

fn uuid_param(intent: &Intent, key: &str) -> Result<Uuid> {
    str_param(intent, key).and_then(|s| {
        Uuid::parse_str(s)
            .map_err(|_| FabricError::invalid_parameters(format!("'{key}' must be a uuid")))
    })
}

fn uuid_state(value: Option<Value>) -> Option<Uuid> {
    value
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

#[async_trait]
impl DomainService for ContentRealm {
    fn realm_id(&self) -> &str {
        REALM
    }

    fn registrations(&self) -> Vec<IntentRegistration> {
        vec![
            IntentRegistration::open("ingest_file").with_schema(json!({
                "type": "object",
                "required": ["content", "ui_name"],
                "properties": {
                    "content": {"type": "string"},
                    "ui_name": {"type": "string"},
                    "file_type": {"type": "string"},
                    "mime_type": {"type": "string"},
                }
            })),
            IntentRegistration::open("save_materialization").with_schema(json!({
                "type": "object",
                "required": ["boundary_contract_id", "file_id"],
                "properties": {
                    "boundary_contract_id": {"type": "string"},
                    "file_id": {"type": "string"},
                    "materialization_type": {"type": "string"},
                    "materialization_ttl_secs": {"type": "integer"},
                }
            })),
            IntentRegistration::open("parse_content").with_schema(json!({
                "type": "object",
                "required": ["file_id"],
                "properties": {"file_id": {"type": "string"}}
            })),
            IntentRegistration::open("extract_embeddings").with_schema(json!({
                "type": "object",
                "required": ["parsed_file_id"],
                "properties": {"parsed_file_id": {"type": "string"}}
            })),
            IntentRegistration::open("list_files").with_schema(json!({"type": "object"})),
            IntentRegistration::open("get_file").with_schema(json!({
                "type": "object",
                "required": ["file_id"],
                "properties": {"file_id": {"type": "string"}}
            })),
            IntentRegistration::open("archive_file").with_schema(json!({
                "type": "object",
                "required": ["file_id"],
                "properties": {"file_id": {"type": "string"}}
            })),
        ]
    }

    async fn handle_intent(&self, ctx: &ExecutionContext, intent: &Intent) -> Result<()> {
        match intent.intent_type.as_str() {
            "ingest_file" => ingest_file(ctx, intent).await,
            "save_materialization" => save_materialization(ctx, intent).await,
            "parse_content" => parse_content(ctx, intent).await,
            "extract_embeddings" => extract_embeddings(ctx, intent).await,
            "list_files" => list_files(ctx).await,
            "get_file" => get_file(ctx, intent).await,
            "archive_file" => archive_file(ctx, intent).await,
            other => Err(FabricError::unknown_intent_type(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Phase A: upload
// ---------------------------------------------------------------------------

async fn ingest_file(ctx: &ExecutionContext, intent: &Intent) -> Result<()> {
    let content = str_param(intent, "content")?.to_string();
    let ui_name = str_param(intent, "ui_name")?.to_string();
    let file_type = opt_str_param(intent, "file_type", "unstructured").to_string();
    let mime_type = opt_str_param(intent, "mime_type", "text/plain").to_string();
    ctx.checkpoint()?;

    // One logical file per ingest intent: retries land on the same id.
    let file_id = intent.intent_id;

    let contract_id = match uuid_state(ctx.get_state("ingest:contract_id").await?) {
        Some(id) => id,
        None => {
            let request = ctx
                .policy()
                .steward()
                .request_data_access(
                    &AccessContext {
                        tenant_id: ctx.tenant_id().to_string(),
                        user_id: ctx.user_id().to_string(),
                        intent_id: Some(intent.intent_id),
                    },
                    ExternalSourceType::File,
                    &format!("upload:{ui_name}"),
                )
                .await?;
            ctx.set_state("ingest:contract_id", json!(request.contract_id))
                .await?;
            request.contract_id
        }
    };

    let stored = ctx
        .files()
        .put_temp(ctx.tenant_id(), ctx.user_id(), file_id, content.into_bytes())
        .await?;
    let files = ctx.files().clone();
    let uploaded = stored.blob_ref.clone();
    ctx.compensate("delete_upload", move || {
        Box::pin(async move { files.delete(&uploaded).await })
    });
    ctx.checkpoint()?;

    let mut new = NewArtifact::draft(ctx.tenant_id(), ctx.execution_id(), "file", REALM);
    new.deterministic_key = Some(file_id.to_string());
    new.semantic_descriptor = json!({
        "file_id": file_id,
        "boundary_contract_id": contract_id,
        "materialization_pending": true,
        "ui_name": ui_name,
        "file_type": file_type,
        "mime_type": mime_type,
        "file_size": stored.size,
        "file_hash": stored.content_hash,
    });
    new.payload_ref = Some(PayloadRef {
        store: "blob".into(),
        locator: stored.blob_ref.key.clone(),
    });
    ctx.emit_artifact("file", new).await?;
    ctx.emit_event(
        "file_uploaded",
        json!({"file_id": file_id, "boundary_contract_id": contract_id}),
    );
    info!(target: "fab.content", file_id = %file_id, "file ingested (pending materialization)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Phase B: save
// ---------------------------------------------------------------------------

async fn save_materialization(ctx: &ExecutionContext, intent: &Intent) -> Result<()> {
    let contract_id = uuid_param(intent, "boundary_contract_id")?;
    let file_id = uuid_param(intent, "file_id")?;
    ctx.checkpoint()?;
    let steward = ctx.policy().steward();

    let requested_type = intent
        .parameters
        .get("materialization_type")
        .cloned()
        .and_then(|v| serde_json::from_value::<MaterializationType>(v).ok());
    let policy_ctx = PolicyContext {
        solution_id: intent.solution_id.clone(),
        requested_type,
        requested_ttl_secs: intent
            .parameters
            .get("materialization_ttl_secs")
            .and_then(Value::as_i64),
    };

    let auth = match steward
        .authorize_materialization(ctx.tenant_id(), contract_id, &policy_ctx)
        .await
    {
        Ok(auth) => auth,
        // Idempotent retry: the contract is already active for this user.
        Err(e) if e.code == ErrorCode::AlreadyTerminal => {
            let contract = steward.get_contract(ctx.tenant_id(), contract_id).await?;
            if !contract.permits_reference(ctx.user_id()) {
                return Err(e);
            }
            MaterializationAuthorization {
                contract_id,
                materialization_type: contract
                    .materialization_type
                    .unwrap_or(MaterializationType::Reference),
                ttl_secs: contract.materialization_ttl_secs,
                backing_store: contract
                    .materialization_backing_store
                    .unwrap_or(BackingStore::Blob),
                scope: contract.materialization_scope.clone(),
            }
        }
        Err(e) => return Err(e),
    };
    let contract = steward.get_contract(ctx.tenant_id(), contract_id).await?;

    let artifact_id = file_artifact_id(ctx.tenant_id(), file_id);
    let (artifact, _) = ctx
        .artifact_plane()
        .get(ctx.tenant_id(), &artifact_id, false)
        .await?;
    let descriptor = &artifact.semantic_descriptor;
    let field = |key: &str| {
        descriptor
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let now = Utc::now();
    let record = MaterializationRecord {
        uuid: file_id,
        tenant_id: ctx.tenant_id().to_string(),
        user_id: contract.user_id.clone(),
        ui_name: field("ui_name"),
        file_path: artifact.payload_ref.as_ref().map(|p| p.locator.clone()),
        file_type: field("file_type"),
        mime_type: field("mime_type"),
        file_size: descriptor
            .get("file_size")
            .and_then(Value::as_u64)
            .unwrap_or_default(),
        file_hash: field("file_hash"),
        status: "saved".into(),
        ingestion_type: "upload".into(),
        boundary_contract_id: contract_id,
        representation_type: auth.materialization_type,
        materialization_policy_basis: None,
        materialization_expires_at: contract.materialization_expires_at,
        materialization_backing_store: auth.backing_store,
        materialization_scope: auth.scope.clone(),
        source_external: true,
        source_location: Some(contract.external_source_identifier.clone()),
        source_type: Some("file".into()),
        parent_file_uuid: None,
        root_file_uuid: Some(file_id),
        lineage_depth: 0,
        created_at: now,
        updated_at: now,
        deleted: false,
    };
    steward.index().insert(&record).await?;

    // Deterministic and semantic representations promote immediately.
    if auth.materialization_type.promotable_to_record() && ctx.once("save:promote").await? {
        let record_type = match auth.materialization_type {
            MaterializationType::SemanticEmbedding => RecordType::SemanticEmbedding,
            _ => RecordType::Interpretation,
        };
        ctx.policy()
            .curator()
            .promote_to_record_of_fact(
                &contract,
                record_type,
                Some(file_id),
                None,
                json!({"file_id": file_id}),
                REALM,
                "save_materialization",
            )
            .await?;
    }

    ctx.emit_event(
        "materialization_saved",
        json!({
            "file_id": file_id,
            "boundary_contract_id": contract_id,
            "representation_type": auth.materialization_type,
        }),
    );
    info!(target: "fab.content", file_id = %file_id, "materialization saved");
    Ok(())
}

// ---------------------------------------------------------------------------
// Parsing and embeddings
// ---------------------------------------------------------------------------

async fn parse_content(ctx: &ExecutionContext, intent: &Intent) -> Result<()> {
    let file_id = uuid_param(intent, "file_id")?;
    ctx.checkpoint()?;
    let record = ctx
        .policy()
        .steward()
        .check_reference(ctx.tenant_id(), ctx.user_id(), file_id)
        .await?;

    let file_path = record
        .file_path
        .clone()
        .ok_or_else(|| FabricError::not_found(format!("file {file_id} has no stored bytes")))?;
    let bytes = ctx
        .files()
        .read(&BlobRef {
            key: file_path,
            content_hash: record.file_hash.clone(),
        })
        .await?;
    let parsed = parse_bytes(&record.file_type, &record.mime_type, &bytes)?;
    ctx.checkpoint()?;

    let stored = ctx
        .files()
        .put_derived(ctx.tenant_id(), "parsed", file_id, parsed.text.clone().into_bytes())
        .await?;
    let files = ctx.files().clone();
    let derived = stored.blob_ref.clone();
    ctx.compensate("delete_parsed", move || {
        Box::pin(async move { files.delete(&derived).await })
    });

    let mut new = NewArtifact::draft(ctx.tenant_id(), ctx.execution_id(), "parsed_content", REALM);
    new.deterministic_key = Some(format!("parsed:{file_id}"));
    new.source_artifact_ids = vec![file_artifact_id(ctx.tenant_id(), file_id)];
    new.semantic_descriptor = json!({
        "source_file_id": file_id,
        "schema": parsed.schema,
        "parser_type": parsed.parser_type,
        "record_count": parsed.record_count,
    });
    new.payload_ref = Some(PayloadRef {
        store: "blob".into(),
        locator: stored.blob_ref.key.clone(),
    });
    let parsed_ref = ctx.emit_artifact("parsed_content", new).await?;
    ctx.emit_event(
        "content_parsed",
        json!({
            "file_id": file_id,
            "parsed_artifact_id": parsed_ref.artifact_id,
            "record_count": parsed.record_count,
        }),
    );
    Ok(())
}

async fn extract_embeddings(ctx: &ExecutionContext, intent: &Intent) -> Result<()> {
    let parsed_artifact_id = str_param(intent, "parsed_file_id")?.to_string();
    ctx.checkpoint()?;

    let (parsed_artifact, payload) = ctx
        .artifact_plane()
        .get(ctx.tenant_id(), &parsed_artifact_id, true)
        .await?;
    let source_file_id = parsed_artifact
        .semantic_descriptor
        .get("source_file_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| {
            FabricError::invalid_parameters("artifact is not parsed content (no source_file_id)")
        })?;

    // The source file gate still applies to derived work.
    let steward = ctx.policy().steward();
    steward
        .check_reference(ctx.tenant_id(), ctx.user_id(), source_file_id)
        .await?;

    let text = String::from_utf8(payload.ok_or_else(|| {
        FabricError::not_found(format!("parsed content {parsed_artifact_id} has no payload"))
    })?)
    .map_err(|e| FabricError::invalid_parameters("parsed payload is not utf-8").with_source(e))?;
    let vector = deterministic_embedding(&text);
    ctx.checkpoint()?;

    // Deterministic embedding id per intent: retries overwrite in place.
    let embedding_id = intent.intent_id;
    ctx.semantic()
        .store_embedding(
            ctx.tenant_id(),
            "embeddings",
            embedding_id,
            vector,
            json!({
                "source_file_id": source_file_id,
                "parsed_artifact_id": parsed_artifact_id,
            }),
        )
        .await?;
    let semantic = ctx.semantic().clone();
    ctx.compensate("remove_embedding", move || {
        Box::pin(async move { semantic.remove("embeddings", embedding_id).await })
    });

    // The derived representation is governed by its own contract,
    // authorized as a deterministic materialization.
    let derived_contract_id = match uuid_state(ctx.get_state("embed:contract_id").await?) {
        Some(id) => id,
        None => {
            let request = steward
                .request_data_access(
                    &AccessContext {
                        tenant_id: ctx.tenant_id().to_string(),
                        user_id: ctx.user_id().to_string(),
                        intent_id: Some(intent.intent_id),
                    },
                    ExternalSourceType::File,
                    &format!("derived:embedding:{source_file_id}"),
                )
                .await?;
            steward
                .authorize_materialization(
                    ctx.tenant_id(),
                    request.contract_id,
                    &PolicyContext {
                        solution_id: intent.solution_id.clone(),
                        requested_type: Some(MaterializationType::Deterministic),
                        requested_ttl_secs: None,
                    },
                )
                .await?;
            ctx.set_state("embed:contract_id", json!(request.contract_id))
                .await?;
            request.contract_id
        }
    };
    let derived_contract = steward
        .get_contract(ctx.tenant_id(), derived_contract_id)
        .await?;

    let record_id = match uuid_state(ctx.get_state("embed:record_id").await?) {
        Some(id) => id,
        None => {
            let record = ctx
                .policy()
                .curator()
                .promote_to_record_of_fact(
                    &derived_contract,
                    RecordType::DeterministicEmbedding,
                    Some(source_file_id),
                    Some(embedding_id),
                    json!({"dims": EMBEDDING_DIMS}),
                    REALM,
                    "extract_embeddings",
                )
                .await?;
            ctx.set_state("embed:record_id", json!(record.record_id))
                .await?;
            record.record_id
        }
    };

    let mut new = NewArtifact::draft(ctx.tenant_id(), ctx.execution_id(), "embedding", REALM);
    new.deterministic_key = Some(format!("embedding:{parsed_artifact_id}"));
    new.source_artifact_ids = vec![
        parsed_artifact_id.clone(),
        file_artifact_id(ctx.tenant_id(), source_file_id),
    ];
    new.semantic_descriptor = json!({
        "embedding_id": embedding_id,
        "record_id": record_id,
        "dims": EMBEDDING_DIMS,
        "source_file_id": source_file_id,
    });
    ctx.emit_artifact("embedding", new).await?;
    ctx.emit_event(
        "embeddings_extracted",
        json!({"embedding_id": embedding_id, "record_id": record_id}),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Listing, fetching, archival
// ---------------------------------------------------------------------------

async fn list_files(ctx: &ExecutionContext) -> Result<()> {
    ctx.checkpoint()?;
    let records = ctx
        .policy()
        .steward()
        .visible_records(ctx.tenant_id(), ctx.user_id())
        .await?;
    let files: Vec<Value> = records
        .iter()
        .map(|r| {
            json!({
                "file_id": r.uuid,
                "ui_name": r.ui_name,
                "file_type": r.file_type,
                "mime_type": r.mime_type,
                "file_size": r.file_size,
                "status": r.status,
            })
        })
        .collect();
    ctx.emit_event("files_listed", json!({"files": files}));
    Ok(())
}

async fn get_file(ctx: &ExecutionContext, intent: &Intent) -> Result<()> {
    let file_id = uuid_param(intent, "file_id")?;
    ctx.checkpoint()?;
    let record = ctx
        .policy()
        .steward()
        .check_reference(ctx.tenant_id(), ctx.user_id(), file_id)
        .await?;

    let url = match &record.file_path {
        Some(path) => Some(
            ctx.files()
                .presign_read(
                    &BlobRef {
                        key: path.clone(),
                        content_hash: record.file_hash.clone(),
                    },
                    std::time::Duration::from_secs(300),
                )
                .await?,
        ),
        None => None,
    };
    ctx.emit_event(
        "file_fetched",
        json!({
            "file_id": record.uuid,
            "ui_name": record.ui_name,
            "mime_type": record.mime_type,
            "file_size": record.file_size,
            "url": url,
        }),
    );
    Ok(())
}

async fn archive_file(ctx: &ExecutionContext, intent: &Intent) -> Result<()> {
    let file_id = uuid_param(intent, "file_id")?;
    ctx.checkpoint()?;
    let steward = ctx.policy().steward();
    steward
        .check_reference(ctx.tenant_id(), ctx.user_id(), file_id)
        .await?;

    steward.index().mark_deleted(ctx.tenant_id(), file_id).await?;

    // Soft delete: the artifact goes obsolete, audit trail retained.
    let artifact_id = file_artifact_id(ctx.tenant_id(), file_id);
    match ctx
        .artifact_plane()
        .transition(
            ctx.tenant_id(),
            &artifact_id,
            LifecycleState::Obsolete,
            ctx.user_id(),
            "archive_file",
        )
        .await
    {
        Ok(_) => {}
        // Already archived: idempotent.
        Err(e) if e.code == ErrorCode::AlreadyTerminal => {}
        Err(e) => return Err(e),
    }
    ctx.emit_event("file_archived", json!({"file_id": file_id}));
    Ok(())
}
