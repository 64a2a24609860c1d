// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! fab-edge
#![deny(unsafe_code)]

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path as AxPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use fab_core::Intent;
use fab_error::{ErrorCode, FabricError};
use fab_runtime::Runtime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

/// Shared state behind every edge handler.
pub struct AppState {
    /// The Runtime the edge translates into.
    pub runtime: Runtime,
    /// Process start, for the health endpoint.
    pub started_at: Instant,
}

/// Build the axum router with all edge routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/session/create-anonymous", post(create_session))
        .route("/api/session/{session_id}/upgrade", patch(upgrade_session))
        .route("/api/session/{session_id}", get(get_session))
        .route("/api/intent/submit", post(submit_intent))
        .route("/api/execution/{execution_id}/status", get(execution_status))
        .route("/api/execution/stream", get(execution_stream))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// HTTP projection of a fabric error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<FabricError> for ApiError {
    fn from(err: FabricError) -> Self {
        let status = match err.code {
            ErrorCode::InvalidParameters | ErrorCode::UnknownIntentType => StatusCode::BAD_REQUEST,
            ErrorCode::TenantMismatch
            | ErrorCode::DeniedByPolicy
            | ErrorCode::PolicyRevoked
            | ErrorCode::AccessRevoked => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::AlreadyTerminal => StatusCode::CONFLICT,
            ErrorCode::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.code.as_str(), err.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({"error": {"code": self.code, "message": self.message}}));
        (self.status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "contract_version": fab_core::CONTRACT_VERSION,
        "time": Utc::now().to_rfc3339(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "intent_types": state.runtime.intent_types(),
        "latency": state.runtime.latency_summary(),
    }))
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.runtime.smart_city().sessions().establish().await?;
    Ok(Json(json!({
        "session_id": session.session_id,
        "created_at": session.created_at,
    })))
}

#[derive(Debug, Deserialize)]
struct UpgradeRequest {
    user_id: String,
    tenant_id: String,
    access_token: String,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

async fn upgrade_session(
    AxPath(session_id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpgradeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Token validation happens upstream; an absent token is still a
    // malformed upgrade.
    if req.access_token.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "access_token is required",
        ));
    }
    let session = state
        .runtime
        .smart_city()
        .sessions()
        .upgrade(session_id, &req.user_id, &req.tenant_id, req.metadata)
        .await?;
    info!(target: "fab.edge", session_id = %session_id, "session upgraded");
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct TenantQuery {
    tenant_id: Option<String>,
}

async fn get_session(
    AxPath(session_id): AxPath<Uuid>,
    Query(query): Query<TenantQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.runtime.smart_city().sessions().get(session_id).await?;
    if let Some(tenant_id) = &query.tenant_id {
        if session.tenant_id.as_deref() != Some(tenant_id.as_str()) {
            return Err(FabricError::not_found(format!("session {session_id} not found")).into());
        }
    }
    Ok(Json(session))
}

// ---------------------------------------------------------------------------
// Intents and executions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    intent_type: String,
    tenant_id: String,
    session_id: Uuid,
    #[serde(default)]
    solution_id: Option<String>,
    #[serde(default)]
    parameters: Option<serde_json::Value>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, serde_json::Value>>,
}

/// Response body for `POST /api/intent/submit`.
#[derive(Debug, Serialize)]
struct SubmitResponse {
    execution_id: Uuid,
    intent_id: Uuid,
    status: fab_core::ExecutionStatus,
    created_at: chrono::DateTime<Utc>,
}

async fn submit_intent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // The edge owns no identity: the attributed user comes from the
    // upgraded session.
    let session = state
        .runtime
        .smart_city()
        .sessions()
        .get(req.session_id)
        .await?;
    let user_id = session.user_id.clone().unwrap_or_default();

    let intent = Intent {
        intent_id: Uuid::new_v4(),
        intent_type: req.intent_type,
        tenant_id: req.tenant_id,
        session_id: req.session_id,
        user_id,
        solution_id: req.solution_id,
        parameters: req
            .parameters
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
        metadata: req.metadata.unwrap_or_default(),
        created_at: Utc::now(),
    };

    let receipt = state.runtime.admit(intent).await?;
    Ok(Json(SubmitResponse {
        execution_id: receipt.execution_id,
        intent_id: receipt.intent_id,
        status: receipt.status,
        created_at: receipt.created_at,
    }))
}

#[derive(Debug, Deserialize)]
struct ExecutionQuery {
    tenant_id: String,
}

async fn execution_status(
    AxPath(execution_id): AxPath<Uuid>,
    Query(query): Query<ExecutionQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let execution = state.runtime.status(&query.tenant_id, execution_id).await?;
    Ok(Json(execution))
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    execution_id: Uuid,
    tenant_id: String,
}

async fn execution_stream(
    Query(query): Query<StreamQuery>,
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // Open the stream before upgrading so unknown executions 404.
    let stream = state
        .runtime
        .stream(&query.tenant_id, query.execution_id)
        .await?;
    Ok(upgrade.on_upgrade(move |socket| pump_stream(socket, stream, query.execution_id)))
}

async fn pump_stream(
    mut socket: WebSocket,
    mut stream: tokio_stream::wrappers::ReceiverStream<fab_core::StreamEnvelope>,
    execution_id: Uuid,
) {
    while let Some(envelope) = stream.next().await {
        let Ok(text) = serde_json::to_string(&envelope) else {
            continue;
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            debug!(target: "fab.edge", execution_id = %execution_id, "stream client went away");
            return;
        }
    }
    // Terminal envelope delivered; close cleanly.
    let _ = socket.send(Message::Close(None)).await;
}
