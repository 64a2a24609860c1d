// SPDX-License-Identifier: MIT OR Apache-2.0
//! The intent registry: the process-wide map from intent type to handler,
//! schema, and authorization predicate.
//!
//! Realms register at startup; duplicate registration is a boot error, and
//! unknown types fail fast at admission. Parameter schemas are compiled
//! once at registration.

use crate::context::ExecutionContext;
use async_trait::async_trait;
use fab_core::Intent;
use fab_error::{ErrorCode, FabricError, Result};
use fab_policy::{AuthzPredicate, Identity};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One intent type a realm offers.
pub struct IntentRegistration {
    /// Globally-unique intent type string.
    pub intent_type: String,
    /// JSON Schema for the intent's `parameters` object.
    pub schema: serde_json::Value,
    /// Per-type permission predicate.
    pub authorize: AuthzPredicate,
    /// Execution budget override; the runtime default applies when `None`.
    pub timeout: Option<Duration>,
}

impl IntentRegistration {
    /// A registration that accepts any caller and any object parameters.
    #[must_use]
    pub fn open(intent_type: impl Into<String>) -> Self {
        Self {
            intent_type: intent_type.into(),
            schema: serde_json::json!({"type": "object"}),
            authorize: fab_policy::allow_all(),
            timeout: None,
        }
    }

    /// Replace the parameter schema.
    #[must_use]
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = schema;
        self
    }

    /// Replace the permission predicate.
    #[must_use]
    pub fn with_authorize(mut self, authorize: AuthzPredicate) -> Self {
        self.authorize = authorize;
        self
    }

    /// Set an execution budget override.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The contract a realm implements: register intents, handle intents.
///
/// Handlers must not call other handlers directly (cross-realm work is an
/// intent submitted through the context), must not touch infrastructure
/// beyond what the context exposes, and must emit every meaningful output
/// as an artifact.
#[async_trait]
pub trait DomainService: Send + Sync {
    /// Stable realm identifier (e.g. `"content"`).
    fn realm_id(&self) -> &str;

    /// The intent types this realm offers.
    fn registrations(&self) -> Vec<IntentRegistration>;

    /// Run one intent. Outputs flow through the context's sinks; the
    /// returned error is classified into the fabric taxonomy.
    async fn handle_intent(&self, ctx: &ExecutionContext, intent: &Intent) -> Result<()>;
}

/// A resolved registration.
pub struct RegisteredIntent {
    /// Owning realm.
    pub realm_id: String,
    /// Compiled parameter validator.
    validator: jsonschema::Validator,
    /// Permission predicate.
    pub authorize: AuthzPredicate,
    /// Execution budget override.
    pub timeout: Option<Duration>,
}

impl RegisteredIntent {
    /// Validate an intent's parameters against the compiled schema.
    ///
    /// # Errors
    ///
    /// `invalid_parameters` listing every schema violation.
    pub fn validate(&self, intent: &Intent) -> Result<()> {
        if self.validator.is_valid(&intent.parameters) {
            return Ok(());
        }
        let problems: Vec<String> = self
            .validator
            .iter_errors(&intent.parameters)
            .map(|e| e.to_string())
            .collect();
        Err(
            FabricError::invalid_parameters(format!(
                "parameters failed schema validation for '{}'",
                intent.intent_type
            ))
            .with_context("problems", problems),
        )
    }

    /// Evaluate the permission predicate.
    #[must_use]
    pub fn permits(&self, identity: &Identity, intent: &Intent) -> bool {
        (self.authorize)(identity, intent)
    }
}

/// The process-wide intent registry.
#[derive(Default)]
pub struct IntentRegistry {
    intents: HashMap<String, RegisteredIntent>,
    realms: HashMap<String, Arc<dyn DomainService>>,
}

impl IntentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a realm and all of its intent types.
    ///
    /// # Errors
    ///
    /// `config_invalid` on duplicate intent types or uncompilable
    /// schemas; both are fatal boot errors.
    pub fn register_realm(&mut self, realm: Arc<dyn DomainService>) -> Result<()> {
        let realm_id = realm.realm_id().to_string();
        for registration in realm.registrations() {
            if self.intents.contains_key(&registration.intent_type) {
                return Err(FabricError::new(
                    ErrorCode::ConfigInvalid,
                    format!(
                        "intent type '{}' is already registered",
                        registration.intent_type
                    ),
                ));
            }
            let validator = jsonschema::validator_for(&registration.schema).map_err(|e| {
                FabricError::new(
                    ErrorCode::ConfigInvalid,
                    format!(
                        "schema for intent type '{}' does not compile: {e}",
                        registration.intent_type
                    ),
                )
            })?;
            info!(
                target: "fab.registry",
                intent_type = %registration.intent_type,
                realm = %realm_id,
                "intent registered"
            );
            self.intents.insert(
                registration.intent_type,
                RegisteredIntent {
                    realm_id: realm_id.clone(),
                    validator,
                    authorize: registration.authorize,
                    timeout: registration.timeout,
                },
            );
        }
        self.realms.insert(realm_id, realm);
        Ok(())
    }

    /// Resolve an intent type.
    #[must_use]
    pub fn resolve(&self, intent_type: &str) -> Option<&RegisteredIntent> {
        self.intents.get(intent_type)
    }

    /// The realm service owning an intent type.
    #[must_use]
    pub fn service_for(&self, intent_type: &str) -> Option<Arc<dyn DomainService>> {
        let realm_id = &self.intents.get(intent_type)?.realm_id;
        self.realms.get(realm_id).cloned()
    }

    /// All registered intent types, sorted.
    #[must_use]
    pub fn intent_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.intents.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubRealm {
        id: &'static str,
        types: Vec<&'static str>,
    }

    #[async_trait]
    impl DomainService for StubRealm {
        fn realm_id(&self) -> &str {
            self.id
        }

        fn registrations(&self) -> Vec<IntentRegistration> {
            self.types
                .iter()
                .map(|t| {
                    IntentRegistration::open(*t).with_schema(json!({
                        "type": "object",
                        "required": ["name"],
                        "properties": {"name": {"type": "string"}}
                    }))
                })
                .collect()
        }

        async fn handle_intent(&self, _ctx: &ExecutionContext, _intent: &Intent) -> Result<()> {
            Ok(())
        }
    }

    fn registry_with(types: Vec<&'static str>) -> IntentRegistry {
        let mut registry = IntentRegistry::new();
        registry
            .register_realm(Arc::new(StubRealm { id: "stub", types }))
            .expect("register");
        registry
    }

    #[test]
    fn registration_resolves_by_type() {
        let registry = registry_with(vec!["a", "b"]);
        assert!(registry.resolve("a").is_some());
        assert!(registry.resolve("missing").is_none());
        assert_eq!(registry.intent_types(), vec!["a", "b"]);
    }

    #[test]
    fn duplicate_registration_is_a_boot_error() {
        let mut registry = registry_with(vec!["a"]);
        let err = registry
            .register_realm(Arc::new(StubRealm {
                id: "other",
                types: vec!["a"],
            }))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
    }

    #[test]
    fn schema_validation_accepts_and_rejects() {
        let registry = registry_with(vec!["a"]);
        let registered = registry.resolve("a").expect("registered");

        let good = fab_core::IntentBuilder::new("a")
            .tenant("acme")
            .user("u-1")
            .parameter("name", "x")
            .build();
        registered.validate(&good).expect("valid");

        let bad = fab_core::IntentBuilder::new("a")
            .tenant("acme")
            .user("u-1")
            .parameter("name", 42)
            .build();
        let err = registered.validate(&bad).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameters);
        assert!(err.context.contains_key("problems"));
    }

    #[test]
    fn service_for_returns_the_owning_realm() {
        let registry = registry_with(vec!["a"]);
        let service = registry.service_for("a").expect("service");
        assert_eq!(service.realm_id(), "stub");
    }
}
