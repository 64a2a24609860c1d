// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! fab-error
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Rejections at intent admission, before any WAL write.
    Admission,
    /// Authorization and policy denials.
    Policy,
    /// Missing or terminally-settled resources.
    Lifecycle,
    /// Storage and infrastructure faults.
    Storage,
    /// Boundary-contract and materialization violations.
    Contract,
    /// Failures inside a running execution.
    Execution,
    /// Configuration and startup errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Admission => "admission",
            Self::Policy => "policy",
            Self::Lifecycle => "lifecycle",
            Self::Storage => "storage",
            Self::Contract => "contract",
            Self::Execution => "execution",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to the snake_case string callers see on the
/// HTTP surface and in terminal WAL events. These strings are guaranteed
/// not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // -- Admission --
    /// Intent parameters failed schema or shape validation.
    InvalidParameters,
    /// The intent type is not registered with the Runtime.
    UnknownIntentType,
    /// The session's tenant and the intent's tenant disagree.
    TenantMismatch,
    /// Per-tenant queue depth exceeded the high-water mark.
    Overloaded,

    // -- Policy --
    /// An authorization or materialization-scope check denied the operation.
    DeniedByPolicy,
    /// A boundary contract was revoked while work referencing it ran.
    PolicyRevoked,
    /// A reference to expired or revoked external data was attempted.
    AccessRevoked,

    // -- Lifecycle --
    /// Execution, session, contract, or artifact does not exist.
    NotFound,
    /// The target already reached a terminal state.
    AlreadyTerminal,

    // -- Storage (retriable) --
    /// Transient infrastructure fault; safe to retry.
    TransientIo,
    /// Downstream rate limit; safe to retry with backoff.
    RateLimited,

    // -- Execution --
    /// Version-chain conflict or unique-constraint breach.
    IntegrityViolation,
    /// Execution exceeded its per-intent-type budget.
    Timeout,
    /// Handler panic or unclassified handler error.
    HandlerFault,

    // -- Config --
    /// Configuration file, value, or required environment is invalid.
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidParameters
            | Self::UnknownIntentType
            | Self::TenantMismatch
            | Self::Overloaded => ErrorCategory::Admission,

            Self::DeniedByPolicy => ErrorCategory::Policy,

            Self::PolicyRevoked | Self::AccessRevoked => ErrorCategory::Contract,

            Self::NotFound | Self::AlreadyTerminal => ErrorCategory::Lifecycle,

            Self::TransientIo | Self::RateLimited => ErrorCategory::Storage,

            Self::IntegrityViolation | Self::Timeout | Self::HandlerFault => {
                ErrorCategory::Execution
            }

            Self::ConfigInvalid => ErrorCategory::Config,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"invalid_parameters"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidParameters => "invalid_parameters",
            Self::UnknownIntentType => "unknown_intent_type",
            Self::TenantMismatch => "tenant_mismatch",
            Self::Overloaded => "overloaded",
            Self::DeniedByPolicy => "denied_by_policy",
            Self::PolicyRevoked => "policy_revoked",
            Self::AccessRevoked => "access_revoked",
            Self::NotFound => "not_found",
            Self::AlreadyTerminal => "already_terminal",
            Self::TransientIo => "transient_io",
            Self::RateLimited => "rate_limited",
            Self::IntegrityViolation => "integrity_violation",
            Self::Timeout => "timeout",
            Self::HandlerFault => "handler_fault",
            Self::ConfigInvalid => "config_invalid",
            Self::Internal => "internal",
        }
    }

    /// Returns `true` if the Runtime's saga policy may retry this class.
    ///
    /// Only `transient_io` and `rate_limited` are retriable; everything
    /// else compensates and terminates.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::TransientIo | Self::RateLimited)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FabricError
// ---------------------------------------------------------------------------

/// Unified fabric error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use fab_error::{ErrorCode, FabricError};
///
/// let err = FabricError::new(ErrorCode::Timeout, "exceeded 60 s budget")
///     .with_context("intent_type", "parse_content")
///     .with_context("budget_secs", 60);
/// ```
pub struct FabricError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl FabricError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Shorthand for `self.code.is_retriable()`.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.code.is_retriable()
    }

    /// Sanitized wire form: code, message, and context, never the source
    /// chain, which may carry raw infrastructure detail.
    #[must_use]
    pub fn to_wire(&self) -> WireError {
        WireError {
            code: self.code,
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }

    // -- Convenience constructors for the common codes --------------------

    /// `invalid_parameters` with the given detail.
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameters, message)
    }

    /// `unknown_intent_type` naming the missing type.
    pub fn unknown_intent_type(intent_type: impl Into<String>) -> Self {
        let intent_type = intent_type.into();
        Self::new(
            ErrorCode::UnknownIntentType,
            format!("intent type '{intent_type}' is not registered"),
        )
        .with_context("intent_type", intent_type)
    }

    /// `denied_by_policy` with the deny reason.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeniedByPolicy, reason)
    }

    /// `not_found` for the named resource.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// `internal` wrapping an unclassified failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Debug for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FabricError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("context", &self.context)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for FabricError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// WireError
// ---------------------------------------------------------------------------

/// The serializable projection of a [`FabricError`].
///
/// This is what terminal WAL events and HTTP error bodies carry. The
/// source chain is deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WireError {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Structured diagnostic context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<&FabricError> for WireError {
    fn from(err: &FabricError) -> Self {
        err.to_wire()
    }
}

/// Convenience alias used throughout the fabric crates.
pub type Result<T, E = FabricError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::InvalidParameters,
        ErrorCode::UnknownIntentType,
        ErrorCode::TenantMismatch,
        ErrorCode::Overloaded,
        ErrorCode::DeniedByPolicy,
        ErrorCode::PolicyRevoked,
        ErrorCode::AccessRevoked,
        ErrorCode::NotFound,
        ErrorCode::AlreadyTerminal,
        ErrorCode::TransientIo,
        ErrorCode::RateLimited,
        ErrorCode::IntegrityViolation,
        ErrorCode::Timeout,
        ErrorCode::HandlerFault,
        ErrorCode::ConfigInvalid,
        ErrorCode::Internal,
    ];

    #[test]
    fn codes_serialize_as_their_stable_strings() {
        for code in ALL_CODES {
            let json = serde_json::to_string(code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn codes_roundtrip_through_serde() {
        for code in ALL_CODES {
            let json = serde_json::to_string(code).unwrap();
            let back: ErrorCode = serde_json::from_str(&json).unwrap();
            assert_eq!(&back, code);
        }
    }

    #[test]
    fn only_storage_codes_are_retriable() {
        for code in ALL_CODES {
            let expected = matches!(code, ErrorCode::TransientIo | ErrorCode::RateLimited);
            assert_eq!(code.is_retriable(), expected, "{code} retriability");
        }
    }

    #[test]
    fn every_code_has_a_category() {
        for code in ALL_CODES {
            // Display for category must be non-empty and lowercase.
            let cat = code.category().to_string();
            assert!(!cat.is_empty());
            assert_eq!(cat, cat.to_lowercase());
        }
    }

    #[test]
    fn admission_codes_group_together() {
        assert_eq!(
            ErrorCode::InvalidParameters.category(),
            ErrorCategory::Admission
        );
        assert_eq!(
            ErrorCode::UnknownIntentType.category(),
            ErrorCategory::Admission
        );
        assert_eq!(ErrorCode::TenantMismatch.category(), ErrorCategory::Admission);
        assert_eq!(ErrorCode::Overloaded.category(), ErrorCategory::Admission);
    }

    #[test]
    fn builder_attaches_context() {
        let err = FabricError::new(ErrorCode::Timeout, "too slow")
            .with_context("intent_type", "parse_content")
            .with_context("budget_secs", 60);
        assert_eq!(
            err.context.get("intent_type"),
            Some(&serde_json::json!("parse_content"))
        );
        assert_eq!(err.context.get("budget_secs"), Some(&serde_json::json!(60)));
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::other("disk offline");
        let err = FabricError::new(ErrorCode::TransientIo, "blob write failed").with_source(io);
        let src = std::error::Error::source(&err).expect("source");
        assert!(src.to_string().contains("disk offline"));
    }

    #[test]
    fn wire_form_drops_the_source() {
        let io = std::io::Error::other("raw infra detail");
        let err = FabricError::new(ErrorCode::TransientIo, "blob write failed")
            .with_source(io)
            .with_context("attempt", 2);
        let wire = err.to_wire();
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["code"], "transient_io");
        assert_eq!(json["context"]["attempt"], 2);
        assert!(!json.to_string().contains("raw infra detail"));
    }

    #[test]
    fn wire_error_roundtrip() {
        let wire = WireError {
            code: ErrorCode::HandlerFault,
            message: "boom".into(),
            context: BTreeMap::new(),
        };
        let json = serde_json::to_string(&wire).unwrap();
        let back: WireError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wire);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = FabricError::denied("tenant scope mismatch");
        let text = err.to_string();
        assert!(text.contains("denied_by_policy"));
        assert!(text.contains("tenant scope mismatch"));
    }

    #[test]
    fn convenience_constructors_use_expected_codes() {
        assert_eq!(
            FabricError::invalid_parameters("x").code,
            ErrorCode::InvalidParameters
        );
        assert_eq!(
            FabricError::unknown_intent_type("nope").code,
            ErrorCode::UnknownIntentType
        );
        assert_eq!(FabricError::denied("x").code, ErrorCode::DeniedByPolicy);
        assert_eq!(FabricError::not_found("x").code, ErrorCode::NotFound);
        assert_eq!(FabricError::internal("x").code, ErrorCode::Internal);
    }

    #[test]
    fn unknown_intent_type_names_the_type() {
        let err = FabricError::unknown_intent_type("ingest_file_v2");
        assert!(err.message.contains("ingest_file_v2"));
        assert_eq!(
            err.context.get("intent_type"),
            Some(&serde_json::json!("ingest_file_v2"))
        );
    }
}
