//! Error handling for the Visor authorization engine.
//!
//! This module provides:
//! - A single error type with machine-readable codes
//! - Mapping of every code onto the engine's error taxonomy
//!   (authorization, validation, configuration, internal)
//! - User-safe messages kept apart from internal diagnostic messages
//! - Severity-driven logging and an error counter
//!
//! Authorization failures never reveal which organization or capability was
//! involved in their user-facing message; those details go to
//! `internal_message` and the structured log only.
//!
//! # Usage
//!
//! ```rust,ignore
//! use visor_core::error::{VisorError, Result};
//!
//! fn check(org_matches: bool) -> Result<()> {
//!     if !org_matches {
//!         return Err(VisorError::organization_mismatch("org-a", "org-b"));
//!     }
//!     Ok(())
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Visor operations.
pub type Result<T> = std::result::Result<T, VisorError>;

/// Message returned to callers for every authorization failure.
pub const NOT_PERMITTED: &str = "not permitted";

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authorization (1000-1099)
    OrganizationMismatch,
    MissingContext,
    CapabilityDenied,
    InactiveUser,
    SelfEscalation,

    // Validation (2000-2099)
    UnknownPermission,
    MalformedPermission,
    MalformedRole,
    MalformedGrant,
    TraversalFailed,

    // Configuration (3000-3099)
    MissingConfiguration,
    InvalidConfiguration,

    // Internal (9000-9099)
    StoreError,
    SerializationError,
    InternalError,
}

/// The engine's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Organization mismatch, capability denied.
    Authorization,
    /// Unknown resource/action, malformed role or grant.
    Validation,
    /// Required configuration missing or empty.
    Configuration,
    /// Collaborator failures (grant store, serialization).
    Internal,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::OrganizationMismatch => 1000,
            Self::MissingContext => 1001,
            Self::CapabilityDenied => 1002,
            Self::InactiveUser => 1003,
            Self::SelfEscalation => 1004,

            Self::UnknownPermission => 2000,
            Self::MalformedPermission => 2001,
            Self::MalformedRole => 2002,
            Self::MalformedGrant => 2003,
            Self::TraversalFailed => 2004,

            Self::MissingConfiguration => 3000,
            Self::InvalidConfiguration => 3001,

            Self::StoreError => 9000,
            Self::SerializationError => 9001,
            Self::InternalError => 9002,
        }
    }

    /// Taxonomy bucket for this code.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::OrganizationMismatch
            | Self::MissingContext
            | Self::CapabilityDenied
            | Self::InactiveUser
            | Self::SelfEscalation => ErrorKind::Authorization,

            Self::UnknownPermission
            | Self::MalformedPermission
            | Self::MalformedRole
            | Self::MalformedGrant
            | Self::TraversalFailed => ErrorKind::Validation,

            Self::MissingConfiguration | Self::InvalidConfiguration => ErrorKind::Configuration,

            Self::StoreError | Self::SerializationError | Self::InternalError => {
                ErrorKind::Internal
            }
        }
    }

    /// Status code a calling HTTP handler should answer with.
    pub const fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Authorization => 403,
            ErrorKind::Validation => 422,
            ErrorKind::Configuration | ErrorKind::Internal => 500,
        }
    }

    /// Category label used in logs and metrics.
    pub const fn category(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Authorization => "authorization",
            ErrorKind::Validation => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller mistakes (bad permission strings, malformed payloads)
    Low,
    /// Denied access attempts
    Medium,
    /// Misconfiguration and collaborator failures
    High,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code.kind() {
            ErrorKind::Validation => Self::Low,
            ErrorKind::Authorization => Self::Medium,
            ErrorKind::Configuration | ErrorKind::Internal => Self::High,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error. Never shown to end users.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (role, user, organization)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Visor.
#[derive(Error, Debug)]
pub struct VisorError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-facing message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for VisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl VisorError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    ///
    /// Authorization codes always get the generic [`NOT_PERMITTED`] message;
    /// whatever was passed is kept as the internal message instead.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let user_message = user_message.into();
        let (user_message, internal_message) = if code.kind() == ErrorKind::Authorization {
            (Cow::Borrowed(NOT_PERMITTED), Some(user_message.into_owned()))
        } else {
            (user_message, None)
        };
        let error = Self {
            code,
            user_message,
            internal_message,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a validation error.
    pub fn validation(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        debug_assert_eq!(code.kind(), ErrorKind::Validation);
        Self::new(code, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// Create an authorization error; `reason` is logged, never returned.
    pub fn forbidden(code: ErrorCode, reason: impl Into<String>) -> Self {
        debug_assert_eq!(code.kind(), ErrorKind::Authorization);
        Self::with_internal(code, NOT_PERMITTED, reason)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// Get the user-facing message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    pub fn is_authorization(&self) -> bool {
        self.kind() == ErrorKind::Authorization
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    internal_message = ?self.internal_message,
                    "Access denied"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Rejected input"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "visor_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Domain Constructors
// ═══════════════════════════════════════════════════════════════════════════════

impl VisorError {
    /// The request tried to address a different organization than the context.
    pub fn organization_mismatch(context_org: impl fmt::Display, requested_org: impl fmt::Display) -> Self {
        Self::forbidden(
            ErrorCode::OrganizationMismatch,
            format!("context organization {context_org} != requested organization {requested_org}"),
        )
    }

    /// No usable authenticated context (missing user, organization or role).
    pub fn missing_context(what: impl Into<String>) -> Self {
        Self::forbidden(ErrorCode::MissingContext, what)
    }

    /// A capability check failed.
    pub fn capability_denied(subject: impl fmt::Display, permission: impl fmt::Display) -> Self {
        Self::forbidden(
            ErrorCode::CapabilityDenied,
            format!("{subject} lacks {permission}"),
        )
    }

    /// A (resource, action) pair not present in the catalog.
    pub fn unknown_permission(permission: impl fmt::Display) -> Self {
        let permission = permission.to_string();
        Self::new(ErrorCode::UnknownPermission, "Unknown permission")
            .with_details(ErrorDetails::new().with_entity("permission", permission))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for VisorError {
    fn from(error: sqlx::Error) -> Self {
        Self::with_internal(ErrorCode::StoreError, "Grant store unavailable", error.to_string())
            .with_source(error)
    }
}

impl From<serde_json::Error> for VisorError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for VisorError {
    fn from(error: config::ConfigError) -> Self {
        let code = match &error {
            config::ConfigError::NotFound(_) => ErrorCode::MissingConfiguration,
            _ => ErrorCode::InvalidConfiguration,
        };
        Self::with_internal(code, "Configuration error occurred", error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_kinds() {
        assert_eq!(ErrorCode::OrganizationMismatch.kind(), ErrorKind::Authorization);
        assert_eq!(ErrorCode::CapabilityDenied.kind(), ErrorKind::Authorization);
        assert_eq!(ErrorCode::UnknownPermission.kind(), ErrorKind::Validation);
        assert_eq!(ErrorCode::MissingConfiguration.kind(), ErrorKind::Configuration);
        assert_eq!(ErrorCode::StoreError.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::OrganizationMismatch.http_status(), 403);
        assert_eq!(ErrorCode::MalformedGrant.http_status(), 422);
        assert_eq!(ErrorCode::InvalidConfiguration.http_status(), 500);
    }

    #[test]
    fn test_authorization_message_is_generic() {
        let error = VisorError::organization_mismatch("org-a", "org-b");
        assert_eq!(error.user_message(), NOT_PERMITTED);
        assert!(!error.user_message().contains("org-b"));
        assert!(error.internal_message().unwrap().contains("org-b"));
    }

    #[test]
    fn test_new_with_authorization_code_hides_message() {
        let error = VisorError::new(ErrorCode::CapabilityDenied, "lacks invoices:read");
        assert_eq!(error.user_message(), NOT_PERMITTED);
        assert_eq!(error.internal_message(), Some("lacks invoices:read"));
    }

    #[test]
    fn test_capability_denied() {
        let error = VisorError::capability_denied("user-1", "invoices:read");
        assert!(error.is_authorization());
        assert_eq!(error.code(), ErrorCode::CapabilityDenied);
        assert_eq!(error.user_message(), NOT_PERMITTED);
    }

    #[test]
    fn test_unknown_permission_details() {
        let error = VisorError::unknown_permission("rockets:launch");
        assert!(error.is_validation());
        assert_eq!(error.details().entity_type.as_deref(), Some("permission"));
        assert_eq!(error.details().entity_id.as_deref(), Some("rockets:launch"));
    }

    #[test]
    fn test_log_at_every_severity() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            VisorError::validation(ErrorCode::MalformedGrant, "Malformed grant").log();
            VisorError::capability_denied("user-1", "payroll:read").log();
            VisorError::configuration("empty financial field set").log();
        });
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::MalformedRole), ErrorSeverity::Low);
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::CapabilityDenied), ErrorSeverity::Medium);
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::MissingConfiguration), ErrorSeverity::High);
    }

    #[test]
    fn test_error_display() {
        let error = VisorError::with_internal(
            ErrorCode::StoreError,
            "Grant store unavailable",
            "connection refused",
        );
        let display = format!("{}", error);
        assert!(display.contains("StoreError"));
        assert!(display.contains("Grant store unavailable"));
        assert!(display.contains("connection refused"));
    }

    #[test]
    fn test_error_context() {
        let error = VisorError::configuration("empty administrative-name set")
            .with_context("section", "roles");
        assert!(error.is_configuration());
        assert!(error.details().context.contains_key("section"));
    }
}
