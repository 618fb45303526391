use serde::{Deserialize, Serialize};

/// A single schema-validation failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    /// JSON pointer-ish path into the offending input (e.g. `/action`).
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Shared error type used across all drost crates.
///
/// Every failed operation surfaces as `{ok:false, code, message, issues?}`
/// on the wire; [`Error::code`] is that `code` field.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("turn already in progress for session {0}")]
    TurnInProgress(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("denied by policy: {0}")]
    PolicyDenied(String),

    #[error("path '{path}' is outside the mutable roots")]
    PathOutsideRoots { path: String },

    #[error("provider {provider}: {message}")]
    ProviderTransport { provider: String, message: String },

    #[error("provider {provider} auth: {message}")]
    ProviderAuth { provider: String, message: String },

    #[error("provider {provider} timed out after {elapsed_ms}ms")]
    ProviderTimeout { provider: String, elapsed_ms: u64 },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("{0}")]
    BudgetExceeded(String),

    #[error("lock conflict: {0}")]
    LockConflict(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("Gateway is stopping")]
    GatewayStopping,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable wire code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::UnknownSession(_) => "unknown_session",
            Error::UnknownProvider(_) => "unknown_provider",
            Error::TurnInProgress(_) => "turn_in_progress",
            Error::ToolNotFound(_) => "tool_not_found",
            Error::Validation { .. } => "validation_error",
            Error::PolicyDenied(_) => "policy_denied",
            Error::PathOutsideRoots { .. } => "path_outside_roots",
            Error::ProviderTransport { .. } => "provider_transport",
            Error::ProviderAuth { .. } => "provider_auth",
            Error::ProviderTimeout { .. } => "provider_timeout",
            Error::Cancelled(_) => "cancelled",
            Error::BudgetExceeded(_) => "budget_exceeded",
            Error::LockConflict(_) => "lock_conflict",
            Error::Corrupt(_) => "corrupt",
            Error::Conflict(_) => "conflict",
            Error::GatewayStopping => "gateway_stopping",
            Error::Config(_) => "config_error",
            Error::Other(_) => "internal_error",
        }
    }

    /// Whether the failover machinery may retry after this error.
    ///
    /// Transport failures (including 5xx and rate limiting, which the
    /// provider layer folds into `ProviderTransport`) and timeouts are
    /// retryable; auth and validation are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ProviderTransport { .. } | Error::ProviderTimeout { .. }
        )
    }

    /// Validation issues attached to this error, if any.
    pub fn issues(&self) -> Option<&[ValidationIssue]> {
        match self {
            Error::Validation { issues, .. } => Some(issues),
            _ => None,
        }
    }

    pub fn validation(message: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        Error::Validation {
            message: message.into(),
            issues,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::UnknownSession("s".into()).code(), "unknown_session");
        assert_eq!(Error::GatewayStopping.code(), "gateway_stopping");
        assert_eq!(
            Error::validation("bad", vec![]).code(),
            "validation_error"
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::ProviderTransport {
            provider: "p".into(),
            message: "HTTP 503".into()
        }
        .is_retryable());
        assert!(Error::ProviderTimeout {
            provider: "p".into(),
            elapsed_ms: 100
        }
        .is_retryable());
        assert!(!Error::ProviderAuth {
            provider: "p".into(),
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!Error::Cancelled("turn".into()).is_retryable());
    }
}
