//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Classified
//! failures carry a closed [`ErrorCode`] that survives unchanged up to the
//! final [`AgentError`]; everything else collapses to `INTERNAL_ERROR` with the
//! variant name and message kept in the detail.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Error codes
// =============================================================================

/// Closed error taxonomy. Serialized as SCREAMING_SNAKE_CASE strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authorization
    AuthInvalidToken,
    AuthTokenExpired,
    AuthTokenNotYetValid,
    AuthPermissionDenied,
    AuthExpedienteMismatch,
    AuthInsufficientPermissions,
    // Routing / transport
    ConnectionError,
    Timeout,
    ServerUnavailable,
    ToolNotFound,
    ToolError,
    Conflict,
    // Configuration
    AgentNotConfigured,
    // Catch-all
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AuthInvalidToken => "AUTH_INVALID_TOKEN",
            ErrorCode::AuthTokenExpired => "AUTH_TOKEN_EXPIRED",
            ErrorCode::AuthTokenNotYetValid => "AUTH_TOKEN_NOT_YET_VALID",
            ErrorCode::AuthPermissionDenied => "AUTH_PERMISSION_DENIED",
            ErrorCode::AuthExpedienteMismatch => "AUTH_EXPEDIENTE_MISMATCH",
            ErrorCode::AuthInsufficientPermissions => "AUTH_INSUFFICIENT_PERMISSIONS",
            ErrorCode::ConnectionError => "CONNECTION_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ServerUnavailable => "SERVER_UNAVAILABLE",
            ErrorCode::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorCode::ToolError => "TOOL_ERROR",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::AgentNotConfigured => "AGENT_NOT_CONFIGURED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Authorization family (`AUTH_*`).
    pub fn is_auth(self) -> bool {
        matches!(
            self,
            ErrorCode::AuthInvalidToken
                | ErrorCode::AuthTokenExpired
                | ErrorCode::AuthTokenNotYetValid
                | ErrorCode::AuthPermissionDenied
                | ErrorCode::AuthExpedienteMismatch
                | ErrorCode::AuthInsufficientPermissions
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Structured error object
// =============================================================================

/// Error object returned to callers inside an execution result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentError {
    #[serde(rename = "codigo")]
    pub code: ErrorCode,
    #[serde(rename = "mensaje")]
    pub message: String,
    #[serde(rename = "detalle", default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AgentError {
    /// Build an error object. An empty message is replaced by the code's
    /// name so that message and detail are never both empty.
    pub fn new(code: ErrorCode, message: impl Into<String>, detail: Option<String>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = code.as_str().to_string();
        }
        Self {
            code,
            message,
            detail: detail.filter(|d| !d.is_empty()),
        }
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

// =============================================================================
// Error enum
// =============================================================================

/// Main error enum for the agent back-office.
#[derive(Error, Debug)]
pub enum Error {
    /// Credential or permission failures (`AUTH_*`).
    #[error("[{code}] {message}")]
    Auth {
        code: ErrorCode,
        message: String,
        detail: Option<String>,
    },

    /// Transport-level failures (`CONNECTION_ERROR`, `TIMEOUT`, `SERVER_UNAVAILABLE`).
    #[error("[{code}] {message}")]
    Connection {
        code: ErrorCode,
        message: String,
        detail: Option<String>,
    },

    /// Operation-level failures (`TOOL_NOT_FOUND`, `TOOL_ERROR`, `CONFLICT`).
    #[error("[{code}] {message}")]
    Tool {
        code: ErrorCode,
        message: String,
        detail: Option<String>,
    },

    /// Unknown task name.
    #[error("task not configured: {0}")]
    AgentNotConfigured(String),

    /// Wall-clock budget exhausted.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Resource budget exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse errors.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Auth { code, .. } | Error::Connection { code, .. } | Error::Tool { code, .. } => {
                *code
            }
            Error::AgentNotConfigured(_) => ErrorCode::AgentNotConfigured,
            Error::Timeout(_) => ErrorCode::Timeout,
            Error::Config(_)
            | Error::QuotaExceeded(_)
            | Error::Internal(_)
            | Error::Serialization(_)
            | Error::Yaml(_)
            | Error::Io(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the failure may succeed on retry (concurrent modification).
    pub fn is_retriable(&self) -> bool {
        self.code() == ErrorCode::Conflict
    }

    /// Variant name, kept in the detail of unclassified failures.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Auth { .. } => "Auth",
            Error::Connection { .. } => "Connection",
            Error::Tool { .. } => "Tool",
            Error::AgentNotConfigured(_) => "AgentNotConfigured",
            Error::Timeout(_) => "Timeout",
            Error::Config(_) => "Config",
            Error::QuotaExceeded(_) => "QuotaExceeded",
            Error::Internal(_) => "Internal",
            Error::Serialization(_) => "Serialization",
            Error::Yaml(_) => "Yaml",
            Error::Io(_) => "Io",
        }
    }

    /// Convert to the structured error object returned to callers.
    pub fn to_agent_error(&self) -> AgentError {
        match self {
            Error::Auth {
                code,
                message,
                detail,
            }
            | Error::Connection {
                code,
                message,
                detail,
            }
            | Error::Tool {
                code,
                message,
                detail,
            } => AgentError::new(*code, message.clone(), detail.clone()),
            Error::AgentNotConfigured(msg) => AgentError::new(
                ErrorCode::AgentNotConfigured,
                "task type not configured",
                Some(msg.clone()),
            ),
            Error::Timeout(msg) => {
                AgentError::new(ErrorCode::Timeout, msg.clone(), None)
            }
            other => AgentError::new(
                ErrorCode::InternalError,
                format!("internal system error: {}", other.kind_name()),
                Some(format!("{}: {}", other.kind_name(), other)),
            ),
        }
    }
}

// Convenience constructors
impl Error {
    pub fn auth(code: ErrorCode, message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Auth {
            code,
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn connection(
        code: ErrorCode,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::Connection {
            code,
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn tool(code: ErrorCode, message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Tool {
            code,
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn agent_not_configured(msg: impl Into<String>) -> Self {
        Self::AgentNotConfigured(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
