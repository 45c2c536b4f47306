//! Error types for a3s-provider

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while building, registering, or serving a provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Malformed kind or procedure schema
    #[error("Schema error: {0}")]
    Schema(String),

    /// Kind schema with no top-level entries
    #[error("Kind registration is missing entity description")]
    EmptyKind,

    /// Procedure declares an error code outside the recognized taxonomy
    #[error("Invalid error code '{code}' declared by procedure '{procedure}'")]
    InvalidErrorCode { procedure: String, code: String },

    /// Procedure or signature name cannot be routed
    #[error("Invalid procedure name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Registration attempted without a required descriptor field
    #[error("Malformed provider description. Missing: {0}")]
    MalformedDescriptor(&'static str),

    /// Callback listener could not be bound
    #[error("Failed to bind callback server to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Lifecycle operation on a background task that was never started
    #[error("Attempting to {operation} missing background task ({task})")]
    NoTask {
        operation: &'static str,
        task: String,
    },

    /// Background task created without the metadata extension its provider requires
    #[error("Attempting to create background task ({task}) without the required metadata extension")]
    MissingMetadataExtension { task: String },

    /// Handler-raised error carrying its own status code and body
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// Credential gateway call failed
    #[error("Security API error: {message}")]
    SecurityGateway {
        message: String,
        status: Option<u16>,
    },

    /// Engine answered with a non-success status
    #[error("Engine request failed with status {status}: {message}")]
    Engine { status: u16, message: String },

    /// Entity not found in the store
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Write rejected because it was based on a stale spec_version
    #[error("Spec version conflict for entity {uuid}: {message}")]
    VersionConflict { uuid: String, message: String },

    /// Operation requires a registered provider
    #[error("Provider is not registered")]
    NotRegistered,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Outbound HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else raised by a handler
    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Kind tag used when an arbitrary failure is wrapped at the dispatch boundary
pub const HANDLER_ERROR_KIND: &str = "procedure_handler_error";

/// Error raised by a procedure handler, converted verbatim into the HTTP answer
///
/// Wire shape: `{"error": {"kind", "code", "message", "errors"}}`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct InvocationError {
    /// HTTP status returned to the engine
    pub status_code: u16,

    /// Machine-readable error kind
    pub kind: String,

    /// Human-readable summary
    pub message: String,

    /// Structured details
    pub errors: Vec<Value>,
}

impl InvocationError {
    /// Create an invocation error with the given status and message
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            kind: "invocation_error".to_string(),
            message: message.into(),
            errors: Vec::new(),
        }
    }

    /// 400 for callback bodies that cannot be decoded
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message).with_kind("bad_request")
    }

    /// 401 for requests without usable authorization
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, message).with_kind("unauthorized")
    }

    /// Wrap an arbitrary failure as a generic invocation error
    pub fn from_error(status_code: u16, err: &dyn std::fmt::Display) -> Self {
        let message = err.to_string();
        Self {
            status_code,
            kind: HANDLER_ERROR_KIND.to_string(),
            errors: vec![serde_json::json!({ "message": message })],
            message,
        }
    }

    /// Override the error kind
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Attach structured details
    pub fn with_errors(mut self, errors: Vec<Value>) -> Self {
        self.errors = errors;
        self
    }

    /// Render the response body
    pub fn to_response(&self) -> Value {
        serde_json::json!({
            "error": {
                "kind": self.kind,
                "code": self.status_code,
                "message": self.message,
                "errors": self.errors,
            }
        })
    }
}

impl From<ProviderError> for InvocationError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Invocation(e) => e,
            other => InvocationError::from_error(500, &other),
        }
    }
}

impl IntoResponse for InvocationError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self.to_response())).into_response()
    }
}
