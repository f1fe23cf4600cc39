//! Error types for DocSage services
//!
//! Provides:
//! - The query-level error taxonomy surfaced by the refinement engine
//! - Collaborator failure classes used by the retry policy
//! - HTTP status code mapping and structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input errors (1xxx)
    InvalidInput,
    ValidationError,

    // Resource errors (4xxx)
    SessionNotFound,
    ScopeMissing,
    ScopeMismatch,

    // Reasoning step errors (5xxx)
    PlanningFailed,
    RetrievalFailed,
    EvaluationFailed,
    SynthesisFailed,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    EmbeddingError,
    LlmError,
    CacheError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidInput => 1001,
            ErrorCode::ValidationError => 1002,

            ErrorCode::SessionNotFound => 4001,
            ErrorCode::ScopeMissing => 4002,
            ErrorCode::ScopeMismatch => 4003,

            ErrorCode::PlanningFailed => 5001,
            ErrorCode::RetrievalFailed => 5002,
            ErrorCode::EvaluationFailed => 5003,
            ErrorCode::SynthesisFailed => 5004,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::LlmError => 8003,
            ErrorCode::CacheError => 8004,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Failure of a single call to an external collaborator.
///
/// Only `Transient` failures are retried; the other two classes are final.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Connection failures, timeouts, rate limiting, upstream 5xx
    #[error("transient failure: {0}")]
    Transient(String),

    /// The collaborator answered, but not in the required shape
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The collaborator rejected the request outright
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl CollaboratorError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Query-level errors surfaced by the engine
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Planning failed: {source}")]
    Planning { source: CollaboratorError },

    #[error("Retrieval failed: {message}")]
    Retrieval { message: String },

    #[error("Evaluation failed: {source}")]
    Evaluation { source: CollaboratorError },

    #[error("Synthesis failed: {source}")]
    Synthesis { source: CollaboratorError },

    // Request validation
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    // Resource errors
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("No document collection associated with session {session_id}")]
    ScopeMissing { session_id: String },

    #[error("Collection {collection_id} is outside the scope of session {session_id}")]
    ScopeMismatch {
        session_id: String,
        collection_id: String,
    },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("LLM service error: {message}")]
    LlmError { message: String },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        AppError::InvalidInput {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidInput { .. } => ErrorCode::InvalidInput,
            AppError::Planning { .. } => ErrorCode::PlanningFailed,
            AppError::Retrieval { .. } => ErrorCode::RetrievalFailed,
            AppError::Evaluation { .. } => ErrorCode::EvaluationFailed,
            AppError::Synthesis { .. } => ErrorCode::SynthesisFailed,
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            AppError::ScopeMissing { .. } => ErrorCode::ScopeMissing,
            AppError::ScopeMismatch { .. } => ErrorCode::ScopeMismatch,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::LlmError { .. } => ErrorCode::LlmError,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::InvalidInput { .. } => StatusCode::BAD_REQUEST,

            // 403 Forbidden
            AppError::ScopeMismatch { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::SessionNotFound { .. } => StatusCode::NOT_FOUND,

            // 422 Unprocessable Entity
            AppError::Validation { .. } | AppError::ScopeMissing { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Planning { .. }
            | AppError::Retrieval { .. }
            | AppError::Evaluation { .. }
            | AppError::Synthesis { .. }
            | AppError::EmbeddingError { .. }
            | AppError::LlmError { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::CacheError { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether the caller may sensibly retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status_code(),
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                retryable: self.is_retryable(),
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_is_client_error() {
        let err = AppError::invalid_input("question is empty");
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_step_errors_are_distinguishable_and_retryable() {
        let planning = AppError::Planning {
            source: CollaboratorError::malformed("missing search_queries"),
        };
        let synthesis = AppError::Synthesis {
            source: CollaboratorError::transient("timeout"),
        };

        assert_eq!(planning.code(), ErrorCode::PlanningFailed);
        assert_eq!(synthesis.code(), ErrorCode::SynthesisFailed);
        assert_ne!(planning.code().as_code(), synthesis.code().as_code());
        assert_eq!(planning.status_code(), StatusCode::BAD_GATEWAY);
        assert!(planning.is_retryable());
        assert!(synthesis.is_server_error());
    }

    #[test]
    fn test_session_not_found() {
        let err = AppError::SessionNotFound { id: "abc".into() };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code().as_code(), 4001);
    }

    #[test]
    fn test_scope_errors_are_distinct_client_errors() {
        let missing = AppError::ScopeMissing {
            session_id: "s".into(),
        };
        let mismatch = AppError::ScopeMismatch {
            session_id: "s".into(),
            collection_id: "c".into(),
        };

        assert_eq!(missing.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(mismatch.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(mismatch.code().as_code(), 4003);
        assert!(mismatch.is_client_error());
        assert!(!mismatch.is_retryable());
    }

    #[test]
    fn test_collaborator_error_classes() {
        assert!(CollaboratorError::transient("reset").is_transient());
        assert!(!CollaboratorError::malformed("bad json").is_transient());
        assert!(!CollaboratorError::permanent("401").is_transient());
    }
}
