//! Error types for the advisory chat orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Session Errors
    // =============================

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Turn cancelled: {0}")]
    Cancelled(String),

    // =============================
    // External Backend Errors
    // =============================

    #[error("Generation backend error: {message}")]
    GenerationError { message: String, retryable: bool },

    #[error("Generation backend timed out after {0} ms")]
    GenerationTimeout(u64),

    #[error("Retrieval backend error: {message}")]
    RetrievalError { message: String, retryable: bool },

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Calculator error: {0}")]
    CalculatorError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Stable machine-readable code surfaced to callers
    pub fn code(&self) -> &'static str {
        match self {
            OrchestrationError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            OrchestrationError::InvalidSessionId(_) => "INVALID_SESSION_ID",
            OrchestrationError::Cancelled(_) => "CANCELLED",
            OrchestrationError::GenerationError { .. } => "GENERATION_FAILED",
            OrchestrationError::GenerationTimeout(_) => "GENERATION_TIMEOUT",
            OrchestrationError::RetrievalError { .. } => "RETRIEVAL_FAILED",
            OrchestrationError::CalculatorError(_) => "CALCULATOR_ERROR",
            OrchestrationError::ConfigError(_) => "CONFIG_ERROR",
            OrchestrationError::Internal(_) => "INTERNAL_ERROR",
            OrchestrationError::SerializationError(_) => "SERIALIZATION_ERROR",
            OrchestrationError::HttpError(_) => "HTTP_ERROR",
            OrchestrationError::IoError(_) => "IO_ERROR",
        }
    }

    /// Whether a single retry is allowed.
    ///
    /// Timeouts are ambiguous (the backend may have acted) and are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestrationError::GenerationError { retryable, .. }
            | OrchestrationError::RetrievalError { retryable, .. } => *retryable,
            OrchestrationError::HttpError(e) => e.is_connect(),
            _ => false,
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        OrchestrationError::GenerationError {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient_generation(message: impl Into<String>) -> Self {
        OrchestrationError::GenerationError {
            message: message.into(),
            retryable: true,
        }
    }
}
