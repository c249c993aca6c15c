//! Error types for the Stepwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] is the
//! unclassified failure that escapes an agent run.

use thiserror::Error;

/// The top-level error type for all Stepwise operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Environment errors ---
    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    // --- Cost accounting ---
    #[error("Cost tracking error: {0}")]
    CostTracking(String),

    // --- Templates ---
    #[error("Template error: {0}")]
    Template(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- I/O ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable name of the failure, used as the `type` field
    /// of `error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.kind(),
            Self::Environment(e) => e.kind(),
            Self::CostTracking(_) => "CostTrackingError",
            Self::Template(_) => "TemplateError",
            Self::Config { .. } => "ConfigError",
            Self::Serialization(_) => "SerializationError",
            Self::Io(_) => "IoError",
            Self::Internal(_) => "InternalError",
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by a model provider.
///
/// The variants mirror the failure classes the query service needs to tell
/// apart: a handful are permanent and fail immediately, the rest are
/// transient and retried with backoff (see [`ProviderError::is_retryable`]).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Server error: {message} (status: {status_code})")]
    ServerError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Unsupported parameters: {0}")]
    UnsupportedParams(String),

    #[error("Context window exceeded: {0}")]
    ContextWindowExceeded(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Interrupted by user")]
    Interrupted,
}

impl ProviderError {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ServerError { .. }
            | Self::RateLimited { .. }
            | Self::Timeout(_)
            | Self::Network(_) => true,
            Self::ApiError { .. }
            | Self::AuthenticationFailed(_)
            | Self::PermissionDenied(_)
            | Self::ModelNotFound(_)
            | Self::UnsupportedParams(_)
            | Self::ContextWindowExceeded(_)
            | Self::NotConfigured(_)
            | Self::Interrupted => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ApiError { .. } => "APIError",
            Self::ServerError { .. } => "InternalServerError",
            Self::RateLimited { .. } => "RateLimitError",
            Self::AuthenticationFailed(_) => "AuthenticationError",
            Self::PermissionDenied(_) => "PermissionDeniedError",
            Self::ModelNotFound(_) => "NotFoundError",
            Self::UnsupportedParams(_) => "UnsupportedParamsError",
            Self::ContextWindowExceeded(_) => "ContextWindowExceededError",
            Self::NotConfigured(_) => "NotConfiguredError",
            Self::Timeout(_) => "Timeout",
            Self::Network(_) => "APIConnectionError",
            Self::Interrupted => "KeyboardInterrupt",
        }
    }
}

/// Failures raised by the command-execution environment.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Command timed out after {timeout_secs}s: {command}")]
    Timeout {
        command: String,
        timeout_secs: u64,
        /// Whatever output was captured before the deadline.
        partial_output: String,
    },

    #[error("Failed to spawn command '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Working directory does not exist: {0}")]
    InvalidWorkdir(String),
}

impl EnvironmentError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "ExecutionTimeoutError",
            Self::SpawnFailed { .. } => "SpawnError",
            Self::InvalidWorkdir(_) => "InvalidWorkdirError",
        }
    }
}
