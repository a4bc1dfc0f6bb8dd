//! Unified error handling for the route-suffer library.
//!
//! Only external I/O and configuration problems surface as errors. Missing
//! wind or elevation data degrades to neutral values and never reaches this
//! type, and a route too short to score yields an empty result instead.

use thiserror::Error;

/// Unified error type for route-suffer operations.
///
/// `Clone` so a single failed fetch can be delivered to every caller that
/// was waiting on the same coordinate key.
#[derive(Debug, Clone, Error)]
pub enum SufferError {
    /// Forecast or elevation provider was unreachable or returned non-2xx
    #[error("{}", http_message(.message, .status_code))]
    Http {
        message: String,
        status_code: Option<u16>,
    },
    /// Provider response could not be decoded
    #[error("Parse error: {message}")]
    Parse { message: String },
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
    /// A pooled task panicked or was cancelled by the runtime
    #[error("Task failed: {message}")]
    TaskFailed { message: String },
    /// The caller that owned an in-flight request dropped it before completion
    #[error("In-flight request for {key} was abandoned")]
    Abandoned { key: String },
    /// A query coordinate was NaN or infinite
    #[error("Invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },
    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn http_message(message: &str, status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!("HTTP error ({}): {}", code, message),
        None => format!("HTTP error: {}", message),
    }
}

impl SufferError {
    /// Build an HTTP error with an optional status code.
    pub fn http(message: impl Into<String>, status_code: Option<u16>) -> Self {
        SufferError::Http {
            message: message.into(),
            status_code,
        }
    }

    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        SufferError::Config {
            message: message.into(),
        }
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SufferError::Http { status_code, .. } => match status_code {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            SufferError::Abandoned { .. } | SufferError::TaskFailed { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SufferError {
    fn from(err: serde_json::Error) -> Self {
        SufferError::Parse {
            message: err.to_string(),
        }
    }
}

/// Result type alias for route-suffer operations.
pub type Result<T> = std::result::Result<T, SufferError>;

/// Extension trait for converting Option to SufferError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error naming the missing field.
    fn ok_or_missing(self, field: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_missing(self, field: &str) -> Result<T> {
        self.ok_or_else(|| SufferError::Parse {
            message: format!("missing field '{}'", field),
        })
    }
}
