//! Tasker error types
//!
//! Every error carries a stable [`Error::kind`] string and a structured
//! [`Error::details`] payload so callers can inspect failures
//! programmatically instead of parsing the display message.

use crate::rpc::{ApiRequest, ApiResponse};
use serde_json::{json, Value};
use thiserror::Error;

/// Tasker error type
#[derive(Error, Debug)]
pub enum Error {
    /// No correlated response arrived within the timeout window
    #[error("Request timed out after {timeout_ms}ms: {}", request.action)]
    RequestTimeout {
        request: ApiRequest,
        timeout_ms: u64,
    },

    /// The platform answered with a non-success status code
    #[error("API error: {}", response.message().unwrap_or("API error"))]
    Api {
        request: ApiRequest,
        response: ApiResponse,
    },

    /// A materialized file exceeded the configured ceiling
    #[error("Payload too large: {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { size: u64, max: u64 },

    /// A file could not be read or downloaded
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Transport write or connection error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Adapter lifecycle or registry error
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// The adapter was destroyed while the request was in flight
    #[error("Adapter destroyed with request in flight")]
    Destroyed,

    /// Gateway error
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::RequestTimeout { .. } => "RequestTimeout",
            Error::Api { .. } => "ApiError",
            Error::PayloadTooLarge { .. } => "PayloadTooLarge",
            Error::Fetch(_) | Error::Http(_) => "FetchError",
            Error::Transport(_) => "TransportError",
            Error::Adapter(_) => "AdapterError",
            Error::Destroyed => "Destroyed",
            Error::Gateway(_) => "GatewayError",
            Error::Config(_) => "ConfigError",
            Error::Io(_) => "IoError",
            Error::Serialization(_) => "SerializationError",
            Error::Internal(_) => "InternalError",
        }
    }

    /// Structured details for programmatic inspection.
    pub fn details(&self) -> Value {
        match self {
            Error::RequestTimeout {
                request,
                timeout_ms,
            } => json!({ "request": request, "timeout": timeout_ms }),
            Error::Api { request, response } => json!({ "request": request, "error": response }),
            Error::PayloadTooLarge { size, max } => json!({ "size": size, "max": max }),
            other => json!({ "message": other.to_string() }),
        }
    }
}

/// Result type alias for Tasker operations
pub type Result<T> = std::result::Result<T, Error>;
