// Tagged error type for the request layer; Display is the single message shown to users.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Canonical copy for connectivity failures.
pub const NETWORK_ERROR_MESSAGE: &str =
    "Network error. Please check your connection and try again.";

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// No response was received.
    #[error("{}", NETWORK_ERROR_MESSAGE)]
    Network { detail: String },

    /// The request was abandoned after a deadline.
    #[error("Request timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// A response arrived with a status outside 2xx.
    #[error("{}", status_message(*status, message.as_deref()))]
    Status {
        status: StatusCode,
        message: Option<String>,
    },

    /// The response body could not be decoded into the expected shape.
    #[error("Invalid response from server: {0}")]
    Decode(String),

    /// A failure reported as a plain message (validation, upload flow, ...).
    #[error("{0}")]
    Application(String),
}

impl ApiError {
    /// The human-readable message carried across the client boundary.
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network {
                detail: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

/// Fixed copy for status codes callers are known to surface directly.
pub fn well_known_status_message(status: StatusCode) -> Option<&'static str> {
    match status.as_u16() {
        401 => Some("Your session has expired. Please log in again."),
        403 => Some("You do not have permission to perform this action."),
        404 => Some("The requested resource was not found."),
        409 => Some("This item already exists or conflicts with existing data."),
        422 => Some("The submitted data is invalid. Please check your input."),
        500..=599 => Some("Server error. Please try again later."),
        _ => None,
    }
}

/// Message for a non-2xx response: server message, then well-known copy, then the status line.
pub fn status_message(status: StatusCode, extracted: Option<&str>) -> String {
    if let Some(message) = extracted {
        return message.to_string();
    }
    if let Some(message) = well_known_status_message(status) {
        return message.to_string();
    }
    match status.canonical_reason() {
        Some(reason) => format!("HTTP error {} {}", status.as_u16(), reason),
        None => format!("HTTP error {}", status.as_u16()),
    }
}
