//! Error types for cal-concierge.
//!
//! One enum per subsystem. Only the front door ever sees most of them:
//! the dialogue pipeline turns provider and calendar failures into
//! response text, and the binary wraps the rest in `anyhow`.

use thiserror::Error;

/// Errors related to the Gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Errors raised by a natural-language understanding provider.
#[derive(Error, Debug)]
pub enum NluError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider request failed: {0}")]
    RequestFailed(String),

    #[error("Provider returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Provider timed out after {0}ms")]
    Timeout(u64),

    #[error("Malformed provider output: {0}")]
    Malformed(String),
}

/// Errors raised by a calendar backend.
#[derive(Error, Debug, Clone)]
pub enum CalendarError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Calendar service returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Calendar not found: {0}")]
    CalendarNotFound(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Calendar call timed out after {0}ms")]
    Timeout(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rejected: {0}")]
    Rejected(String),
}

impl CalendarError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CalendarError::ConnectionFailed(_) => true,
            CalendarError::Timeout(_) => true,
            CalendarError::BadStatus { status, .. } => *status == 429 || *status >= 500,
            CalendarError::CalendarNotFound(_) => false,
            CalendarError::AuthenticationFailed(_) => false,
            CalendarError::InvalidResponse(_) => false,
            CalendarError::Rejected(_) => false,
        }
    }
}

/// Errors related to Sessions.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("Session expired")]
    Expired,
}

/// Errors related to Configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid config value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Parse error: {0}")]
    ParseError(String),
}
