// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The seven public error kinds every control-plane reply is classified into.
/// Clients switch on the kind; the message is for humans.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Permission,
    Unavailable,
    Internal,
    Timeout,
}

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug)]
pub enum FlywallError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Unknown method '{0}'")]
    UnknownMethod(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("Apply hook '{name}' failed: {message}")]
    HookFailed { name: String, message: String },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("architecture mismatch: host is {host}, binary targets {binary}")]
    ArchitectureMismatch { host: String, binary: String },

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl FlywallError {
    /// Projects the error onto its public kind for the wire protocol.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlywallError::Validation(_)
            | FlywallError::ConfigParse(_)
            | FlywallError::InvalidRequest(_)
            | FlywallError::ChecksumMismatch
            | FlywallError::ArchitectureMismatch { .. } => ErrorKind::Validation,
            FlywallError::NotFound(_) | FlywallError::UnknownMethod(_) => ErrorKind::NotFound,
            FlywallError::Conflict(_) | FlywallError::InvalidState(_) => ErrorKind::Conflict,
            FlywallError::Permission(_) => ErrorKind::Permission,
            FlywallError::Unavailable(_) => ErrorKind::Unavailable,
            FlywallError::Timeout(_) => ErrorKind::Timeout,
            FlywallError::Io(_) | FlywallError::HookFailed { .. } | FlywallError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Rebuilds an error from a wire-level `(kind, message)` pair on the
    /// client side. The original variant is not recoverable, only the kind.
    pub fn from_wire(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Validation => FlywallError::Validation(message),
            ErrorKind::NotFound => FlywallError::NotFound(message),
            ErrorKind::Conflict => FlywallError::Conflict(message),
            ErrorKind::Permission => FlywallError::Permission(message),
            ErrorKind::Unavailable => FlywallError::Unavailable(message),
            ErrorKind::Timeout => FlywallError::Timeout(message),
            ErrorKind::Internal => FlywallError::Internal(message),
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for FlywallError {
    fn clone(&self) -> Self {
        match self {
            FlywallError::Io(e) => FlywallError::Io(Arc::clone(e)),
            FlywallError::Validation(s) => FlywallError::Validation(s.clone()),
            FlywallError::ConfigParse(s) => FlywallError::ConfigParse(s.clone()),
            FlywallError::NotFound(s) => FlywallError::NotFound(s.clone()),
            FlywallError::Conflict(s) => FlywallError::Conflict(s.clone()),
            FlywallError::Permission(s) => FlywallError::Permission(s.clone()),
            FlywallError::Unavailable(s) => FlywallError::Unavailable(s.clone()),
            FlywallError::Timeout(s) => FlywallError::Timeout(s.clone()),
            FlywallError::UnknownMethod(s) => FlywallError::UnknownMethod(s.clone()),
            FlywallError::InvalidRequest(s) => FlywallError::InvalidRequest(s.clone()),
            FlywallError::InvalidState(s) => FlywallError::InvalidState(s.clone()),
            FlywallError::HookFailed { name, message } => FlywallError::HookFailed {
                name: name.clone(),
                message: message.clone(),
            },
            FlywallError::ChecksumMismatch => FlywallError::ChecksumMismatch,
            FlywallError::ArchitectureMismatch { host, binary } => {
                FlywallError::ArchitectureMismatch {
                    host: host.clone(),
                    binary: binary.clone(),
                }
            }
            FlywallError::Internal(s) => FlywallError::Internal(s.clone()),
        }
    }
}

impl PartialEq for FlywallError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FlywallError::Io(e1), FlywallError::Io(e2)) => e1.to_string() == e2.to_string(),
            _ => {
                core::mem::discriminant(self) == core::mem::discriminant(other)
                    && self.to_string() == other.to_string()
            }
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for FlywallError {
    fn from(e: std::io::Error) -> Self {
        FlywallError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for FlywallError {
    fn from(e: serde_json::Error) -> Self {
        FlywallError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<toml::de::Error> for FlywallError {
    fn from(e: toml::de::Error) -> Self {
        FlywallError::ConfigParse(e.to_string())
    }
}

impl From<toml::ser::Error> for FlywallError {
    fn from(e: toml::ser::Error) -> Self {
        FlywallError::Internal(format!("Config render error: {e}"))
    }
}

impl From<uuid::Error> for FlywallError {
    fn from(e: uuid::Error) -> Self {
        FlywallError::InvalidRequest(format!("invalid id: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for FlywallError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        FlywallError::Timeout("deadline elapsed".to_string())
    }
}
