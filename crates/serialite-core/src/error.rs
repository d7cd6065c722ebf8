// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for Serialite.

use thiserror::Error;

use crate::status::Status;

/// A failed engine call: the status code plus the engine's message.
///
/// Worker threads never raise these; they return them by value so the
/// owning thread can decide how to surface them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct EngineError {
    pub status: Status,
    pub message: String,
}

impl EngineError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Result of a single engine call.
pub type EngineResult<T> = Result<T, EngineError>;

/// The primary error type delivered to continuations and error events.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SerialiteError {
    /// A non-OK status from an engine call.
    #[error("{status}: {message}")]
    Engine { status: Status, message: String },

    /// Operation attempted on a closed, finalized or not-yet-ready resource,
    /// or with a malformed parameter bundle.
    #[error("SQLITE_MISUSE: {0}")]
    Misuse(String),

    /// The operation was discarded unfired (its resource failed to
    /// initialize, or the runtime shut down before it could run).
    #[error("operation was abandoned before it completed")]
    Abandoned,

    /// Configuration errors (invalid TOML, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem or process-level I/O failures.
    #[error("io error: {0}")]
    Io(String),
}

impl SerialiteError {
    pub fn misuse(message: impl Into<String>) -> Self {
        SerialiteError::Misuse(message.into())
    }

    /// The engine status this error corresponds to.
    pub fn status(&self) -> Status {
        match self {
            SerialiteError::Engine { status, .. } => *status,
            SerialiteError::Misuse(_) => Status::MISUSE,
            SerialiteError::Abandoned => Status::ABORT,
            SerialiteError::Config(_) | SerialiteError::Io(_) => Status::ERROR,
        }
    }
}

impl From<EngineError> for SerialiteError {
    fn from(err: EngineError) -> Self {
        SerialiteError::Engine {
            status: err.status,
            message: err.message,
        }
    }
}

impl From<std::io::Error> for SerialiteError {
    fn from(err: std::io::Error) -> Self {
        SerialiteError::Io(err.to_string())
    }
}

/// Convenience alias used across the workspace.
pub type Result<T, E = SerialiteError> = std::result::Result<T, E>;
