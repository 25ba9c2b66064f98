//! Error types for ml-logger
//!
//! Every failure falls into one of six kinds so callers can decide to
//! retry (`Unavailable`), skip (`NotFound`) or abort (everything else).
//! The kind survives the trip across the HTTP boundary unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// ml-logger error types
#[derive(Error, Debug)]
pub enum Error {
    /// Key resolves outside the root, is empty where it must not be, or the
    /// glob pattern is malformed
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Read of a key that has no log
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record log was observed in a state that violates write atomicity
    #[error("Conflict: {0}\nThe record log may have been modified outside ml-logger. Please report this issue.")]
    Conflict(String),

    /// Remote endpoint unreachable, timed out, or local I/O failed
    #[error("Unavailable: {message}")]
    Unavailable {
        /// Human readable description
        message: String,
        /// Underlying cause, when known locally
        #[source]
        source: Option<BoxError>,
    },

    /// Payload cannot be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Request body exceeds the server's configured `max_body`
    #[error("Too large: {0}")]
    TooLarge(String),
}

/// Serializable discriminant of [`Error`], used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`Error::InvalidKey`]
    InvalidKey,
    /// See [`Error::NotFound`]
    NotFound,
    /// See [`Error::Conflict`]
    Conflict,
    /// See [`Error::Unavailable`]
    Unavailable,
    /// See [`Error::Serialization`]
    #[serde(rename = "serialization_error")]
    Serialization,
    /// See [`Error::TooLarge`]
    TooLarge,
}

impl ErrorKind {
    /// Get the kind name as used on the wire
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidKey => "invalid_key",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Unavailable => "unavailable",
            Self::Serialization => "serialization_error",
            Self::TooLarge => "too_large",
        }
    }
}

impl Error {
    /// Build an `Unavailable` error with an attached cause.
    pub fn unavailable(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Rebuild an error from its kind and message (client side of the wire).
    #[must_use]
    pub fn from_parts(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::InvalidKey => Self::InvalidKey(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Conflict => Self::Conflict(message),
            ErrorKind::Unavailable => Self::Unavailable {
                message,
                source: None,
            },
            ErrorKind::Serialization => Self::Serialization(message),
            ErrorKind::TooLarge => Self::TooLarge(message),
        }
    }

    /// Get the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKey(_) => ErrorKind::InvalidKey,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::TooLarge(_) => ErrorKind::TooLarge,
        }
    }

    /// The message without the display decoration, as sent on the wire.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::InvalidKey(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Serialization(m)
            | Self::TooLarge(m) => m.clone(),
            Self::Unavailable { message, source } => match source {
                Some(source) => format!("{message}: {source}"),
                None => message.clone(),
            },
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::unavailable("I/O failure", err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Serialization(err.to_string());
        }
        let message = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "could not connect to logging server"
        } else {
            "request to logging server failed"
        };
        Self::unavailable(message, err)
    }
}
