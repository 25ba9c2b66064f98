//! Wire protocol (version 1)
//!
//! HTTP/1.1 with JSON bodies. Every operation is a `POST` to
//! `/v1/<operation>`; operation names match the store and channel methods.
//!
//! | Operation     | Request              | Success response           |
//! |---------------|----------------------|----------------------------|
//! | `append`      | [`WriteRequest`]     | `204 No Content`           |
//! | `overwrite`   | [`WriteRequest`]     | `204 No Content`           |
//! | `read_all`    | [`KeyRequest`]       | [`ReadAllResponse`]        |
//! | `remove`      | [`KeyRequest`]       | `204 No Content`           |
//! | `glob`        | [`GlobRequest`]      | [`GlobResponse`]           |
//! | `send_signal` | [`SendSignalRequest`]| `204 No Content`           |
//! | `ping`        | [`PingRequest`]      | [`PingResponse`]           |
//! | `heartbeats`  | [`PrefixRequest`]    | [`HeartbeatsResponse`]     |
//!
//! Failures carry a [`WireError`] body and a status derived from its kind.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};
use crate::payload::Payload;
use crate::signal::{Heartbeat, Signal, SignalValue};

/// Protocol version served under [`API_BASE`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Path prefix of every operation route.
pub const API_BASE: &str = "/v1";

/// Remote operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Append one record
    Append,
    /// Replace a log with one record
    Overwrite,
    /// Read a whole log
    ReadAll,
    /// Delete logs
    Remove,
    /// List matching keys
    Glob,
    /// Queue a signal
    SendSignal,
    /// Heartbeat and drain signals
    Ping,
    /// List heartbeats
    Heartbeats,
}

impl Operation {
    /// Every operation, in route order.
    pub const ALL: [Self; 8] = [
        Self::Append,
        Self::Overwrite,
        Self::ReadAll,
        Self::Remove,
        Self::Glob,
        Self::SendSignal,
        Self::Ping,
        Self::Heartbeats,
    ];

    /// Stable operation name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Overwrite => "overwrite",
            Self::ReadAll => "read_all",
            Self::Remove => "remove",
            Self::Glob => "glob",
            Self::SendSignal => "send_signal",
            Self::Ping => "ping",
            Self::Heartbeats => "heartbeats",
        }
    }

    /// Route path, e.g. `/v1/append`
    #[must_use]
    pub fn path(&self) -> String {
        format!("{API_BASE}/{}", self.as_str())
    }
}

/// Body of `append` and `overwrite`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Experiment prefix
    pub prefix: String,
    /// Record key
    pub key: String,
    /// Entry to write
    pub payload: Payload,
}

/// Body of `read_all` and `remove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    /// Experiment prefix
    pub prefix: String,
    /// Record key; may be empty for `remove`
    #[serde(default)]
    pub key: String,
}

/// Body of `glob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobRequest {
    /// Experiment prefix
    pub prefix: String,
    /// Shell-glob pattern
    pub pattern: String,
    /// Directory below the prefix to match in
    #[serde(default)]
    pub working_dir: String,
}

/// Body of `send_signal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendSignalRequest {
    /// Target experiment prefix
    pub prefix: String,
    /// Signal name
    pub signal: String,
    /// Optional payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<SignalValue>,
}

/// Body of `ping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    /// Experiment prefix
    pub prefix: String,
    /// Liveness key
    pub key: String,
    /// Declared interval until the next ping
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
}

/// Body of `heartbeats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRequest {
    /// Experiment prefix
    pub prefix: String,
}

/// Response of `read_all`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadAllResponse {
    /// Entries in append order
    pub entries: Vec<Payload>,
}

/// Response of `glob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobResponse {
    /// Matching keys relative to the prefix
    pub keys: Vec<String>,
}

/// Response of `ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    /// Signals drained by this ping
    pub signals: Vec<Signal>,
}

/// Response of `heartbeats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatsResponse {
    /// Recorded heartbeats sorted by key
    pub heartbeats: Vec<Heartbeat>,
}

/// Response of `GET /healthcheck`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Always `"ok"` when served
    pub status: String,
    /// Protocol version of the server
    pub protocol: u32,
}

/// Error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Error kind, mapped one-to-one onto [`Error`] variants
    pub kind: ErrorKind,
    /// Error message
    pub message: String,
}

impl From<&Error> for WireError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.message(),
        }
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        Self::from_parts(err.kind, err.message)
    }
}
