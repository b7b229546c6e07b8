//! Error types for the isolink gateway.
//!
//! All errors implement `std::error::Error` and are serializable so they can
//! be attached to management responses and structured logs.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Result type alias using LinkError as the error type.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Top-level error type for gateway and router operations.
///
/// Only `ConnectionFailure` is ever re-raised to callers, and only when the
/// adaptor's connection-failure handling flag is enabled; every other variant
/// degrades to "no response" after being logged at the point of occurrence.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum LinkError {
    /// Connect attempts exhausted, or an I/O error while connecting.
    #[error("connection failure: {}", .source.as_ref().map(|e| e.to_string()).unwrap_or_else(|| "connect attempts exhausted".to_string()))]
    ConnectionFailure {
        #[source]
        source: Option<ChannelError>,
    },

    /// No idle channel and the pool is at capacity. Fail-fast, retryable.
    #[error("channel pool exhausted: {borrowed} of {max} channels borrowed")]
    PoolExhausted { borrowed: usize, max: usize },

    /// The pool has been closed; acquire fails until it is rebuilt.
    #[error("channel pool is closed")]
    PoolClosed,

    /// I/O failure after the channel was already connected.
    #[error("exchange failed: {0}")]
    Exchange(#[from] ChannelError),

    /// Every candidate channel refused the request within the deadline.
    #[error("no candidate channel accepted the request")]
    RoutingExhausted,

    /// In-flight tasks did not drain within the shutdown grace period.
    #[error("shutdown grace period of {grace_secs}s elapsed with {remaining} task(s) still running")]
    ShutdownTimeout { grace_secs: u64, remaining: usize },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Registry lookup miss.
    #[error("no channel registered under '{name}'")]
    NotRegistered { name: String },

    /// Operation requires a started gateway.
    #[error("gateway is not started")]
    NotStarted,
}

impl LinkError {
    /// Creates a connection failure carrying its transport cause.
    pub fn connection_failure(source: ChannelError) -> Self {
        Self::ConnectionFailure {
            source: Some(source),
        }
    }

    /// Creates a connection failure with no attached cause (attempts ran out).
    pub fn connection_exhausted() -> Self {
        Self::ConnectionFailure { source: None }
    }

    /// Creates a registry miss error.
    pub fn not_registered(name: impl Into<String>) -> Self {
        Self::NotRegistered { name: name.into() }
    }

    /// Returns true for the one variant callers are expected to catch.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, LinkError::ConnectionFailure { .. })
    }

    /// Returns true if the failure is worth retrying from the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::PoolExhausted { .. }
                | LinkError::ConnectionFailure { .. }
                | LinkError::RoutingExhausted
        )
    }
}

/// Transport-level errors raised by channel implementations.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ChannelError {
    /// I/O error during connect, send, or receive
    #[error("I/O error: {kind:?}: {message}")]
    Io { kind: IoErrorKind, message: String },

    /// An operation ran past its configured timeout
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        operation: String,
        timeout_secs: u64,
    },

    /// Send or receive on a channel that is not connected
    #[error("channel is not connected")]
    NotConnected,

    /// The peer closed the connection
    #[error("connection closed by peer")]
    Closed,

    /// Message could not be encoded or decoded
    #[error("codec error: {reason}")]
    Codec { reason: String },

    /// A filter rejected the message
    #[error("message vetoed by filter '{filter}': {reason}")]
    Veto { filter: String, reason: String },

    /// Inbound frame larger than the configured bound
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
}

impl ChannelError {
    /// Creates a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_secs,
        }
    }

    /// Creates a codec error.
    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
        }
    }

    /// Creates a filter veto error.
    pub fn veto(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Veto {
            filter: filter.into(),
            reason: reason.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::Timeout { .. })
    }

    pub fn is_io(&self) -> bool {
        matches!(self, ChannelError::Io { .. })
    }
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            kind: err.kind().into(),
            message: err.to_string(),
        }
    }
}

/// Serializable version of std::io::ErrorKind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoErrorKind {
    NotFound,
    PermissionDenied,
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    NotConnected,
    AddrInUse,
    AddrNotAvailable,
    BrokenPipe,
    AlreadyExists,
    WouldBlock,
    InvalidInput,
    InvalidData,
    TimedOut,
    WriteZero,
    Interrupted,
    UnexpectedEof,
    Other,
}

impl From<io::ErrorKind> for IoErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => IoErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => IoErrorKind::PermissionDenied,
            io::ErrorKind::ConnectionRefused => IoErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset => IoErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted => IoErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected => IoErrorKind::NotConnected,
            io::ErrorKind::AddrInUse => IoErrorKind::AddrInUse,
            io::ErrorKind::AddrNotAvailable => IoErrorKind::AddrNotAvailable,
            io::ErrorKind::BrokenPipe => IoErrorKind::BrokenPipe,
            io::ErrorKind::AlreadyExists => IoErrorKind::AlreadyExists,
            io::ErrorKind::WouldBlock => IoErrorKind::WouldBlock,
            io::ErrorKind::InvalidInput => IoErrorKind::InvalidInput,
            io::ErrorKind::InvalidData => IoErrorKind::InvalidData,
            io::ErrorKind::TimedOut => IoErrorKind::TimedOut,
            io::ErrorKind::WriteZero => IoErrorKind::WriteZero,
            io::ErrorKind::Interrupted => IoErrorKind::Interrupted,
            io::ErrorKind::UnexpectedEof => IoErrorKind::UnexpectedEof,
            _ => IoErrorKind::Other,
        }
    }
}

/// Errors related to configuration.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Failed to load configuration
    #[error("failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Missing required configuration field
    #[error("missing required configuration field: {field}")]
    MissingField { field: String },

    /// Invalid configuration value
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// No builder registered for a configured kind string
    #[error("unknown {what} kind: '{name}'")]
    UnknownKind { what: String, name: String },
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown kind error, e.g. `unknown_kind("codec", "xml")`.
    pub fn unknown_kind(what: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownKind {
            what: what.into(),
            name: name.into(),
        }
    }
}
