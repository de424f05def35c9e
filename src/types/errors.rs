//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use serde_json::Value;
use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the RPC core.
#[derive(Error, Debug)]
pub enum Error {
    /// Endpoint misconfiguration, e.g. binding a dispatcher twice.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A transport could not acquire its substrate (port in use, queue
    /// unreachable).
    #[error("bind error: {0}")]
    Bind(String),

    /// A request arrived before any dispatcher was bound.
    #[error("no handler bound: {0}")]
    NoHandler(String),

    /// Method resolution or handler invocation failed. Surfaced to the
    /// caller as the Response's error field, never crashes the server.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Transient I/O failure inside a delivery loop.
    #[error("substrate error: {0}")]
    Substrate(String),

    /// The remote handler returned an error payload.
    #[error("remote error: {0}")]
    Remote(Value),

    /// A call exceeded its caller-side deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Msgpack encoding/decoding errors.
    #[error("codec error: {0}")]
    Codec(String),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn bind(msg: impl Into<String>) -> Self {
        Self::Bind(msg.into())
    }

    pub fn no_handler(msg: impl Into<String>) -> Self {
        Self::NoHandler(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }

    pub fn substrate(msg: impl Into<String>) -> Self {
        Self::Substrate(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }
}

// rmp-serde splits encode and decode errors into separate types; both
// collapse into the codec variant here.
impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
