//! Error types for the master-server client.
//!
//! # Design
//! Errors are layered the same way the code is. `TransportError` comes from
//! the socket, `ParseError` from the response parser, and `HttpError` wraps
//! both for a single request round trip. `MasterServerError` is what the
//! directory operations return: it keeps the HTTP layer intact and adds the
//! protocol failures (bad status, bad JSON, wrong shape, not registered).
//!
//! None of these are retried internally. Retry policy belongs to the caller.

use std::fmt;

use thiserror::Error;

/// Which transport step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Send,
    Receive,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Connect => write!(f, "connect"),
            TransportErrorKind::Send => write!(f, "send"),
            TransportErrorKind::Receive => write!(f, "receive"),
        }
    }
}

/// A connect, send or receive failure reported by a `Transport`.
///
/// Connect failures are deliberately not subdivided: DNS errors, refusals
/// and timeouts all surface as `Connect` with the transport's diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failed: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connect,
            message: message.into(),
        }
    }

    pub fn send(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Send,
            message: message.into(),
        }
    }

    pub fn receive(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Receive,
            message: message.into(),
        }
    }
}

/// Errors produced while parsing a raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// No `\r\n\r\n` separator between headers and body.
    #[error("message does not appear to contain a body: {raw:?}")]
    MissingBodySeparator { raw: String },

    /// The status line has no numeric status code in second position.
    #[error("invalid status line: {line:?}")]
    InvalidStatusLine { line: String },

    /// A chunked body without a data line after the chunk size.
    #[error("chunked body has no data line")]
    MissingChunkData,
}

/// Errors from a single HTTP round trip.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed response: {0}")]
    Malformed(#[from] ParseError),

    #[error("request host is empty")]
    EmptyHost,

    /// The serialized request would not fit the wire buffer.
    #[error("request of {len} bytes exceeds the {max} byte limit")]
    RequestTooLarge { len: usize, max: usize },

    /// The response announced more data than the receive buffer holds.
    #[error("response exceeds the {max} byte receive buffer")]
    ResponseTooLarge { max: usize },
}

/// Errors returned by `MasterServerClient` operations.
#[derive(Debug, Error)]
pub enum MasterServerError {
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The directory answered with something other than 200.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The response body is not valid JSON.
    #[error("could not parse response: {0}")]
    JsonParse(String),

    /// The response is JSON but lacks the expected fields or types.
    #[error("invalid response from server: {0}")]
    InvalidResponseShape(String),

    /// A request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The operation needs a registration that does not exist.
    #[error("server is not registered")]
    NotRegistered,
}

impl MasterServerError {
    /// True when the failure happened on the socket rather than in the reply.
    pub fn is_transport(&self) -> bool {
        matches!(self, MasterServerError::Http(HttpError::Transport(_)))
    }
}

/// Errors from building a `MasterServerConfig` out of the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a number, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

/// Errors from talking to a `HeartbeatService` worker.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The worker thread is no longer receiving commands.
    #[error("heartbeat worker has stopped")]
    Stopped,

    #[error("heartbeat worker panicked")]
    Panicked,

    #[error("heartbeat interval must be greater than zero")]
    ZeroInterval,

    #[error("could not spawn heartbeat worker: {0}")]
    Spawn(#[from] std::io::Error),
}
