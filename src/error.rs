use std::io;
use thiserror::Error;

/// Unifies every failure the core can raise behind one type, so the reactor
/// and the client have a single catch-and-close site instead of threading
/// two error hierarchies through the call stack.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("{0}")]
    Internal(String),
}

/// A protocol violation bound to the RFC 6455 close code that must be sent
/// (or, for codes below 1000, must NOT be sent) when tearing the connection
/// down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (close code {code})")]
pub struct ProtocolError {
    pub code: u16,
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::new(close_code::PROTOCOL_ERROR, message)
    }

    pub fn too_large(message: impl Into<String>) -> Self {
        Self::new(close_code::TOO_LARGE, message)
    }

    pub fn bad_data(message: impl Into<String>) -> Self {
        Self::new(close_code::BAD_DATA, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(close_code::INTERNAL, message)
    }
}

/// A failed HTTP/1.1 upgrade negotiation, carrying the status line to echo
/// back verbatim before the connection is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("handshake failed: HTTP {status} {reason}")]
pub struct HandshakeError {
    pub status: u16,
    pub reason: String,
}

impl HandshakeError {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(400, reason.into())
    }

    pub fn too_large() -> Self {
        Self::new(413, "Request Entity Too Large")
    }
}

/// RFC 6455 §7.4.1 close codes the core may emit on the wire.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const UNHANDLED_DATA: u16 = 1003;
    pub const BAD_DATA: u16 = 1007;
    pub const POLICY: u16 = 1008;
    pub const TOO_LARGE: u16 = 1009;
    pub const EXPECTATION: u16 = 1010;
    pub const INTERNAL: u16 = 1011;
}

pub type Result<T> = std::result::Result<T, Error>;
