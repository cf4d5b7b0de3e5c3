//! Error types for PORTAL protocol
//!
//! Remote lock rejections are not errors: they come back as a
//! [`LockResult`](crate::LockResult) value. These variants cover wire,
//! configuration and transport faults only.

use thiserror::Error;

/// Core PORTAL errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Invalid interface name: {0:?}")]
    InvalidInterfaceName(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u32),

    #[error("Unknown lock result code: {0}")]
    UnknownLockResult(u32),

    // Configuration errors
    #[error("Entity included an initial interface {iface} but does not transmit that interface")]
    UndeclaredInitialLock { iface: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // Request errors
    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Request {0} timed out")]
    RequestTimedOut(u64),

    // Transport errors
    #[error("Transport closed")]
    TransportClosed,

    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Result type for PORTAL operations
pub type PortalResult<T> = Result<T, PortalError>;
