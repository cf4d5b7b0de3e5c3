//! PORTAL Wire Protocol - Interface message vocabulary
//!
//! This crate defines what travels between an endpoint and the scene-graph
//! authority:
//! - Message type numbering
//! - Requests (lock, unlock, relock, send-event) and their responses
//! - Notifications (started, ended, event, transform-updated)
//! - Envelope framing with request ids, encoded as JSON

pub mod envelope;
pub mod kind;
pub mod message;

pub use envelope::*;
pub use kind::*;
pub use message::*;
