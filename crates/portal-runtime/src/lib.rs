//! PORTAL Runtime - Client-side interface negotiation
//!
//! This crate implements the local half of PORTAL:
//! - Active interfaces (lock, unlock, relock, events, transform tracking)
//! - Per-entity dispatch of authority notifications
//! - The endpoint that owns the request client and routes inbound envelopes
//! - Runtime configuration and logging setup

pub mod config;
pub mod endpoint;
pub mod entity;
pub mod interface;
pub mod logging;

pub use config::*;
pub use endpoint::*;
pub use entity::*;
pub use interface::*;
pub use logging::*;
