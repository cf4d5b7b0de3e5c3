//! PORTAL Transport Layer - the boundary to the scene-graph authority
//!
//! This crate provides:
//! - The `MessageSink` seam for outbound envelopes
//! - Request/response correlation by request id
//! - In-process channel transport
//! - UDP transport

pub mod client;
pub mod sink;
pub mod udp;

pub use client::*;
pub use sink::*;
pub use udp::*;
