//! PORTAL Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the PORTAL protocol:
//! - Identifiers (EndpointId, NodeId, EndpointAddr, InterfaceName)
//! - Interface roles and lock results
//! - Transform algebra between node coordinate frames
//! - Error taxonomy

pub mod id;
pub mod role;
pub mod transform;
pub mod error;

pub use id::*;
pub use role::*;
pub use transform::*;
pub use error::*;
