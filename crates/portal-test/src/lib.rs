//! PORTAL Test Harness - Simulated authority and end-to-end scenarios
//!
//! This crate provides:
//! - A simulated scene-graph authority answering lock, unlock, relock and
//!   send-event requests
//! - Endpoint harness wiring real endpoints to the simulated authority
//! - End-to-end interface lifecycle tests

pub mod authority;
pub mod integration;

pub use authority::*;
pub use integration::*;
