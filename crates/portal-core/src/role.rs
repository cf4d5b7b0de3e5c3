//! Interface roles and lock results
//!
//! Every active interface pairs exactly one transmitter with one receiver.
//! Each side sees the pairing through its own role.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::PortalError;

/// The local entity's role in an active interface
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InterfaceRole {
    /// Neither side; only produced by a failed processor lookup
    #[default]
    Invalid,
    /// Initiates and holds the lock
    Transmitter,
    /// Target of the transmitter
    Receiver,
}

impl InterfaceRole {
    /// The role on the other side of the pairing
    pub fn opposite(self) -> Self {
        match self {
            InterfaceRole::Transmitter => InterfaceRole::Receiver,
            InterfaceRole::Receiver => InterfaceRole::Transmitter,
            InterfaceRole::Invalid => InterfaceRole::Invalid,
        }
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != InterfaceRole::Invalid
    }
}

impl fmt::Display for InterfaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterfaceRole::Invalid => "invalid",
            InterfaceRole::Transmitter => "transmitter",
            InterfaceRole::Receiver => "receiver",
        };
        f.write_str(s)
    }
}

/// Outcome of a lock, unlock or relock request.
///
/// The authority decides which member applies; the client passes the value
/// through unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
#[repr(u32)]
pub enum LockResult {
    Success = 0,
    /// The transmitter is already locked to a receiver
    AlreadyLocked = 1,
    /// Unlock or relock on a transmitter that holds no lock
    NotLocked = 2,
    /// No such active interface
    InterfaceNotFound = 3,
    /// The lock is held for a different interface
    InterfaceNameMismatch = 4,
    /// The lock is held with a different receiver
    InterfaceReceiverMismatch = 5,
    /// The requester is not allowed to perform this operation
    InvalidRole = 6,
}

impl LockResult {
    /// Parse from wire code
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(LockResult::Success),
            1 => Some(LockResult::AlreadyLocked),
            2 => Some(LockResult::NotLocked),
            3 => Some(LockResult::InterfaceNotFound),
            4 => Some(LockResult::InterfaceNameMismatch),
            5 => Some(LockResult::InterfaceReceiverMismatch),
            6 => Some(LockResult::InvalidRole),
            _ => None,
        }
    }

    /// Convert to wire code
    #[inline]
    pub fn to_code(self) -> u32 {
        self as u32
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == LockResult::Success
    }
}

impl TryFrom<u32> for LockResult {
    type Error = PortalError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        LockResult::from_code(code).ok_or(PortalError::UnknownLockResult(code))
    }
}

impl From<LockResult> for u32 {
    fn from(result: LockResult) -> Self {
        result.to_code()
    }
}

impl fmt::Display for LockResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
