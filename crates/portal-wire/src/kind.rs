//! Message type numbering
//!
//! Requests sit on even codes with their response on the following odd
//! code. Notifications use their own block.

use std::fmt;

use serde::{Deserialize, Serialize};

use portal_core::PortalError;

/// Message type carried in every envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
#[repr(u32)]
pub enum MessageType {
    // Requests and their responses
    InterfaceLock = 700,
    InterfaceLockResponse = 701,
    InterfaceUnlock = 702,
    InterfaceUnlockResponse = 703,
    InterfaceRelock = 704,
    InterfaceRelockResponse = 705,
    InterfaceSendEvent = 706,
    InterfaceSendEventResponse = 707,

    // Notifications pushed by the authority
    InterfaceStarted = 720,
    InterfaceEnded = 721,
    InterfaceEvent = 722,
    InterfaceTransformUpdated = 723,
}

impl MessageType {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            700 => Some(MessageType::InterfaceLock),
            701 => Some(MessageType::InterfaceLockResponse),
            702 => Some(MessageType::InterfaceUnlock),
            703 => Some(MessageType::InterfaceUnlockResponse),
            704 => Some(MessageType::InterfaceRelock),
            705 => Some(MessageType::InterfaceRelockResponse),
            706 => Some(MessageType::InterfaceSendEvent),
            707 => Some(MessageType::InterfaceSendEventResponse),
            720 => Some(MessageType::InterfaceStarted),
            721 => Some(MessageType::InterfaceEnded),
            722 => Some(MessageType::InterfaceEvent),
            723 => Some(MessageType::InterfaceTransformUpdated),
            _ => None,
        }
    }

    #[inline]
    pub fn to_code(self) -> u32 {
        self as u32
    }

    /// Response type paired with a request type
    pub fn response_type(self) -> Option<MessageType> {
        match self {
            MessageType::InterfaceLock => Some(MessageType::InterfaceLockResponse),
            MessageType::InterfaceUnlock => Some(MessageType::InterfaceUnlockResponse),
            MessageType::InterfaceRelock => Some(MessageType::InterfaceRelockResponse),
            MessageType::InterfaceSendEvent => Some(MessageType::InterfaceSendEventResponse),
            _ => None,
        }
    }

    pub fn is_request(self) -> bool {
        self.response_type().is_some()
    }

    pub fn is_response(self) -> bool {
        matches!(
            self,
            MessageType::InterfaceLockResponse
                | MessageType::InterfaceUnlockResponse
                | MessageType::InterfaceRelockResponse
                | MessageType::InterfaceSendEventResponse
        )
    }

    pub fn is_notification(self) -> bool {
        self.to_code() >= 720
    }
}

impl TryFrom<u32> for MessageType {
    type Error = PortalError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        MessageType::from_code(code).ok_or(PortalError::UnknownMessageType(code))
    }
}

impl From<MessageType> for u32 {
    fn from(kind: MessageType) -> Self {
        kind.to_code()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
