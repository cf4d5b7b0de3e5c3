//! Interface message vocabulary
//!
//! Requests flow from an endpoint to the scene-graph authority and are
//! answered by exactly one response. Notifications flow from the authority
//! to the entity they concern.
//!
//! Transforms in `Started` and `Ended` are expressed as
//! transmitter-from-receiver. Transforms in `Event` and `TransformUpdated`
//! are destination-from-peer, relative to the entity being notified.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use portal_core::{EndpointAddr, InterfaceName, LockResult, NodeTransform};

use crate::MessageType;

/// Outbound request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    Lock {
        transmitter: EndpointAddr,
        receiver: EndpointAddr,
        iface: InterfaceName,
    },
    Unlock {
        transmitter: EndpointAddr,
        receiver: EndpointAddr,
        iface: InterfaceName,
    },
    Relock {
        transmitter: EndpointAddr,
        old_receiver: EndpointAddr,
        new_receiver: EndpointAddr,
        iface: InterfaceName,
    },
    SendEvent {
        destination: EndpointAddr,
        peer: EndpointAddr,
        iface: InterfaceName,
        event: Value,
    },
}

impl Request {
    pub fn message_type(&self) -> MessageType {
        match self {
            Request::Lock { .. } => MessageType::InterfaceLock,
            Request::Unlock { .. } => MessageType::InterfaceUnlock,
            Request::Relock { .. } => MessageType::InterfaceRelock,
            Request::SendEvent { .. } => MessageType::InterfaceSendEvent,
        }
    }

    /// The response type the authority must answer with
    pub fn response_type(&self) -> MessageType {
        match self {
            Request::Lock { .. } => MessageType::InterfaceLockResponse,
            Request::Unlock { .. } => MessageType::InterfaceUnlockResponse,
            Request::Relock { .. } => MessageType::InterfaceRelockResponse,
            Request::SendEvent { .. } => MessageType::InterfaceSendEventResponse,
        }
    }

    pub fn iface(&self) -> &InterfaceName {
        match self {
            Request::Lock { iface, .. }
            | Request::Unlock { iface, .. }
            | Request::Relock { iface, .. }
            | Request::SendEvent { iface, .. } => iface,
        }
    }
}

/// Response to a request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Response {
    Lock { result: LockResult },
    Unlock { result: LockResult },
    Relock { result: LockResult },
    SendEvent,
}

impl Response {
    pub fn message_type(&self) -> MessageType {
        match self {
            Response::Lock { .. } => MessageType::InterfaceLockResponse,
            Response::Unlock { .. } => MessageType::InterfaceUnlockResponse,
            Response::Relock { .. } => MessageType::InterfaceRelockResponse,
            Response::SendEvent => MessageType::InterfaceSendEventResponse,
        }
    }

    /// Lock result carried by lock, unlock and relock responses
    pub fn lock_result(&self) -> Option<LockResult> {
        match self {
            Response::Lock { result } | Response::Unlock { result } | Response::Relock { result } => {
                Some(*result)
            }
            Response::SendEvent => None,
        }
    }
}

/// Notification pushed by the authority
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Notification {
    Started {
        transmitter: EndpointAddr,
        receiver: EndpointAddr,
        iface: InterfaceName,
        transmitter_from_receiver: NodeTransform,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    Ended {
        transmitter: EndpointAddr,
        receiver: EndpointAddr,
        iface: InterfaceName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transmitter_from_receiver: Option<NodeTransform>,
    },
    Event {
        destination: EndpointAddr,
        peer: EndpointAddr,
        iface: InterfaceName,
        event: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination_from_peer: Option<NodeTransform>,
    },
    TransformUpdated {
        destination: EndpointAddr,
        peer: EndpointAddr,
        iface: InterfaceName,
        destination_from_peer: NodeTransform,
    },
}

impl Notification {
    pub fn message_type(&self) -> MessageType {
        match self {
            Notification::Started { .. } => MessageType::InterfaceStarted,
            Notification::Ended { .. } => MessageType::InterfaceEnded,
            Notification::Event { .. } => MessageType::InterfaceEvent,
            Notification::TransformUpdated { .. } => MessageType::InterfaceTransformUpdated,
        }
    }

    pub fn iface(&self) -> &InterfaceName {
        match self {
            Notification::Started { iface, .. }
            | Notification::Ended { iface, .. }
            | Notification::Event { iface, .. }
            | Notification::TransformUpdated { iface, .. } => iface,
        }
    }
}
