//! Envelope framing for PORTAL messages
//!
//! Envelope = request id + message type + optional target address + body.
//! Requests and their responses share an id; notifications carry id zero
//! and the address of the entity they are delivered to.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use portal_core::{EndpointAddr, PortalError, PortalResult};

use crate::{MessageType, Notification, Request, Response};

/// Maximum encoded envelope size, the largest IPv4 UDP payload
pub const MAX_ENVELOPE_SIZE: usize = 65_507;

/// Request correlation id
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Id used by messages that are not part of a request/response pair
    pub const NONE: RequestId = RequestId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        RequestId(id)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Req({})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Body {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Body {
    pub fn message_type(&self) -> MessageType {
        match self {
            Body::Request(r) => r.message_type(),
            Body::Response(r) => r.message_type(),
            Body::Notification(n) => n.message_type(),
        }
    }
}

/// Complete PORTAL envelope
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: RequestId,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EndpointAddr>,
    pub body: Body,
}

impl Envelope {
    pub fn request(id: RequestId, request: Request) -> Self {
        Envelope {
            id,
            kind: request.message_type(),
            target: None,
            body: Body::Request(request),
        }
    }

    pub fn response(id: RequestId, response: Response) -> Self {
        Envelope {
            id,
            kind: response.message_type(),
            target: None,
            body: Body::Response(response),
        }
    }

    pub fn notification(target: EndpointAddr, notification: Notification) -> Self {
        Envelope {
            id: RequestId::NONE,
            kind: notification.message_type(),
            target: Some(target),
            body: Body::Notification(notification),
        }
    }

    /// Check that the declared type agrees with the body
    pub fn validate(&self) -> PortalResult<()> {
        let actual = self.body.message_type();
        if self.kind != actual {
            return Err(PortalError::InvalidWireFormat(format!(
                "envelope type {} does not match body {}",
                self.kind, actual
            )));
        }
        if matches!(self.body, Body::Notification(_)) && self.target.is_none() {
            return Err(PortalError::InvalidWireFormat(
                "notification without target".into(),
            ));
        }
        Ok(())
    }

    /// Serialize to bytes
    pub fn encode(&self) -> PortalResult<Bytes> {
        let buf =
            serde_json::to_vec(self).map_err(|e| PortalError::InvalidWireFormat(e.to_string()))?;
        if buf.len() > MAX_ENVELOPE_SIZE {
            return Err(PortalError::InvalidWireFormat(format!(
                "envelope of {} bytes exceeds {}",
                buf.len(),
                MAX_ENVELOPE_SIZE
            )));
        }
        Ok(Bytes::from(buf))
    }

    /// Parse and validate from bytes
    pub fn decode(buf: &[u8]) -> PortalResult<Self> {
        if buf.len() > MAX_ENVELOPE_SIZE {
            return Err(PortalError::InvalidWireFormat(format!(
                "envelope of {} bytes exceeds {}",
                buf.len(),
                MAX_ENVELOPE_SIZE
            )));
        }
        let envelope: Envelope =
            serde_json::from_slice(buf).map_err(|e| PortalError::InvalidWireFormat(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }
}
