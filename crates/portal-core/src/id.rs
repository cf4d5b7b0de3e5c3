//! Identity types for PORTAL protocol
//!
//! Every interface participant is addressed by the endpoint (process
//! connection to the scene-graph authority) that owns it and the node id
//! inside that endpoint's scene graph.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{PortalError, PortalResult};

/// Endpoint identity - one connection to the scene-graph authority
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub u32);

impl EndpointId {
    pub const ZERO: EndpointId = EndpointId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        EndpointId(id)
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self.0)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node identity - unique within one endpoint's scene graph
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const ZERO: NodeId = NodeId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        NodeId(id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of one node owned by one endpoint.
///
/// Equality is structural: two addresses match when both the endpoint and
/// the node agree. This is the join key for every interface lookup.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointAddr {
    #[serde(rename = "endpointId")]
    pub endpoint: EndpointId,
    #[serde(rename = "nodeId")]
    pub node: NodeId,
}

impl EndpointAddr {
    #[inline]
    pub fn new(endpoint: EndpointId, node: NodeId) -> Self {
        EndpointAddr { endpoint, node }
    }

    /// Shorthand for tests and tooling that work with raw numbers
    #[inline]
    pub fn from_raw(endpoint: u32, node: u32) -> Self {
        EndpointAddr::new(EndpointId(endpoint), NodeId(node))
    }

    /// Structural match, the same comparison `==` performs
    #[inline]
    pub fn matches(&self, other: &EndpointAddr) -> bool {
        self.endpoint == other.endpoint && self.node == other.node
    }
}

impl fmt::Debug for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Addr({}:{})", self.endpoint.0, self.node.0)
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.endpoint.0, self.node.0)
    }
}

/// Interface name of the form `name@version`.
///
/// Names are compared by exact value; `grab@1` never matches `grab@2` or
/// `grab`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName(String);

impl InterfaceName {
    /// Create an interface name, rejecting empty strings
    pub fn new(name: impl Into<String>) -> PortalResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PortalError::InvalidInterfaceName(name));
        }
        Ok(InterfaceName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the last `@`, or the whole name
    pub fn name(&self) -> &str {
        match self.0.rsplit_once('@') {
            Some((name, _)) => name,
            None => &self.0,
        }
    }

    /// The part after the last `@`, if present
    pub fn version(&self) -> Option<&str> {
        self.0.rsplit_once('@').map(|(_, version)| version)
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        InterfaceName::new(value)
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = PortalError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        InterfaceName::new(value)
    }
}

impl From<InterfaceName> for String {
    fn from(value: InterfaceName) -> Self {
        value.0
    }
}

impl PartialEq<str> for InterfaceName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for InterfaceName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Debug for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iface({})", self.0)
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
