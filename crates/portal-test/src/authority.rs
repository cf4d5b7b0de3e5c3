//! Simulated scene-graph authority
//!
//! Stands in for the remote side of PORTAL in tests. It keeps the set of
//! started pairings, which of them are locked, and a world pose per node.
//! Requests arriving through an attached sink are answered immediately;
//! notifications are pushed into the inbound channel of the endpoint that
//! owns the target node.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use portal_core::{
    EndpointAddr, EndpointId, InterfaceName, LockResult, NodeTransform, PortalError, PortalResult,
};
use portal_runtime::EntityNode;
use portal_transport::{EnvelopeReceiver, EnvelopeSender, MessageSink};
use portal_wire::{Body, Envelope, Notification, Request, Response};

/// One started pairing as the authority sees it
#[derive(Clone, Debug, PartialEq)]
pub struct Pairing {
    pub transmitter: EndpointAddr,
    pub receiver: EndpointAddr,
    pub iface: InterfaceName,
    pub transmitter_from_receiver: NodeTransform,
    pub locked: bool,
}

impl Pairing {
    fn is(&self, transmitter: &EndpointAddr, receiver: &EndpointAddr, iface: &InterfaceName) -> bool {
        self.transmitter == *transmitter && self.receiver == *receiver && self.iface == *iface
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorityStats {
    pub requests: u64,
    pub notifications: u64,
    /// Envelopes for endpoints that are not attached or not keeping up
    pub undeliverable: u64,
}

#[derive(Default)]
struct AuthorityState {
    endpoints: HashMap<EndpointId, EnvelopeSender>,
    nodes: HashMap<EndpointAddr, EntityNode>,
    poses: HashMap<EndpointAddr, NodeTransform>,
    pairings: Vec<Pairing>,
    stats: AuthorityStats,
}

impl AuthorityState {
    fn pose(&self, addr: &EndpointAddr) -> NodeTransform {
        self.poses.get(addr).copied().unwrap_or_default()
    }

    /// transmitter_from_world * world_from_receiver
    fn relative(&self, transmitter: &EndpointAddr, receiver: &EndpointAddr) -> NodeTransform {
        self.pose(transmitter).inverse().compose(&self.pose(receiver))
    }

    fn locked_by(&self, transmitter: &EndpointAddr, iface: &InterfaceName) -> Option<usize> {
        self.pairings
            .iter()
            .position(|p| p.locked && p.transmitter == *transmitter && p.iface == *iface)
    }

    fn find(
        &self,
        transmitter: &EndpointAddr,
        receiver: &EndpointAddr,
        iface: &InterfaceName,
    ) -> Option<usize> {
        self.pairings.iter().position(|p| p.is(transmitter, receiver, iface))
    }

    /// False only for a registered node that does not declare the interface
    fn receives(&self, addr: &EndpointAddr, iface: &InterfaceName) -> bool {
        self.nodes
            .get(addr)
            .map_or(true, |node| node.receives.contains(iface))
    }
}

/// Notifications to both sides of a new pairing
fn started(pairing: &Pairing, params: Option<Value>) -> Vec<Envelope> {
    both_sides(
        pairing,
        Notification::Started {
            transmitter: pairing.transmitter,
            receiver: pairing.receiver,
            iface: pairing.iface.clone(),
            transmitter_from_receiver: pairing.transmitter_from_receiver,
            params,
        },
    )
}

fn ended(pairing: &Pairing) -> Vec<Envelope> {
    both_sides(
        pairing,
        Notification::Ended {
            transmitter: pairing.transmitter,
            receiver: pairing.receiver,
            iface: pairing.iface.clone(),
            transmitter_from_receiver: Some(pairing.transmitter_from_receiver),
        },
    )
}

fn both_sides(pairing: &Pairing, notification: Notification) -> Vec<Envelope> {
    let mut out = vec![Envelope::notification(pairing.transmitter, notification.clone())];
    if pairing.receiver != pairing.transmitter {
        out.push(Envelope::notification(pairing.receiver, notification));
    }
    out
}

/// In-process authority shared by every endpoint in a test
#[derive(Default)]
pub struct SimulatedAuthority {
    state: Mutex<AuthorityState>,
}

impl SimulatedAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(SimulatedAuthority::default())
    }

    /// Connect an endpoint. Returns the sink its requests go to and the
    /// channel its responses and notifications arrive on.
    pub fn attach(self: &Arc<Self>, endpoint: EndpointId, buffer: usize) -> (Arc<dyn MessageSink>, EnvelopeReceiver) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.state.lock().endpoints.insert(endpoint, tx);
        let sink = AuthoritySink {
            authority: Arc::clone(self),
            from: endpoint,
        };
        (Arc::new(sink), rx)
    }

    /// Disconnect an endpoint; its inbound channel closes once drained
    pub fn detach(&self, endpoint: EndpointId) {
        self.state.lock().endpoints.remove(&endpoint);
    }

    pub fn stats(&self) -> AuthorityStats {
        self.state.lock().stats.clone()
    }

    pub fn pairings(&self) -> Vec<Pairing> {
        self.state.lock().pairings.clone()
    }

    pub fn pairing(
        &self,
        transmitter: EndpointAddr,
        receiver: EndpointAddr,
        iface: &InterfaceName,
    ) -> Option<Pairing> {
        let state = self.state.lock();
        state
            .find(&transmitter, &receiver, iface)
            .map(|index| state.pairings[index].clone())
    }

    /// Receiver the transmitter currently holds a lock on
    pub fn lock_holder(&self, transmitter: EndpointAddr, iface: &InterfaceName) -> Option<EndpointAddr> {
        let state = self.state.lock();
        state
            .locked_by(&transmitter, iface)
            .map(|index| state.pairings[index].receiver)
    }

    pub fn set_pose(&self, addr: EndpointAddr, world_from_node: NodeTransform) {
        self.state.lock().poses.insert(addr, world_from_node);
    }

    /// Publish an entity's node and start its initial locks
    pub fn register_entity(&self, addr: EndpointAddr, node: EntityNode) {
        let outgoing = {
            let mut state = self.state.lock();
            let mut outgoing = Vec::new();
            for lock in &node.interface_locks {
                if state.find(&addr, &lock.receiver, &lock.iface).is_some() {
                    continue;
                }
                let pairing = Pairing {
                    transmitter: addr,
                    receiver: lock.receiver,
                    iface: lock.iface.clone(),
                    transmitter_from_receiver: state.relative(&addr, &lock.receiver),
                    locked: true,
                };
                outgoing.extend(started(&pairing, lock.params.clone()));
                state.pairings.push(pairing);
            }
            state.nodes.insert(addr, node);
            outgoing
        };
        self.deliver(outgoing);
    }

    /// Start a pairing, as proximity or intersection would
    pub fn start_interface(
        &self,
        transmitter: EndpointAddr,
        receiver: EndpointAddr,
        iface: InterfaceName,
        params: Option<Value>,
    ) {
        let outgoing = {
            let mut state = self.state.lock();
            if state.find(&transmitter, &receiver, &iface).is_some() {
                return;
            }
            let pairing = Pairing {
                transmitter,
                receiver,
                transmitter_from_receiver: state.relative(&transmitter, &receiver),
                iface,
                locked: false,
            };
            let outgoing = started(&pairing, params);
            state.pairings.push(pairing);
            outgoing
        };
        self.deliver(outgoing);
    }

    /// End a pairing; returns false when it was not started
    pub fn end_interface(&self, transmitter: EndpointAddr, receiver: EndpointAddr, iface: &InterfaceName) -> bool {
        let outgoing = {
            let mut state = self.state.lock();
            let Some(index) = state.find(&transmitter, &receiver, iface) else {
                return false;
            };
            let pairing = state.pairings.remove(index);
            ended(&pairing)
        };
        self.deliver(outgoing);
        true
    }

    /// Report a new relative transform to both sides, each in its own frame
    pub fn update_transform(
        &self,
        transmitter: EndpointAddr,
        receiver: EndpointAddr,
        iface: &InterfaceName,
        transmitter_from_receiver: NodeTransform,
    ) -> bool {
        let outgoing = {
            let mut state = self.state.lock();
            let Some(index) = state.find(&transmitter, &receiver, iface) else {
                return false;
            };
            state.pairings[index].transmitter_from_receiver = transmitter_from_receiver;

            let mut outgoing = Vec::new();
            for (destination, peer, destination_from_peer) in [
                (transmitter, receiver, transmitter_from_receiver),
                (receiver, transmitter, transmitter_from_receiver.inverse()),
            ] {
                let subscribed = state
                    .nodes
                    .get(&destination)
                    .map_or(true, |node| node.notify_on_transform_change);
                if subscribed {
                    outgoing.push(Envelope::notification(
                        destination,
                        Notification::TransformUpdated {
                            destination,
                            peer,
                            iface: iface.clone(),
                            destination_from_peer,
                        },
                    ));
                }
            }
            outgoing
        };
        self.deliver(outgoing);
        true
    }

    /// Answer one request; the envelopes are the notifications it caused
    pub fn process(&self, request: &Request) -> (Response, Vec<Envelope>) {
        let mut state = self.state.lock();
        state.stats.requests += 1;

        match request {
            Request::Lock {
                transmitter,
                receiver,
                iface,
            } => {
                let result = match state.find(transmitter, receiver, iface) {
                    None => LockResult::InterfaceNotFound,
                    Some(_) if state.locked_by(transmitter, iface).is_some() => {
                        LockResult::AlreadyLocked
                    }
                    Some(index) => {
                        state.pairings[index].locked = true;
                        LockResult::Success
                    }
                };
                (Response::Lock { result }, Vec::new())
            }
            Request::Unlock {
                transmitter,
                receiver,
                iface,
            } => {
                let result = match state.locked_by(transmitter, iface) {
                    None => LockResult::NotLocked,
                    Some(index) if state.pairings[index].receiver != *receiver => {
                        LockResult::InterfaceReceiverMismatch
                    }
                    Some(index) => {
                        state.pairings[index].locked = false;
                        LockResult::Success
                    }
                };
                (Response::Unlock { result }, Vec::new())
            }
            Request::Relock {
                transmitter,
                old_receiver,
                new_receiver,
                iface,
            } => {
                let index = match state.locked_by(transmitter, iface) {
                    None => {
                        return (
                            Response::Relock {
                                result: LockResult::NotLocked,
                            },
                            Vec::new(),
                        )
                    }
                    Some(index) => index,
                };
                let result = if state.pairings[index].receiver != *old_receiver {
                    LockResult::InterfaceReceiverMismatch
                } else if !state.receives(new_receiver, iface) {
                    LockResult::InterfaceNameMismatch
                } else {
                    LockResult::Success
                };
                if result != LockResult::Success {
                    return (Response::Relock { result }, Vec::new());
                }

                // the lock moves without ever being released
                let old = state.pairings.remove(index);
                let mut outgoing = ended(&old);
                if let Some(existing) = state.find(transmitter, new_receiver, iface) {
                    let existing = state.pairings.remove(existing);
                    outgoing.extend(ended(&existing));
                }
                let fresh = Pairing {
                    transmitter: *transmitter,
                    receiver: *new_receiver,
                    iface: iface.clone(),
                    transmitter_from_receiver: state.relative(transmitter, new_receiver),
                    locked: true,
                };
                outgoing.extend(started(&fresh, None));
                state.pairings.push(fresh);
                (Response::Relock { result }, outgoing)
            }
            Request::SendEvent {
                destination,
                peer,
                iface,
                event,
            } => {
                let transform = state
                    .pairings
                    .iter()
                    .find_map(|p| {
                        if p.is(destination, peer, iface) {
                            Some(p.transmitter_from_receiver)
                        } else if p.is(peer, destination, iface) {
                            Some(p.transmitter_from_receiver.inverse())
                        } else {
                            None
                        }
                    });
                let outgoing = match transform {
                    Some(destination_from_peer) => vec![Envelope::notification(
                        *destination,
                        Notification::Event {
                            destination: *destination,
                            peer: *peer,
                            iface: iface.clone(),
                            event: event.clone(),
                            destination_from_peer: Some(destination_from_peer),
                        },
                    )],
                    None => {
                        tracing::debug!(%destination, %peer, %iface, "event for pairing that is not started");
                        Vec::new()
                    }
                };
                (Response::SendEvent, outgoing)
            }
        }
    }

    fn handle(&self, from: EndpointId, envelope: Envelope) -> PortalResult<()> {
        let Body::Request(request) = envelope.body else {
            return Err(PortalError::TransportError(format!(
                "authority only accepts requests, got {}",
                envelope.kind
            )));
        };

        let (response, mut outgoing) = self.process(&request);
        // notifications caused by a request precede its response
        outgoing.push(Envelope::response(envelope.id, response));
        self.deliver_to(from, outgoing);
        Ok(())
    }

    fn deliver(&self, envelopes: Vec<Envelope>) {
        let mut state = self.state.lock();
        for envelope in envelopes {
            let Some(target) = envelope.target else {
                continue;
            };
            Self::push(&mut state, target.endpoint, envelope);
        }
    }

    fn deliver_to(&self, requester: EndpointId, envelopes: Vec<Envelope>) {
        let mut state = self.state.lock();
        for envelope in envelopes {
            let endpoint = envelope.target.map_or(requester, |target| target.endpoint);
            Self::push(&mut state, endpoint, envelope);
        }
    }

    fn push(state: &mut AuthorityState, endpoint: EndpointId, envelope: Envelope) {
        if envelope.target.is_some() {
            state.stats.notifications += 1;
        }
        let delivered = state
            .endpoints
            .get(&endpoint)
            .map_or(false, |tx| tx.try_send(envelope).is_ok());
        if !delivered {
            state.stats.undeliverable += 1;
            tracing::debug!(%endpoint, "envelope undeliverable");
        }
    }
}

/// Requests from one attached endpoint
struct AuthoritySink {
    authority: Arc<SimulatedAuthority>,
    from: EndpointId,
}

impl MessageSink for AuthoritySink {
    fn send(&self, envelope: Envelope) -> PortalResult<()> {
        self.authority.handle(self.from, envelope)
    }
}
