//! Active interfaces
//!
//! An [`ActiveInterface`] is one live pairing between a transmitter and a
//! receiver, seen from the local entity's side. The stored transform is
//! always canonical (transmitter-from-receiver) regardless of the local
//! role; [`ActiveInterface::self_from_peer`] derives the local view.
//!
//! Handles are cheap to clone and share one underlying instance.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use portal_core::{
    EndpointAddr, InterfaceName, InterfaceRole, LockResult, NodeTransform, PortalError,
    PortalResult,
};
use portal_transport::RequestClient;
use portal_wire::{Request, Response};

/// Called once when the interface ends
pub type EndedCallback = Box<dyn FnMut() + Send>;
/// Called with each event the peer sends
pub type EventCallback = Box<dyn FnMut(&Value) + Send>;
/// Called with the new self-from-peer transform
pub type TransformCallback = Box<dyn FnMut(NodeTransform) + Send>;

/// Lookup key of a live interface
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InterfaceKey {
    pub transmitter: EndpointAddr,
    pub receiver: EndpointAddr,
    pub iface: InterfaceName,
}

#[derive(Default)]
struct Callbacks {
    ended: Option<EndedCallback>,
    event: Option<EventCallback>,
    transform: Option<TransformCallback>,
}

struct InterfaceState {
    transmitter_from_receiver: NodeTransform,
    ended: bool,
}

struct InterfaceInner {
    transmitter: EndpointAddr,
    receiver: EndpointAddr,
    iface: InterfaceName,
    role: InterfaceRole,
    params: Option<Value>,
    client: Arc<RequestClient>,
    state: Mutex<InterfaceState>,
    callbacks: Mutex<Callbacks>,
}

/// One live transmitter/receiver pairing
#[derive(Clone)]
pub struct ActiveInterface {
    inner: Arc<InterfaceInner>,
}

impl ActiveInterface {
    pub(crate) fn new(
        transmitter: EndpointAddr,
        receiver: EndpointAddr,
        iface: InterfaceName,
        transmitter_from_receiver: NodeTransform,
        role: InterfaceRole,
        params: Option<Value>,
        client: Arc<RequestClient>,
    ) -> Self {
        ActiveInterface {
            inner: Arc::new(InterfaceInner {
                transmitter,
                receiver,
                iface,
                role,
                params,
                client,
                state: Mutex::new(InterfaceState {
                    transmitter_from_receiver,
                    ended: false,
                }),
                callbacks: Mutex::new(Callbacks::default()),
            }),
        }
    }

    pub fn transmitter(&self) -> EndpointAddr {
        self.inner.transmitter
    }

    pub fn receiver(&self) -> EndpointAddr {
        self.inner.receiver
    }

    pub fn iface(&self) -> &InterfaceName {
        &self.inner.iface
    }

    /// The local entity's role
    pub fn role(&self) -> InterfaceRole {
        self.inner.role
    }

    /// Application payload supplied when the interface started
    pub fn params(&self) -> Option<&Value> {
        self.inner.params.as_ref()
    }

    /// The local entity's address
    pub fn self_addr(&self) -> EndpointAddr {
        match self.inner.role {
            InterfaceRole::Transmitter => self.inner.transmitter,
            _ => self.inner.receiver,
        }
    }

    /// The other side's address
    pub fn peer(&self) -> EndpointAddr {
        match self.inner.role {
            InterfaceRole::Receiver => self.inner.transmitter,
            _ => self.inner.receiver,
        }
    }

    pub fn key(&self) -> InterfaceKey {
        InterfaceKey {
            transmitter: self.inner.transmitter,
            receiver: self.inner.receiver,
            iface: self.inner.iface.clone(),
        }
    }

    /// Most recent canonical transform
    pub fn transmitter_from_receiver(&self) -> NodeTransform {
        self.inner.state.lock().transmitter_from_receiver
    }

    /// Transform from the peer's frame into the local frame
    pub fn self_from_peer(&self) -> NodeTransform {
        let canonical = self.transmitter_from_receiver();
        match self.inner.role {
            InterfaceRole::Transmitter => canonical,
            _ => canonical.inverse(),
        }
    }

    /// True once the authority reported the interface ended
    pub fn is_ended(&self) -> bool {
        self.inner.state.lock().ended
    }

    /// True when both handles refer to the same instance
    pub fn same_instance(&self, other: &ActiveInterface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn matches(
        &self,
        transmitter: &EndpointAddr,
        receiver: &EndpointAddr,
        iface: &InterfaceName,
    ) -> bool {
        self.inner.transmitter.matches(transmitter)
            && self.inner.receiver.matches(receiver)
            && self.inner.iface == *iface
    }

    pub(crate) fn matches_destination(
        &self,
        destination: &EndpointAddr,
        peer: &EndpointAddr,
        iface: &InterfaceName,
    ) -> bool {
        self.self_addr().matches(destination)
            && self.peer().matches(peer)
            && self.inner.iface == *iface
    }

    /// Ask the authority to bind this transmitter to this receiver exclusively
    pub async fn lock(&self) -> PortalResult<LockResult> {
        self.trace_if_ended("lock");
        let response = self
            .inner
            .client
            .request(Request::Lock {
                transmitter: self.inner.transmitter,
                receiver: self.inner.receiver,
                iface: self.inner.iface.clone(),
            })
            .await?;
        lock_result(response)
    }

    /// Release a lock taken with [`lock`](Self::lock)
    pub async fn unlock(&self) -> PortalResult<LockResult> {
        self.trace_if_ended("unlock");
        let response = self
            .inner
            .client
            .request(Request::Unlock {
                transmitter: self.inner.transmitter,
                receiver: self.inner.receiver,
                iface: self.inner.iface.clone(),
            })
            .await?;
        lock_result(response)
    }

    /// Move a locked transmitter to `new_receiver` without unlocking in between
    pub async fn relock(&self, new_receiver: EndpointAddr) -> PortalResult<LockResult> {
        self.trace_if_ended("relock");
        let response = self
            .inner
            .client
            .request(Request::Relock {
                transmitter: self.inner.transmitter,
                old_receiver: self.inner.receiver,
                new_receiver,
                iface: self.inner.iface.clone(),
            })
            .await?;
        lock_result(response)
    }

    /// Deliver an event to the peer. Resolves once the authority acknowledges.
    pub async fn send_event(&self, event: Value) -> PortalResult<()> {
        self.trace_if_ended("send_event");
        let response = self
            .inner
            .client
            .request(Request::SendEvent {
                destination: self.peer(),
                peer: self.self_addr(),
                iface: self.inner.iface.clone(),
                event,
            })
            .await?;
        match response {
            Response::SendEvent => Ok(()),
            other => Err(PortalError::UnexpectedResponse {
                expected: "SendEvent".into(),
                actual: other.message_type().to_string(),
            }),
        }
    }

    pub fn on_ended<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.inner.callbacks.lock().ended = Some(Box::new(callback));
    }

    pub fn on_event<F>(&self, callback: F)
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.inner.callbacks.lock().event = Some(Box::new(callback));
    }

    pub fn on_transform_updated<F>(&self, callback: F)
    where
        F: FnMut(NodeTransform) + Send + 'static,
    {
        self.inner.callbacks.lock().transform = Some(Box::new(callback));
    }

    /// End transition: the transform is already transmitter-from-receiver.
    ///
    /// Callbacks are released afterwards; an ended instance is never reused.
    pub(crate) fn end(&self, transmitter_from_receiver: Option<NodeTransform>) {
        {
            let mut state = self.inner.state.lock();
            if let Some(transform) = transmitter_from_receiver {
                state.transmitter_from_receiver = transform;
            }
            state.ended = true;
        }

        let ended = self.inner.callbacks.lock().ended.take();
        if let Some(mut callback) = ended {
            callback();
        }
        *self.inner.callbacks.lock() = Callbacks::default();
    }

    /// Drop a stale instance without notifying the application
    pub(crate) fn retire(&self) {
        self.inner.state.lock().ended = true;
        *self.inner.callbacks.lock() = Callbacks::default();
    }

    pub(crate) fn deliver_event(&self, event: &Value, destination_from_peer: Option<NodeTransform>) {
        if let Some(transform) = destination_from_peer {
            self.store_destination_from_peer(transform);
        }

        let taken = self.inner.callbacks.lock().event.take();
        if let Some(mut callback) = taken {
            callback(event);
            let mut callbacks = self.inner.callbacks.lock();
            if callbacks.event.is_none() && !self.is_ended() {
                callbacks.event = Some(callback);
            }
        }
    }

    pub(crate) fn update_transform(&self, destination_from_peer: NodeTransform) {
        self.store_destination_from_peer(destination_from_peer);

        let taken = self.inner.callbacks.lock().transform.take();
        if let Some(mut callback) = taken {
            callback(destination_from_peer);
            let mut callbacks = self.inner.callbacks.lock();
            if callbacks.transform.is_none() && !self.is_ended() {
                callbacks.transform = Some(callback);
            }
        }
    }

    fn store_destination_from_peer(&self, destination_from_peer: NodeTransform) {
        let canonical = match self.inner.role {
            InterfaceRole::Transmitter => destination_from_peer,
            _ => destination_from_peer.inverse(),
        };
        self.inner.state.lock().transmitter_from_receiver = canonical;
    }

    fn trace_if_ended(&self, op: &str) {
        if self.is_ended() {
            tracing::debug!(iface = %self.inner.iface, op, "request on ended interface");
        }
    }
}

fn lock_result(response: Response) -> PortalResult<LockResult> {
    response
        .lock_result()
        .ok_or_else(|| PortalError::UnexpectedResponse {
            expected: "lock result".into(),
            actual: response.message_type().to_string(),
        })
}

impl fmt::Debug for ActiveInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveInterface")
            .field("transmitter", &self.inner.transmitter)
            .field("receiver", &self.inner.receiver)
            .field("iface", &self.inner.iface)
            .field("role", &self.inner.role)
            .field("ended", &self.is_ended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::{Quaternion, Vector3};
    use portal_transport::{channel, EnvelopeReceiver};
    use portal_wire::Body;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const EPS: f64 = 1e-9;

    fn a() -> EndpointAddr {
        EndpointAddr::from_raw(1, 10)
    }

    fn b() -> EndpointAddr {
        EndpointAddr::from_raw(2, 20)
    }

    fn t0() -> NodeTransform {
        NodeTransform::new(
            Vector3::new(1.0, 2.0, 3.0),
            Quaternion::from_axis_angle(Vector3::new(0.0, 1.0, 0.0), 0.7),
        )
    }

    fn make(role: InterfaceRole) -> (ActiveInterface, EnvelopeReceiver, Arc<RequestClient>) {
        let (sink, rx) = channel(16);
        let client = Arc::new(RequestClient::new(Arc::new(sink)));
        let iface = ActiveInterface::new(
            a(),
            b(),
            InterfaceName::new("grab@1").unwrap(),
            t0(),
            role,
            Some(json!({ "grip": "left" })),
            client.clone(),
        );
        (iface, rx, client)
    }

    #[test]
    fn test_transmitter_view() {
        let (iface, _rx, _client) = make(InterfaceRole::Transmitter);
        assert_eq!(iface.self_addr(), a());
        assert_eq!(iface.peer(), b());
        assert_eq!(iface.self_from_peer(), t0());
        assert_eq!(iface.params(), Some(&json!({ "grip": "left" })));
    }

    #[test]
    fn test_receiver_view() {
        let (iface, _rx, _client) = make(InterfaceRole::Receiver);
        assert_eq!(iface.self_addr(), b());
        assert_eq!(iface.peer(), a());
        assert!(iface.self_from_peer().approx_eq(&t0().inverse(), EPS));
        assert!(iface
            .self_from_peer()
            .inverse()
            .approx_eq(&iface.transmitter_from_receiver(), 1e-9));
    }

    #[test]
    fn test_receiver_stores_inverse_before_callback() {
        let (iface, _rx, _client) = make(InterfaceRole::Receiver);
        let t1 = NodeTransform::from_position(Vector3::new(5.0, 0.0, 0.0));

        let seen = Arc::new(Mutex::new(None));
        {
            let seen = seen.clone();
            let handle = iface.clone();
            iface.on_transform_updated(move |transform| {
                // state is already updated when the callback runs
                *seen.lock() = Some((transform, handle.transmitter_from_receiver()));
            });
        }

        iface.update_transform(t1);

        let (delivered, stored) = seen.lock().take().unwrap();
        assert_eq!(delivered, t1);
        assert!(stored.approx_eq(&t1.inverse(), EPS));
        assert!(iface.self_from_peer().approx_eq(&t1, EPS));
    }

    #[test]
    fn test_transmitter_stores_event_transform_verbatim() {
        let (iface, _rx, _client) = make(InterfaceRole::Transmitter);
        let t1 = NodeTransform::from_position(Vector3::new(0.0, 3.0, 0.0));
        let events = Arc::new(AtomicUsize::new(0));
        {
            let events = events.clone();
            iface.on_event(move |event| {
                assert_eq!(event["kind"], "poke");
                events.fetch_add(1, Ordering::SeqCst);
            });
        }

        iface.deliver_event(&json!({ "kind": "poke" }), Some(t1));
        iface.deliver_event(&json!({ "kind": "poke" }), None);

        assert_eq!(events.load(Ordering::SeqCst), 2);
        assert_eq!(iface.transmitter_from_receiver(), t1);
    }

    #[test]
    fn test_receiver_stores_inverse_of_event_transform() {
        let (iface, _rx, _client) = make(InterfaceRole::Receiver);
        let t1 = NodeTransform::new(
            Vector3::new(0.0, 3.0, -1.0),
            Quaternion::from_axis_angle(Vector3::new(0.0, 0.0, 1.0), 1.2),
        );

        let seen = Arc::new(Mutex::new(None));
        {
            let seen = seen.clone();
            let handle = iface.clone();
            iface.on_event(move |event| {
                *seen.lock() = Some((event.clone(), handle.transmitter_from_receiver()));
            });
        }

        iface.deliver_event(&json!({ "kind": "poke" }), Some(t1));

        let (event, stored) = seen.lock().take().unwrap();
        assert_eq!(event, json!({ "kind": "poke" }));
        assert!(stored.approx_eq(&t1.inverse(), EPS));
        assert!(iface.self_from_peer().approx_eq(&t1, EPS));

        // no transform leaves the stored one alone
        iface.deliver_event(&json!({ "kind": "poke" }), None);
        assert!(iface.transmitter_from_receiver().approx_eq(&t1.inverse(), EPS));
    }

    #[test]
    fn test_no_callback_drops_silently() {
        let (iface, _rx, _client) = make(InterfaceRole::Receiver);
        iface.deliver_event(&json!(null), None);
        iface.update_transform(NodeTransform::identity());
        assert_eq!(iface.transmitter_from_receiver(), NodeTransform::identity());
    }

    #[test]
    fn test_later_registration_replaces() {
        let (iface, _rx, _client) = make(InterfaceRole::Transmitter);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        {
            let first = first.clone();
            iface.on_event(move |_| {
                first.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let second = second.clone();
            iface.on_event(move |_| {
                second.fetch_add(1, Ordering::SeqCst);
            });
        }

        iface.deliver_event(&json!({}), None);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_reregister_itself() {
        let (iface, _rx, _client) = make(InterfaceRole::Transmitter);
        let replaced = Arc::new(AtomicUsize::new(0));
        {
            let handle = iface.clone();
            let replaced = replaced.clone();
            iface.on_event(move |_| {
                let replaced = replaced.clone();
                handle.on_event(move |_| {
                    replaced.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        iface.deliver_event(&json!({}), None);
        iface.deliver_event(&json!({}), None);
        assert_eq!(replaced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_end_stores_transform_verbatim_and_fires_once() {
        let (iface, _rx, _client) = make(InterfaceRole::Receiver);
        let t2 = NodeTransform::from_position(Vector3::new(9.0, 9.0, 9.0));
        let ended = Arc::new(AtomicUsize::new(0));
        {
            let ended = ended.clone();
            iface.on_ended(move || {
                ended.fetch_add(1, Ordering::SeqCst);
            });
        }

        iface.end(Some(t2));
        iface.end(None);

        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert!(iface.is_ended());
        assert_eq!(iface.transmitter_from_receiver(), t2);
    }

    #[tokio::test]
    async fn test_lock_passes_rejection_through() {
        let (iface, mut rx, client) = make(InterfaceRole::Transmitter);
        let waiter = {
            let iface = iface.clone();
            tokio::spawn(async move { iface.lock().await })
        };

        let sent = rx.recv().await.unwrap();
        match &sent.body {
            Body::Request(Request::Lock {
                transmitter,
                receiver,
                iface,
            }) => {
                assert_eq!(*transmitter, a());
                assert_eq!(*receiver, b());
                assert_eq!(iface, "grab@1");
            }
            other => panic!("unexpected {other:?}"),
        }
        client.complete(
            sent.id,
            Response::Lock {
                result: LockResult::AlreadyLocked,
            },
        );

        assert_eq!(waiter.await.unwrap(), Ok(LockResult::AlreadyLocked));
    }

    #[tokio::test]
    async fn test_relock_carries_both_receivers() {
        let (iface, mut rx, client) = make(InterfaceRole::Transmitter);
        let c = EndpointAddr::from_raw(3, 30);
        let waiter = {
            let iface = iface.clone();
            tokio::spawn(async move { iface.relock(c).await })
        };

        let sent = rx.recv().await.unwrap();
        assert_eq!(
            sent.body,
            Body::Request(Request::Relock {
                transmitter: a(),
                old_receiver: b(),
                new_receiver: c,
                iface: InterfaceName::new("grab@1").unwrap(),
            })
        );
        client.complete(
            sent.id,
            Response::Relock {
                result: LockResult::Success,
            },
        );
        assert_eq!(waiter.await.unwrap(), Ok(LockResult::Success));
    }

    #[tokio::test]
    async fn test_send_event_addressed_from_self_to_peer() {
        let (iface, mut rx, client) = make(InterfaceRole::Receiver);
        let waiter = {
            let iface = iface.clone();
            tokio::spawn(async move { iface.send_event(json!({ "hello": 1 })).await })
        };

        let sent = rx.recv().await.unwrap();
        match &sent.body {
            Body::Request(Request::SendEvent {
                destination, peer, ..
            }) => {
                // receiver side sends to the transmitter
                assert_eq!(*destination, a());
                assert_eq!(*peer, b());
            }
            other => panic!("unexpected {other:?}"),
        }
        client.complete(sent.id, Response::SendEvent);
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }
}
