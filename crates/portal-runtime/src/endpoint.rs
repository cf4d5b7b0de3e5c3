//! Endpoint - one connection to the scene-graph authority
//!
//! The endpoint owns the request client shared by every entity it creates
//! and routes inbound envelopes: responses complete pending requests,
//! notifications go to the entity registered for the target node.
//! [`Endpoint::run`] drains the inbound channel serially, so notification
//! handling for all entities happens on one logical thread.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use portal_core::{EndpointAddr, EndpointId, NodeId, PortalError, PortalResult};
use portal_transport::{start_receive_loop, EnvelopeReceiver, MessageSink, RequestClient, UdpTransport};
use portal_wire::{Body, Envelope};

use crate::{EntityDispatcher, InterfaceEntityConfig, RuntimeConfig};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub received: u64,
    pub responses: u64,
    pub notifications: u64,
    /// Envelopes that failed validation or arrived as requests
    pub dropped: u64,
    /// Notifications for a node with no registered entity
    pub unroutable: u64,
    /// Responses no pending request accepted
    pub unmatched_responses: u64,
}

/// Client-side endpoint
pub struct Endpoint {
    id: EndpointId,
    client: Arc<RequestClient>,
    entities: RwLock<HashMap<NodeId, Arc<EntityDispatcher>>>,
    config: RuntimeConfig,
    stats: Mutex<EndpointStats>,
}

impl Endpoint {
    pub fn new(id: EndpointId, sink: Arc<dyn MessageSink>, config: &RuntimeConfig) -> Self {
        let client = Arc::new(RequestClient::with_timeout(sink, config.request_timeout));
        tracing::info!(endpoint = %id, timeout = ?config.request_timeout, "endpoint created");
        Endpoint {
            id,
            client,
            entities: RwLock::new(HashMap::new()),
            config: config.clone(),
            stats: Mutex::new(EndpointStats::default()),
        }
    }

    /// Endpoint talking UDP to the authority at `authority`.
    ///
    /// Both the send queue and the returned inbound channel hold
    /// `config.inbound_buffer` envelopes. Feed the receiver to [`run`](Self::run).
    pub async fn connect_udp(
        id: EndpointId,
        bind: SocketAddr,
        authority: SocketAddr,
        config: &RuntimeConfig,
    ) -> PortalResult<(Self, EnvelopeReceiver)> {
        let transport = UdpTransport::bind(bind).await?;
        let sink = transport.sink_with_buffer(authority, config.inbound_buffer);
        let inbound = start_receive_loop(transport.socket(), config.inbound_buffer);
        tracing::debug!(endpoint = %id, local = %transport.local_addr(), %authority, "UDP endpoint bound");
        Ok((Endpoint::new(id, Arc::new(sink), config), inbound))
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Request client shared by every entity of this endpoint
    pub fn client(&self) -> &Arc<RequestClient> {
        &self.client
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn stats(&self) -> EndpointStats {
        self.stats.lock().clone()
    }

    /// Build an entity on `node`.
    ///
    /// The entity only receives notifications when at least one declaration
    /// carries a processor. A previous entity on the same node is replaced.
    pub fn create_entity(
        &self,
        node: NodeId,
        config: InterfaceEntityConfig,
    ) -> PortalResult<Arc<EntityDispatcher>> {
        let addr = EndpointAddr::new(self.id, node);
        let register = config.needs_processor();
        let dispatcher = Arc::new(EntityDispatcher::new(addr, config, self.client.clone())?);

        let previous = if register {
            self.entities.write().insert(node, dispatcher.clone())
        } else {
            self.entities.write().remove(&node)
        };
        if previous.is_some() {
            tracing::warn!(%addr, "replacing registered entity");
        }
        tracing::debug!(%addr, registered = register, "entity created");
        Ok(dispatcher)
    }

    pub fn remove_entity(&self, node: NodeId) -> Option<Arc<EntityDispatcher>> {
        self.entities.write().remove(&node)
    }

    pub fn entity(&self, node: NodeId) -> Option<Arc<EntityDispatcher>> {
        self.entities.read().get(&node).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }

    /// Route one inbound envelope
    pub fn handle_inbound(&self, envelope: Envelope) {
        self.stats.lock().received += 1;

        if let Err(e) = envelope.validate() {
            tracing::warn!(endpoint = %self.id, "dropping invalid envelope: {}", e);
            self.stats.lock().dropped += 1;
            return;
        }

        match envelope.body {
            Body::Response(response) => {
                self.stats.lock().responses += 1;
                if !self.client.complete(envelope.id, response) {
                    self.stats.lock().unmatched_responses += 1;
                }
            }
            Body::Notification(notification) => {
                self.stats.lock().notifications += 1;
                // validate() guarantees notifications carry a target
                let Some(target) = envelope.target else {
                    return;
                };
                if target.endpoint != self.id {
                    tracing::warn!(endpoint = %self.id, %target, "notification for another endpoint");
                    self.stats.lock().unroutable += 1;
                    return;
                }
                let Some(dispatcher) = self.entity(target.node) else {
                    tracing::debug!(endpoint = %self.id, %target, kind = %notification.message_type(), "no entity for notification");
                    self.stats.lock().unroutable += 1;
                    return;
                };
                dispatcher.handle(notification);
            }
            Body::Request(request) => {
                tracing::warn!(endpoint = %self.id, kind = %request.message_type(), "dropping inbound request");
                self.stats.lock().dropped += 1;
            }
        }
    }

    /// Drain `inbound` until it closes, then fail whatever is still pending
    pub async fn run(&self, mut inbound: EnvelopeReceiver) {
        tracing::info!(endpoint = %self.id, "endpoint loop started");
        while let Some(envelope) = inbound.recv().await {
            self.handle_inbound(envelope);
        }
        let failed = self.client.fail_all(PortalError::TransportClosed);
        tracing::info!(endpoint = %self.id, failed, "endpoint loop stopped");
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("entities", &self.entity_count())
            .field("client", &self.client)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InterfaceProp;
    use portal_core::{InterfaceName, LockResult, NodeTransform};
    use portal_transport::channel;
    use portal_wire::{Notification, Request, RequestId, Response};
    use std::time::Duration;

    fn grab() -> InterfaceName {
        InterfaceName::new("grab@1").unwrap()
    }

    fn endpoint(config: &RuntimeConfig) -> (Endpoint, EnvelopeReceiver) {
        let (sink, rx) = channel(16);
        (Endpoint::new(EndpointId(1), Arc::new(sink), config), rx)
    }

    fn started(target: EndpointAddr) -> Envelope {
        Envelope::notification(
            target,
            Notification::Started {
                transmitter: EndpointAddr::from_raw(2, 1),
                receiver: target,
                iface: grab(),
                transmitter_from_receiver: NodeTransform::identity(),
                params: None,
            },
        )
    }

    #[test]
    fn test_entity_without_processor_is_not_registered() {
        let (endpoint, _rx) = endpoint(&RuntimeConfig::default());

        let passive = endpoint
            .create_entity(NodeId(1), InterfaceEntityConfig::new().with_receive(InterfaceProp::new(grab())))
            .unwrap();
        assert_eq!(passive.addr(), EndpointAddr::from_raw(1, 1));
        assert!(endpoint.entity(NodeId(1)).is_none());

        endpoint
            .create_entity(
                NodeId(2),
                InterfaceEntityConfig::new().with_receive(InterfaceProp::with_processor(grab(), |_| {})),
            )
            .unwrap();
        assert!(endpoint.entity(NodeId(2)).is_some());
        assert_eq!(endpoint.entity_count(), 1);

        assert!(endpoint.remove_entity(NodeId(2)).is_some());
        assert_eq!(endpoint.entity_count(), 0);
    }

    #[test]
    fn test_routes_notification_by_target_node() {
        let (endpoint, _rx) = endpoint(&RuntimeConfig::default());
        let entity = endpoint
            .create_entity(
                NodeId(5),
                InterfaceEntityConfig::new().with_receive(InterfaceProp::with_processor(grab(), |_| {})),
            )
            .unwrap();

        endpoint.handle_inbound(started(EndpointAddr::from_raw(1, 5)));
        assert_eq!(entity.active_count(), 1);

        // unknown node and foreign endpoint
        endpoint.handle_inbound(started(EndpointAddr::from_raw(1, 6)));
        endpoint.handle_inbound(started(EndpointAddr::from_raw(9, 5)));
        assert_eq!(entity.active_count(), 1);

        let stats = endpoint.stats();
        assert_eq!(stats.notifications, 3);
        assert_eq!(stats.unroutable, 2);
    }

    #[test]
    fn test_recreate_without_processor_unregisters() {
        let (endpoint, _rx) = endpoint(&RuntimeConfig::default());
        let old = endpoint
            .create_entity(
                NodeId(1),
                InterfaceEntityConfig::new().with_receive(InterfaceProp::with_processor(grab(), |_| {})),
            )
            .unwrap();
        assert!(Arc::ptr_eq(&endpoint.entity(NodeId(1)).unwrap(), &old));

        endpoint
            .create_entity(NodeId(1), InterfaceEntityConfig::new().with_receive(InterfaceProp::new(grab())))
            .unwrap();
        assert!(endpoint.entity(NodeId(1)).is_none());

        endpoint.handle_inbound(started(EndpointAddr::from_raw(1, 1)));
        assert_eq!(old.active_count(), 0);
        assert_eq!(endpoint.stats().unroutable, 1);
    }

    #[test]
    fn test_recreate_with_processor_replaces() {
        let (endpoint, _rx) = endpoint(&RuntimeConfig::default());
        let config = || InterfaceEntityConfig::new().with_receive(InterfaceProp::with_processor(grab(), |_| {}));
        let old = endpoint.create_entity(NodeId(1), config()).unwrap();
        let new = endpoint.create_entity(NodeId(1), config()).unwrap();

        endpoint.handle_inbound(started(EndpointAddr::from_raw(1, 1)));
        assert_eq!(old.active_count(), 0);
        assert_eq!(new.active_count(), 1);
    }

    #[test]
    fn test_inbound_request_dropped() {
        let (endpoint, _rx) = endpoint(&RuntimeConfig::default());
        endpoint.handle_inbound(Envelope::request(
            RequestId::new(1),
            Request::Lock {
                transmitter: EndpointAddr::from_raw(1, 1),
                receiver: EndpointAddr::from_raw(2, 1),
                iface: grab(),
            },
        ));
        assert_eq!(endpoint.stats().dropped, 1);
    }

    #[test]
    fn test_bad_initial_lock_fails_creation() {
        let (endpoint, _rx) = endpoint(&RuntimeConfig::default());
        let config = InterfaceEntityConfig::new()
            .with_receive(InterfaceProp::with_processor(grab(), |_| {}))
            .with_interface_lock(crate::InitialInterfaceLock {
                iface: grab(),
                receiver: EndpointAddr::from_raw(2, 1),
                params: None,
            });

        assert!(matches!(
            endpoint.create_entity(NodeId(1), config),
            Err(PortalError::UndeclaredInitialLock { .. })
        ));
        assert_eq!(endpoint.entity_count(), 0);
    }

    #[tokio::test]
    async fn test_response_completes_pending_lock() {
        let (endpoint, mut outbound) = endpoint(&RuntimeConfig::default());
        let endpoint = Arc::new(endpoint);
        let client = endpoint.client().clone();

        let waiter = tokio::spawn(async move {
            client
                .request(Request::Lock {
                    transmitter: EndpointAddr::from_raw(1, 1),
                    receiver: EndpointAddr::from_raw(2, 1),
                    iface: grab(),
                })
                .await
        });

        let sent = outbound.recv().await.unwrap();
        endpoint.handle_inbound(Envelope::response(
            sent.id,
            Response::Lock {
                result: LockResult::InterfaceNotFound,
            },
        ));

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.lock_result(), Some(LockResult::InterfaceNotFound));

        endpoint.handle_inbound(Envelope::response(sent.id, Response::SendEvent));
        assert_eq!(endpoint.stats().unmatched_responses, 1);
    }

    #[tokio::test]
    async fn test_run_fails_pending_on_close() {
        let (endpoint, mut outbound) = endpoint(&RuntimeConfig::default());
        let endpoint = Arc::new(endpoint);
        let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(4);

        let runner = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move { endpoint.run(inbound_rx).await })
        };
        let waiter = {
            let client = endpoint.client().clone();
            tokio::spawn(async move {
                client
                    .request(Request::Unlock {
                        transmitter: EndpointAddr::from_raw(1, 1),
                        receiver: EndpointAddr::from_raw(2, 1),
                        iface: grab(),
                    })
                    .await
            })
        };

        outbound.recv().await.unwrap();
        drop(inbound_tx);
        runner.await.unwrap();

        assert_eq!(waiter.await.unwrap(), Err(PortalError::TransportClosed));
    }

    #[tokio::test]
    async fn test_udp_endpoint_round_trip() {
        let authority = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let config = RuntimeConfig::default().with_inbound_buffer(8);
        let (endpoint, inbound) = Endpoint::connect_udp(
            EndpointId(1),
            "127.0.0.1:0".parse().unwrap(),
            authority.local_addr(),
            &config,
        )
        .await
        .unwrap();
        let endpoint = Arc::new(endpoint);
        {
            let endpoint = endpoint.clone();
            tokio::spawn(async move { endpoint.run(inbound).await });
        }

        let waiter = {
            let client = endpoint.client().clone();
            tokio::spawn(async move {
                client
                    .request(Request::Lock {
                        transmitter: EndpointAddr::from_raw(1, 1),
                        receiver: EndpointAddr::from_raw(2, 1),
                        iface: grab(),
                    })
                    .await
            })
        };

        let (sent, from) = authority.recv_from().await.unwrap();
        assert!(matches!(sent.body, Body::Request(Request::Lock { .. })));
        authority
            .send_to(
                &Envelope::response(
                    sent.id,
                    Response::Lock {
                        result: LockResult::Success,
                    },
                ),
                from,
            )
            .await
            .unwrap();

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.lock_result(), Some(LockResult::Success));
    }

    #[tokio::test]
    async fn test_configured_timeout_applies() {
        let config = RuntimeConfig::default().with_request_timeout(Some(Duration::from_millis(20)));
        let (endpoint, _outbound) = endpoint(&config);

        let result = endpoint
            .client()
            .request(Request::Lock {
                transmitter: EndpointAddr::from_raw(1, 1),
                receiver: EndpointAddr::from_raw(2, 1),
                iface: grab(),
            })
            .await;

        assert!(matches!(result, Err(PortalError::RequestTimedOut(_))));
    }
}
