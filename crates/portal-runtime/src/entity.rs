//! Entity dispatch
//!
//! An [`EntityDispatcher`] owns the live interfaces of one scene-graph
//! entity. It is the only place instances are created and destroyed: the
//! authority's `started` notification creates one and hands it to the
//! declared processor, `ended` tears it down. Events and transform updates
//! are routed to the instance addressed by (self, peer, interface).

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use portal_core::{
    EndpointAddr, InterfaceName, InterfaceRole, NodeTransform, PortalError, PortalResult,
};
use portal_transport::RequestClient;
use portal_wire::Notification;

use crate::ActiveInterface;

/// Application hook run once for every interface that starts on an entity
pub type Processor = Arc<dyn Fn(ActiveInterface) + Send + Sync>;

/// One declared interface, optionally with its processor
#[derive(Clone)]
pub struct InterfaceProp {
    pub iface: InterfaceName,
    pub processor: Option<Processor>,
}

impl InterfaceProp {
    /// Declaration without a processor
    pub fn new(iface: InterfaceName) -> Self {
        InterfaceProp {
            iface,
            processor: None,
        }
    }

    pub fn with_processor<F>(iface: InterfaceName, processor: F) -> Self
    where
        F: Fn(ActiveInterface) + Send + Sync + 'static,
    {
        InterfaceProp {
            iface,
            processor: Some(Arc::new(processor)),
        }
    }
}

impl fmt::Debug for InterfaceProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceProp")
            .field("iface", &self.iface)
            .field("processor", &self.processor.is_some())
            .finish()
    }
}

/// Interface the authority should start, locked, as soon as the entity exists
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialInterfaceLock {
    pub iface: InterfaceName,
    pub receiver: EndpointAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Declarations of one entity
#[derive(Clone, Debug, Default)]
pub struct InterfaceEntityConfig {
    /// Transmitted interfaces, highest priority first
    pub transmits: Vec<InterfaceProp>,
    /// Received interfaces, highest priority first
    pub receives: Vec<InterfaceProp>,
    pub interface_locks: Vec<InitialInterfaceLock>,
    pub parent: Option<EndpointAddr>,
    pub priority: i32,
    /// Ask the authority for transform-updated notifications
    pub wants_transforms: bool,
}

impl InterfaceEntityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transmit(mut self, prop: InterfaceProp) -> Self {
        self.transmits.push(prop);
        self
    }

    pub fn with_receive(mut self, prop: InterfaceProp) -> Self {
        self.receives.push(prop);
        self
    }

    pub fn with_interface_lock(mut self, lock: InitialInterfaceLock) -> Self {
        self.interface_locks.push(lock);
        self
    }

    pub fn with_parent(mut self, parent: EndpointAddr) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_wants_transforms(mut self, wants: bool) -> Self {
        self.wants_transforms = wants;
        self
    }

    /// True when any declaration carries a processor
    pub fn needs_processor(&self) -> bool {
        self.transmits
            .iter()
            .chain(self.receives.iter())
            .any(|prop| prop.processor.is_some())
    }

    /// Every initial lock must name a transmitted interface
    pub fn validate(&self) -> PortalResult<()> {
        for lock in &self.interface_locks {
            if !self.transmits.iter().any(|prop| prop.iface == lock.iface) {
                return Err(PortalError::UndeclaredInitialLock {
                    iface: lock.iface.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Node description published to the scene graph
    pub fn node_description(&self) -> EntityNode {
        EntityNode {
            transmits: self.transmits.iter().map(|p| p.iface.clone()).collect(),
            receives: self.receives.iter().map(|p| p.iface.clone()).collect(),
            interface_locks: self.interface_locks.clone(),
            parent: self.parent,
            priority: self.priority,
            notify_on_transform_change: self.wants_transforms,
        }
    }
}

/// What the scene graph learns about an entity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityNode {
    pub transmits: Vec<InterfaceName>,
    pub receives: Vec<InterfaceName>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interface_locks: Vec<InitialInterfaceLock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EndpointAddr>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub notify_on_transform_change: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub started: u64,
    pub ended: u64,
    pub events: u64,
    pub transform_updates: u64,
    /// Notifications that matched nothing
    pub ignored: u64,
}

/// Live interface set and notification handlers of one entity
pub struct EntityDispatcher {
    addr: EndpointAddr,
    config: InterfaceEntityConfig,
    client: Arc<RequestClient>,
    active: Mutex<Vec<ActiveInterface>>,
    stats: Mutex<DispatchStats>,
}

impl EntityDispatcher {
    /// Fails with [`PortalError::UndeclaredInitialLock`] on a bad declaration
    pub fn new(
        addr: EndpointAddr,
        config: InterfaceEntityConfig,
        client: Arc<RequestClient>,
    ) -> PortalResult<Self> {
        config.validate()?;
        Ok(EntityDispatcher {
            addr,
            config,
            client,
            active: Mutex::new(Vec::new()),
            stats: Mutex::new(DispatchStats::default()),
        })
    }

    pub fn addr(&self) -> EndpointAddr {
        self.addr
    }

    pub fn config(&self) -> &InterfaceEntityConfig {
        &self.config
    }

    /// Snapshot of the live set
    pub fn active_interfaces(&self) -> Vec<ActiveInterface> {
        self.active.lock().clone()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().clone()
    }

    pub fn find_active(
        &self,
        transmitter: &EndpointAddr,
        receiver: &EndpointAddr,
        iface: &InterfaceName,
    ) -> Option<ActiveInterface> {
        self.active
            .lock()
            .iter()
            .find(|active| active.matches(transmitter, receiver, iface))
            .cloned()
    }

    /// Lookup from the local entity's point of view
    pub fn find_by_destination(
        &self,
        destination: &EndpointAddr,
        peer: &EndpointAddr,
        iface: &InterfaceName,
    ) -> Option<ActiveInterface> {
        self.active
            .lock()
            .iter()
            .find(|active| active.matches_destination(destination, peer, iface))
            .cloned()
    }

    /// Role and processor for a pairing; transmit declarations win
    fn processor_for(
        &self,
        transmitter: &EndpointAddr,
        receiver: &EndpointAddr,
        iface: &InterfaceName,
    ) -> (Option<Processor>, InterfaceRole) {
        if self.addr.matches(transmitter) {
            if let Some(prop) = self.config.transmits.iter().find(|p| p.iface == *iface) {
                return (prop.processor.clone(), InterfaceRole::Transmitter);
            }
        }
        if self.addr.matches(receiver) {
            if let Some(prop) = self.config.receives.iter().find(|p| p.iface == *iface) {
                return (prop.processor.clone(), InterfaceRole::Receiver);
            }
        }
        (None, InterfaceRole::Invalid)
    }

    pub fn on_started(
        &self,
        transmitter: EndpointAddr,
        receiver: EndpointAddr,
        iface: InterfaceName,
        transmitter_from_receiver: NodeTransform,
        params: Option<Value>,
    ) {
        let (processor, role) = self.processor_for(&transmitter, &receiver, &iface);
        let Some(processor) = processor else {
            tracing::debug!(addr = %self.addr, %transmitter, %receiver, %iface, ?role, "no processor for started interface");
            self.stats.lock().ignored += 1;
            return;
        };

        let instance = ActiveInterface::new(
            transmitter,
            receiver,
            iface,
            transmitter_from_receiver,
            role,
            params,
            self.client.clone(),
        );

        let stale = {
            let mut active = self.active.lock();
            let stale = active
                .iter()
                .position(|live| live.matches(&transmitter, &receiver, instance.iface()))
                .map(|index| active.swap_remove(index));
            active.push(instance.clone());
            stale
        };
        if let Some(stale) = stale {
            tracing::warn!(addr = %self.addr, key = ?stale.key(), "replacing live interface on repeated start");
            stale.retire();
        }
        self.stats.lock().started += 1;

        tracing::debug!(addr = %self.addr, %transmitter, %receiver, iface = %instance.iface(), ?role, "interface started");
        processor(instance);
    }

    pub fn on_ended(
        &self,
        transmitter: EndpointAddr,
        receiver: EndpointAddr,
        iface: InterfaceName,
        transmitter_from_receiver: Option<NodeTransform>,
    ) {
        let Some(instance) = self.find_active(&transmitter, &receiver, &iface) else {
            tracing::debug!(addr = %self.addr, %transmitter, %receiver, %iface, "ended for unknown interface");
            self.stats.lock().ignored += 1;
            return;
        };

        instance.end(transmitter_from_receiver);
        self.active
            .lock()
            .retain(|live| !live.same_instance(&instance));
        self.stats.lock().ended += 1;
        tracing::debug!(addr = %self.addr, %transmitter, %receiver, %iface, "interface ended");
    }

    pub fn on_event(
        &self,
        destination: EndpointAddr,
        peer: EndpointAddr,
        iface: InterfaceName,
        event: Value,
        destination_from_peer: Option<NodeTransform>,
    ) {
        match self.find_by_destination(&destination, &peer, &iface) {
            Some(instance) => {
                self.stats.lock().events += 1;
                instance.deliver_event(&event, destination_from_peer);
            }
            None => {
                tracing::debug!(addr = %self.addr, %destination, %peer, %iface, "event for unknown interface");
                self.stats.lock().ignored += 1;
            }
        }
    }

    pub fn on_transform_updated(
        &self,
        destination: EndpointAddr,
        peer: EndpointAddr,
        iface: InterfaceName,
        destination_from_peer: NodeTransform,
    ) {
        match self.find_by_destination(&destination, &peer, &iface) {
            Some(instance) => {
                self.stats.lock().transform_updates += 1;
                instance.update_transform(destination_from_peer);
            }
            None => {
                tracing::debug!(addr = %self.addr, %destination, %peer, %iface, "transform update for unknown interface");
                self.stats.lock().ignored += 1;
            }
        }
    }

    /// Route one notification to its handler
    pub fn handle(&self, notification: Notification) {
        match notification {
            Notification::Started {
                transmitter,
                receiver,
                iface,
                transmitter_from_receiver,
                params,
            } => self.on_started(transmitter, receiver, iface, transmitter_from_receiver, params),
            Notification::Ended {
                transmitter,
                receiver,
                iface,
                transmitter_from_receiver,
            } => self.on_ended(transmitter, receiver, iface, transmitter_from_receiver),
            Notification::Event {
                destination,
                peer,
                iface,
                event,
                destination_from_peer,
            } => self.on_event(destination, peer, iface, event, destination_from_peer),
            Notification::TransformUpdated {
                destination,
                peer,
                iface,
                destination_from_peer,
            } => self.on_transform_updated(destination, peer, iface, destination_from_peer),
        }
    }
}

impl fmt::Debug for EntityDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDispatcher")
            .field("addr", &self.addr)
            .field("active", &self.active_count())
            .finish()
    }
}
