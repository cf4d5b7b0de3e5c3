//! End-to-end harness
//!
//! Wires real [`Endpoint`]s to a [`SimulatedAuthority`] and drives them
//! through complete interface lifecycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use portal_core::{EndpointAddr, EndpointId, NodeId, PortalResult};
use portal_runtime::{Endpoint, EntityDispatcher, InterfaceEntityConfig, RuntimeConfig};

use crate::SimulatedAuthority;

/// An endpoint attached to the authority with its run loop spawned
pub struct TestEndpoint {
    pub endpoint: Arc<Endpoint>,
    task: JoinHandle<()>,
}

impl TestEndpoint {
    /// Must be called from within a tokio runtime
    pub fn spawn(authority: &Arc<SimulatedAuthority>, id: EndpointId, config: &RuntimeConfig) -> Self {
        let (sink, inbound) = authority.attach(id, config.inbound_buffer);
        let endpoint = Arc::new(Endpoint::new(id, sink, config));
        let task = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move { endpoint.run(inbound).await })
        };
        TestEndpoint { endpoint, task }
    }

    pub fn addr(&self, node: u32) -> EndpointAddr {
        EndpointAddr::new(self.endpoint.id(), NodeId(node))
    }

    /// Create the entity locally and publish its node to the authority
    pub fn publish(
        &self,
        authority: &SimulatedAuthority,
        node: u32,
        config: InterfaceEntityConfig,
    ) -> PortalResult<Arc<EntityDispatcher>> {
        let description = config.node_description();
        let entity = self.endpoint.create_entity(NodeId(node), config)?;
        authority.register_entity(entity.addr(), description);
        Ok(entity)
    }

    /// Wait for the run loop to exit
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Poll `condition` until it holds or a second passes
pub async fn wait_until<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}
