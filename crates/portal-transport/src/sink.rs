//! Message sinks - where outbound envelopes go

use tokio::sync::mpsc;

use portal_core::{PortalError, PortalResult};
use portal_wire::Envelope;

/// Outbound half of a transport.
///
/// `send` must not block: it queues or writes the envelope and returns.
/// Responses come back through the endpoint's inbound stream.
pub trait MessageSink: Send + Sync {
    fn send(&self, envelope: Envelope) -> PortalResult<()>;
}

/// Envelope receiver channel
pub type EnvelopeReceiver = mpsc::Receiver<Envelope>;

/// Envelope sender channel
pub type EnvelopeSender = mpsc::Sender<Envelope>;

/// In-process sink backed by a bounded tokio channel
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: EnvelopeSender,
}

impl ChannelSink {
    pub fn new(tx: EnvelopeSender) -> Self {
        ChannelSink { tx }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl MessageSink for ChannelSink {
    fn send(&self, envelope: Envelope) -> PortalResult<()> {
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                PortalError::TransportError("channel full".into())
            }
            mpsc::error::TrySendError::Closed(_) => PortalError::TransportClosed,
        })
    }
}

/// Create a connected sink/receiver pair
pub fn channel(buffer: usize) -> (ChannelSink, EnvelopeReceiver) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (ChannelSink::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::{EndpointAddr, InterfaceName, NodeTransform};
    use portal_wire::Notification;

    fn note() -> Envelope {
        Envelope::notification(
            EndpointAddr::from_raw(1, 1),
            Notification::TransformUpdated {
                destination: EndpointAddr::from_raw(1, 1),
                peer: EndpointAddr::from_raw(2, 1),
                iface: InterfaceName::new("grab@1").unwrap(),
                destination_from_peer: NodeTransform::identity(),
            },
        )
    }

    #[tokio::test]
    async fn test_channel_delivers() {
        let (sink, mut rx) = channel(4);
        sink.send(note()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), note());
    }

    #[test]
    fn test_full_and_closed() {
        let (sink, rx) = channel(1);
        sink.send(note()).unwrap();
        assert!(matches!(
            sink.send(note()),
            Err(PortalError::TransportError(_))
        ));

        drop(rx);
        assert!(sink.is_closed());
        assert_eq!(sink.send(note()), Err(PortalError::TransportClosed));
    }
}
