//! UDP transport - one JSON envelope per datagram

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use portal_core::{PortalError, PortalResult};
use portal_wire::{Envelope, MAX_ENVELOPE_SIZE};

use crate::{EnvelopeReceiver, MessageSink};

/// UDP transport for PORTAL envelopes
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> PortalResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| PortalError::TransportError(e.to_string()))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| PortalError::TransportError(e.to_string()))?;

        Ok(UdpTransport {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send an envelope to a destination
    pub async fn send_to(&self, envelope: &Envelope, dest: SocketAddr) -> PortalResult<()> {
        let bytes = envelope.encode()?;
        self.socket
            .send_to(&bytes, dest)
            .await
            .map_err(|e| PortalError::TransportError(e.to_string()))?;
        Ok(())
    }

    /// Receive one envelope
    pub async fn recv_from(&self) -> PortalResult<(Envelope, SocketAddr)> {
        let mut buf = vec![0u8; MAX_ENVELOPE_SIZE];
        let (len, addr) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| PortalError::TransportError(e.to_string()))?;

        let envelope = Envelope::decode(&buf[..len])?;
        Ok((envelope, addr))
    }

    /// Sink that writes every envelope to `dest`.
    ///
    /// Spawns the writer task, so it must be called from within a tokio runtime.
    pub fn sink(&self, dest: SocketAddr) -> UdpSink {
        self.sink_with_buffer(dest, DEFAULT_SEND_BUFFER)
    }

    /// Like [`sink`](Self::sink) with an explicit queue capacity
    pub fn sink_with_buffer(&self, dest: SocketAddr, buffer_size: usize) -> UdpSink {
        let (tx, mut rx) = mpsc::channel::<Bytes>(buffer_size.max(1));
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            while let Some(datagram) = rx.recv().await {
                if let Err(e) = socket.send_to(&datagram, dest).await {
                    tracing::warn!(%dest, "UDP send error: {}", e);
                }
            }
        });

        UdpSink { tx, dest }
    }

    /// Get a clone of the socket for concurrent operations
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

/// Queue capacity of sinks created with [`UdpTransport::sink`]
pub const DEFAULT_SEND_BUFFER: usize = 1024;

/// Non-blocking UDP sink bound to one peer.
///
/// Envelopes are encoded on `send` and queued for the writer task, which
/// stops once every clone of the sink is dropped.
#[derive(Clone, Debug)]
pub struct UdpSink {
    tx: mpsc::Sender<Bytes>,
    dest: SocketAddr,
}

impl UdpSink {
    pub fn dest(&self) -> SocketAddr {
        self.dest
    }
}

impl MessageSink for UdpSink {
    fn send(&self, envelope: Envelope) -> PortalResult<()> {
        let datagram = envelope.encode()?;
        self.tx.try_send(datagram).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                PortalError::TransportError("UDP send queue full".into())
            }
            mpsc::error::TrySendError::Closed(_) => PortalError::TransportClosed,
        })
    }
}

/// Start a background receive loop that decodes datagrams into envelopes.
///
/// Datagrams that fail to decode are logged and skipped.
pub fn start_receive_loop(socket: Arc<UdpSocket>, buffer_size: usize) -> EnvelopeReceiver {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));

    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_ENVELOPE_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, addr)) => match Envelope::decode(&buf[..len]) {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break; // Receiver dropped
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%addr, "dropping undecodable datagram: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("UDP receive error: {}", e);
                }
            }
        }
    });

    rx
}
