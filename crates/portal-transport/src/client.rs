//! Request correlation
//!
//! Every outbound request gets a fresh [`RequestId`]. The pending map holds
//! the response type the request expects and the completion handle that
//! resolves the caller's future. A response completes a pending request only
//! when both its id and its type match.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use portal_core::{PortalError, PortalResult};
use portal_wire::{Envelope, MessageType, Request, RequestId, Response};

use crate::MessageSink;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub sent: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub mismatched: u64,
    pub unknown: u64,
}

struct PendingRequest {
    expected: MessageType,
    tx: oneshot::Sender<PortalResult<Response>>,
}

#[derive(Default)]
struct ClientState {
    pending: HashMap<RequestId, PendingRequest>,
    stats: ClientStats,
}

/// Sends requests through a [`MessageSink`] and resolves them when the
/// matching response is handed to [`RequestClient::complete`].
pub struct RequestClient {
    sink: Arc<dyn MessageSink>,
    state: Mutex<ClientState>,
    next_id: AtomicU64,
    timeout: Option<Duration>,
}

/// Removes the pending entry if the request future is dropped early
struct PendingGuard<'a> {
    client: &'a RequestClient,
    id: RequestId,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.client.state.lock();
        if state.pending.remove(&self.id).is_some() {
            state.stats.cancelled += 1;
            tracing::debug!(id = %self.id, "request dropped before response");
        }
    }
}

impl RequestClient {
    /// Create a client whose requests wait for their response indefinitely
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self::with_timeout(sink, None)
    }

    /// Create a client that fails requests left unanswered for `timeout`
    pub fn with_timeout(sink: Arc<dyn MessageSink>, timeout: Option<Duration>) -> Self {
        RequestClient {
            sink,
            state: Mutex::new(ClientState::default()),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Send a request and wait for its response
    pub async fn request(&self, request: Request) -> PortalResult<Response> {
        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let expected = request.response_type();
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock();
            state.pending.insert(id, PendingRequest { expected, tx });
        }
        let mut guard = PendingGuard {
            client: self,
            id,
            armed: true,
        };

        tracing::trace!(%id, kind = %request.message_type(), iface = %request.iface(), "sending request");
        if let Err(e) = self.sink.send(Envelope::request(id, request)) {
            guard.armed = false;
            let mut state = self.state.lock();
            state.pending.remove(&id);
            state.stats.failed += 1;
            return Err(e);
        }
        self.state.lock().stats.sent += 1;

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    guard.armed = false;
                    let mut state = self.state.lock();
                    state.pending.remove(&id);
                    state.stats.timed_out += 1;
                    tracing::debug!(%id, ?limit, "request timed out");
                    return Err(PortalError::RequestTimedOut(id.0));
                }
            },
            None => rx.await,
        };
        guard.armed = false;

        match outcome {
            Ok(result) => result,
            // Completion handle dropped without an answer
            Err(_) => Err(PortalError::TransportClosed),
        }
    }

    /// Hand a response to the request waiting for it.
    ///
    /// Returns false when no request with this id is pending or when the
    /// pending request expects a different response type; in the latter case
    /// the request stays pending.
    pub fn complete(&self, id: RequestId, response: Response) -> bool {
        let pending = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.pending.entry(id) {
                Entry::Occupied(entry) => {
                    let expected = entry.get().expected;
                    let actual = response.message_type();
                    if expected != actual {
                        state.stats.mismatched += 1;
                        tracing::warn!(%id, %expected, %actual, "response type mismatch");
                        return false;
                    }
                    let pending = entry.remove();
                    state.stats.completed += 1;
                    pending
                }
                Entry::Vacant(_) => {
                    state.stats.unknown += 1;
                    tracing::debug!(%id, "response for unknown request");
                    return false;
                }
            }
        };

        tracing::trace!(%id, "request completed");
        pending.tx.send(Ok(response)).is_ok()
    }

    /// Resolve one pending request with an error
    pub fn fail(&self, id: RequestId, error: PortalError) -> bool {
        let pending = {
            let mut state = self.state.lock();
            let pending = state.pending.remove(&id);
            if pending.is_some() {
                state.stats.failed += 1;
            }
            pending
        };

        match pending {
            Some(pending) => pending.tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// Resolve every pending request with an error; returns how many there were
    pub fn fail_all(&self, error: PortalError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            let drained: Vec<_> = state.pending.drain().map(|(_, p)| p).collect();
            state.stats.failed += drained.len() as u64;
            drained
        };

        let count = drained.len();
        for pending in drained {
            let _ = pending.tx.send(Err(error.clone()));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Ids of requests still waiting, in ascending order
    pub fn pending_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<_> = self.state.lock().pending.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> ClientStats {
        self.state.lock().stats.clone()
    }
}

impl std::fmt::Debug for RequestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestClient")
            .field("pending", &self.pending_count())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel;
    use portal_core::{EndpointAddr, InterfaceName, LockResult};
    use portal_wire::Body;

    fn lock_request() -> Request {
        Request::Lock {
            transmitter: EndpointAddr::from_raw(1, 1),
            receiver: EndpointAddr::from_raw(2, 1),
            iface: InterfaceName::new("grab@1").unwrap(),
        }
    }

    fn send_event_request() -> Request {
        Request::SendEvent {
            destination: EndpointAddr::from_raw(2, 1),
            peer: EndpointAddr::from_raw(1, 1),
            iface: InterfaceName::new("grab@1").unwrap(),
            event: serde_json::json!({ "hello": true }),
        }
    }

    fn client(timeout: Option<Duration>) -> (Arc<RequestClient>, crate::EnvelopeReceiver) {
        let (sink, rx) = channel(16);
        (Arc::new(RequestClient::with_timeout(Arc::new(sink), timeout)), rx)
    }

    #[tokio::test]
    async fn test_response_resolves_request() {
        let (client, mut rx) = client(None);

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.request(lock_request()).await })
        };

        let sent = rx.recv().await.unwrap();
        assert!(matches!(sent.body, Body::Request(Request::Lock { .. })));
        assert!(client.complete(
            sent.id,
            Response::Lock {
                result: LockResult::AlreadyLocked
            }
        ));

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.lock_result(), Some(LockResult::AlreadyLocked));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (client, mut rx) = client(None);

        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.request(lock_request()).await })
        };
        let a = rx.recv().await.unwrap();
        let second = {
            let client = client.clone();
            tokio::spawn(async move { client.request(send_event_request()).await })
        };
        let b = rx.recv().await.unwrap();
        assert_ne!(a.id, b.id);

        assert!(client.complete(b.id, Response::SendEvent));
        assert!(client.complete(
            a.id,
            Response::Lock {
                result: LockResult::Success
            }
        ));

        assert_eq!(second.await.unwrap().unwrap(), Response::SendEvent);
        assert_eq!(
            first.await.unwrap().unwrap().lock_result(),
            Some(LockResult::Success)
        );
    }

    #[tokio::test]
    async fn test_wrong_kind_leaves_request_pending() {
        let (client, mut rx) = client(None);
        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.request(lock_request()).await })
        };
        let sent = rx.recv().await.unwrap();

        assert!(!client.complete(
            sent.id,
            Response::Unlock {
                result: LockResult::Success
            }
        ));
        assert_eq!(client.pending_count(), 1);
        assert_eq!(client.stats().mismatched, 1);

        assert!(client.complete(
            sent.id,
            Response::Lock {
                result: LockResult::Success
            }
        ));
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_response_ignored() {
        let (client, _rx) = client(None);
        assert!(!client.complete(RequestId::new(42), Response::SendEvent));
        assert_eq!(client.stats().unknown, 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let (client, _rx) = client(Some(Duration::from_millis(20)));
        let result = client.request(lock_request()).await;
        assert!(matches!(result, Err(PortalError::RequestTimedOut(_))));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let (client, mut rx) = client(None);
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let client = client.clone();
            waiters.push(tokio::spawn(async move { client.request(lock_request()).await }));
            rx.recv().await.unwrap();
        }

        assert_eq!(client.fail_all(PortalError::TransportClosed), 3);
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Err(PortalError::TransportClosed));
        }
    }

    #[tokio::test]
    async fn test_fail_one() {
        let (client, mut rx) = client(None);
        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.request(lock_request()).await })
        };
        let sent = rx.recv().await.unwrap();

        assert!(client.fail(sent.id, PortalError::RequestFailed("gone".into())));
        assert!(!client.fail(sent.id, PortalError::RequestFailed("again".into())));
        assert_eq!(
            waiter.await.unwrap(),
            Err(PortalError::RequestFailed("gone".into()))
        );
    }

    #[tokio::test]
    async fn test_closed_sink_fails_immediately() {
        let (client, rx) = client(None);
        drop(rx);
        assert_eq!(
            client.request(lock_request()).await,
            Err(PortalError::TransportClosed)
        );
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_future_clears_pending() {
        let (client, mut rx) = client(None);
        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.request(lock_request()).await })
        };
        rx.recv().await.unwrap();
        assert_eq!(client.pending_count(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.stats().cancelled, 1);
    }
}
