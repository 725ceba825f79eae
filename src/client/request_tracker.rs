//! Correlates outbound requests carrying a `request_id` with their async
//! replies, keyed by a monotonic request id rather than one resolver per
//! awaited reply.

use crate::error::{SessionError, SessionResult};
use crate::frame::Frame;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

pub struct RequestTracker {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Frame>>>,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Monotonic id for a new outbound request, used to correlate the
    /// eventual reply via its `request_id` field.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, request_id: u64) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id, tx);
        rx
    }

    /// Resolve a pending request if one is waiting on this id. A no-op for
    /// an unknown id — already timed out, or the reply simply isn't a
    /// correlated one.
    pub fn resolve(&self, request_id: u64, frame: Frame) {
        if let Some(tx) = self.pending.lock().unwrap().remove(&request_id) {
            let _ = tx.send(frame);
        }
    }

    pub async fn await_reply(
        &self,
        request_id: u64,
        rx: oneshot::Receiver<Frame>,
        timeout: Duration,
        what: &'static str,
    ) -> SessionResult<Frame> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => {
                self.pending.lock().unwrap().remove(&request_id);
                Err(SessionError::Transport("connection closed while awaiting reply".into()))
            }
            Err(_) => {
                self.pending.lock().unwrap().remove(&request_id);
                Err(SessionError::Timeout(what))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_a_registered_request() {
        let tracker = RequestTracker::new();
        let id = tracker.next_request_id();
        let rx = tracker.register(id);
        tracker.resolve(id, Frame::Pong);
        let frame = tracker.await_reply(id, rx, Duration::from_secs(1), "test").await.unwrap();
        assert!(matches!(frame, Frame::Pong));
    }

    #[tokio::test]
    async fn unregistered_resolve_is_a_no_op() {
        let tracker = RequestTracker::new();
        tracker.resolve(999, Frame::Pong);
    }

    #[tokio::test]
    async fn times_out_when_no_reply_arrives() {
        let tracker = RequestTracker::new();
        let id = tracker.next_request_id();
        let rx = tracker.register(id);
        let result = tracker.await_reply(id, rx, Duration::from_millis(20), "discover_nodes").await;
        assert!(matches!(result, Err(SessionError::Timeout("discover_nodes"))));
    }
}
