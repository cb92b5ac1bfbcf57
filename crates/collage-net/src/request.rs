//! A table of in-flight requests, keyed by id, served by a one-shot reply.
//!
//! `registerRequest`/`serveRequest`/`waitRequest` in the original protocol
//! map onto a `tokio::sync::oneshot` per request id, the same one-shot
//! trigger shape [`crate::shutdown`] uses for connection teardown.

use crate::error::RequestError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// A pending request's reply channel, returned by `register`. Hand this to
/// `wait`/`wait_sync`; the request id was already recorded internally.
pub struct PendingRequest<T> {
    id: u32,
    rx: oneshot::Receiver<T>,
}

impl<T> PendingRequest<T> {
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Table of outstanding requests for one local node.
///
/// `mapObjectSync`/`commitSync` register a request before sending the wire
/// command that will eventually be answered, then block on the returned
/// [`PendingRequest`] until a reply arrives, the deadline passes, or the
/// registry is torn down.
pub struct RequestRegistry<T> {
    next_id: AtomicU32,
    pending: Mutex<HashMap<u32, oneshot::Sender<T>>>,
}

impl<T: Send + 'static> RequestRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates a fresh request id and records its reply slot.
    pub fn register(&self) -> PendingRequest<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);
        PendingRequest { id, rx }
    }

    /// Delivers `value` to the waiter registered under `id`.
    ///
    /// Returns `false` if no such request is pending (already served, timed
    /// out, or never registered) — a caller bug, logged rather than panicking
    /// since it originates from untrusted wire input (a stale or duplicated
    /// reply packet from a peer).
    pub fn serve(&self, id: u32, value: T) -> bool {
        let sender = self.pending.lock().unwrap().remove(&id);
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                eprintln!("collage-net: serve_request for unknown or already-served id {id}");
                false
            }
        }
    }

    /// Blocks (asynchronously) until the request is served.
    pub async fn wait(&self, pending: PendingRequest<T>) -> Result<T, RequestError> {
        pending.rx.await.map_err(|_| RequestError::Cancelled)
    }

    /// Blocks until served or `timeout` elapses, cleaning up the pending
    /// entry on timeout so a late reply doesn't leak a sender.
    pub async fn wait_timeout(&self, pending: PendingRequest<T>, timeout: Duration) -> Result<T, RequestError> {
        let id = pending.id;
        match tokio::time::timeout(timeout, pending.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(RequestError::Cancelled),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(RequestError::Timeout)
            }
        }
    }

    /// Synchronous escape hatch for callers on a non-async thread (the
    /// receiver thread's command handlers run synchronously but need to
    /// block on a reply the same receiver loop will eventually deliver from
    /// another task — matches the original's thread-per-role design where
    /// `commitSync` blocks a plain OS thread, not an async task).
    ///
    /// # Panics
    ///
    /// Panics if called from outside a Tokio runtime context, or from the
    /// runtime's single-threaded flavor without `block_in_place` support.
    pub fn wait_sync(&self, pending: PendingRequest<T>) -> Result<T, RequestError> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.wait(pending))
        })
    }

    /// Drops every pending request, waking waiters with `RequestError::Cancelled`.
    pub fn cancel_all(&self) {
        self.pending.lock().unwrap().clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl<T: Send + 'static> Default for RequestRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serve_then_wait() {
        let registry: RequestRegistry<u64> = RequestRegistry::new();
        let pending = registry.register();
        let id = pending.id();
        assert!(registry.serve(id, 42));
        assert_eq!(registry.wait(pending).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_wait_timeout_cleans_up_pending_entry() {
        let registry: RequestRegistry<u64> = RequestRegistry::new();
        let pending = registry.register();
        let id = pending.id();
        let result = registry.wait_timeout(pending, Duration::from_millis(10)).await;
        assert_eq!(result, Err(RequestError::Timeout));
        assert_eq!(registry.pending_count(), 0);
        assert!(!registry.serve(id, 0));
    }

    #[tokio::test]
    async fn test_cancel_all_wakes_waiters() {
        let registry: RequestRegistry<u64> = RequestRegistry::new();
        let pending = registry.register();
        registry.cancel_all();
        assert_eq!(registry.wait(pending).await, Err(RequestError::Cancelled));
    }

    #[tokio::test]
    async fn test_serve_unknown_id_returns_false() {
        let registry: RequestRegistry<u64> = RequestRegistry::new();
        assert!(!registry.serve(999, 0));
    }
}
