//! Connection abstraction consumed by the receiver thread, and an in-process
//! pipe-pair implementation sufficient to drive tests without a real
//! transport.

use crate::error::ConnectionError;
use crate::shutdown::{ShutdownSignal, ShutdownState};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

/// A reliable, ordered byte channel with a notifier the receiver's event loop
/// can await before polling for data.
///
/// Connection establishment and real transports (sockets, named pipes,
/// multicast) are collaborators outside this crate; this trait specifies only
/// the contract the rest of the runtime consumes from them.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Waits for and returns the next frame, or `Err` once the connection (or
    /// its sibling) has closed.
    async fn read_sync(&self) -> Result<Vec<u8>, ConnectionError>;

    /// Non-blocking poll: `Ok(None)` means no frame is available yet.
    fn try_read(&self) -> Result<Option<Vec<u8>>, ConnectionError>;

    /// Best-effort write. Returns the number of bytes accepted, or
    /// `ConnectionError::Full` if the peer's inbound queue is saturated.
    async fn write(&self, buf: &[u8]) -> Result<usize, ConnectionError>;

    /// An opaque handle the event loop can `notified().await` on before
    /// calling `try_read` again.
    fn notifier(&self) -> Arc<Notify>;

    /// Closes this half. The sibling observes end-of-stream on its next read.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// One half of an in-process pipe pair, modeled on the sibling relation of a
/// real pipe/socket pair: `a.write() <-> b.read_sync()`.
pub struct PipeConnection {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    rx: AsyncMutex<mpsc::Receiver<Vec<u8>>>,
    read_notify: Arc<Notify>,
    peer_read_notify: Arc<Notify>,
    state: Arc<ShutdownState>,
    closed_by_peer: AtomicBool,
}

impl PipeConnection {
    /// Creates a connected sibling pair. Each side's `write` lands on the
    /// other's `read_sync`/`try_read`.
    pub fn pair(depth: usize) -> (Self, Self) {
        let (tx_ab, rx_ab) = mpsc::channel(depth.max(1));
        let (tx_ba, rx_ba) = mpsc::channel(depth.max(1));

        let notify_a = Arc::new(Notify::new());
        let notify_b = Arc::new(Notify::new());
        let state_a = Arc::new(ShutdownState::new());
        let state_b = Arc::new(ShutdownState::new());

        let a = Self {
            tx: Mutex::new(Some(tx_ab)),
            rx: AsyncMutex::new(rx_ba),
            read_notify: Arc::clone(&notify_a),
            peer_read_notify: Arc::clone(&notify_b),
            state: Arc::clone(&state_a),
            closed_by_peer: AtomicBool::new(false),
        };
        let b = Self {
            tx: Mutex::new(Some(tx_ba)),
            rx: AsyncMutex::new(rx_ab),
            read_notify: notify_b,
            peer_read_notify: notify_a,
            state: state_b,
            closed_by_peer: AtomicBool::new(false),
        };
        (a, b)
    }

    /// A cloneable signal callers outside the read loop (e.g. peer-loss
    /// detection in the local node) can use to force this half closed.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal::new(Arc::clone(&self.state), Arc::clone(&self.read_notify))
    }
}

#[async_trait]
impl Connection for PipeConnection {
    async fn read_sync(&self) -> Result<Vec<u8>, ConnectionError> {
        if self.state.is_shutdown_initiated() {
            return Err(ConnectionError::ShutDown);
        }
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(frame) => Ok(frame),
            None => {
                self.closed_by_peer.store(true, Ordering::Release);
                Err(ConnectionError::Closed)
            }
        }
    }

    fn try_read(&self) -> Result<Option<Vec<u8>>, ConnectionError> {
        if self.state.is_shutdown_initiated() {
            return Err(ConnectionError::ShutDown);
        }
        let Ok(mut rx) = self.rx.try_lock() else {
            return Ok(None);
        };
        match rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.closed_by_peer.store(true, Ordering::Release);
                Err(ConnectionError::Closed)
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, ConnectionError> {
        let sender = {
            let guard = self.tx.lock().unwrap();
            guard.clone()
        };
        let Some(sender) = sender else {
            return Err(ConnectionError::Closed);
        };
        match sender.send(buf.to_vec()).await {
            Ok(()) => {
                self.peer_read_notify.notify_one();
                Ok(buf.len())
            }
            Err(_) => Err(ConnectionError::PeerLost("sibling dropped".into())),
        }
    }

    fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.read_notify)
    }

    fn close(&self) {
        self.tx.lock().unwrap().take();
        self.state.close();
        self.state.initiate_shutdown();
        self.read_notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.state.is_shutdown_initiated() || self.closed_by_peer.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_wakes_read_sync() {
        let (a, b) = PipeConnection::pair(8);
        a.write(b"hello").await.unwrap();
        let frame = b.read_sync().await.unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn test_close_observed_as_eof_on_sibling() {
        let (a, b) = PipeConnection::pair(8);
        a.close();
        let err = b.read_sync().await.unwrap_err();
        assert_eq!(err, ConnectionError::Closed);
    }

    #[tokio::test]
    async fn test_try_read_empty_then_ready() {
        let (a, b) = PipeConnection::pair(8);
        assert_eq!(b.try_read().unwrap(), None);
        a.write(b"x").await.unwrap();
        // give tokio's mpsc a moment to land the item
        tokio::task::yield_now().await;
        assert_eq!(b.try_read().unwrap(), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn test_shutdown_signal_closes_connection() {
        let (a, _b) = PipeConnection::pair(8);
        let signal = a.shutdown_signal();
        assert!(!a.is_closed());
        signal.shutdown();
        assert!(a.is_closed());
    }
}
