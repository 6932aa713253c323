//! Subscriber connection handle.
//!
//! A [`Connection`] is the registry's view of one live WebSocket: a bounded
//! outbound queue plus close signalling. The socket task owns the actual
//! socket and drains the queue (see [`crate::websocket`]).
//!
//! Closing is split in two steps so it can be requested from anywhere,
//! including while a registry shard lock is held:
//! 1. [`Connection::close`] records the reason (first caller wins) and wakes
//!    the socket task. It never blocks.
//! 2. [`Connection::finish`], called by the socket task once the socket is
//!    gone, runs the close handler. The handler fires at most once no matter
//!    how eviction, shutdown and peer disconnects interleave.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Close code sent to a subscriber displaced by a newer one for its token.
pub const EVICTED_CLOSE_CODE: u16 = 4001;
/// Close reason text sent alongside [`EVICTED_CLOSE_CODE`].
pub const EVICTED_CLOSE_REASON: &str = "Another client subscribed to this token.";
/// Close code sent when the server shuts down ("going away").
pub const SHUTDOWN_CLOSE_CODE: u16 = 1001;
/// Close reason text sent alongside [`SHUTDOWN_CLOSE_CODE`].
pub const SHUTDOWN_CLOSE_REASON: &str = "Server shutting down.";
/// Close code sent when a subscriber stops answering pings.
pub const TIMED_OUT_CLOSE_CODE: u16 = 4002;
/// Close reason text sent alongside [`TIMED_OUT_CLOSE_CODE`].
pub const TIMED_OUT_CLOSE_REASON: &str = "Subscriber stopped responding to pings.";

/// Why a connection was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// A newer subscriber claimed the same token.
    Evicted,
    /// The server is shutting down.
    Shutdown,
    /// The subscriber missed too many heartbeats.
    TimedOut,
    /// The subscriber closed the socket or the transport failed.
    Disconnected,
}

impl CloseReason {
    /// Close frame to send, if the peer is still there to receive one.
    pub fn close_frame(self) -> Option<(u16, &'static str)> {
        match self {
            Self::Evicted => Some((EVICTED_CLOSE_CODE, EVICTED_CLOSE_REASON)),
            Self::Shutdown => Some((SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON)),
            Self::TimedOut => Some((TIMED_OUT_CLOSE_CODE, TIMED_OUT_CLOSE_REASON)),
            Self::Disconnected => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Evicted => "evicted",
            Self::Shutdown => "shutdown",
            Self::TimedOut => "timed_out",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique per-process connection identifier (UUID v7).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Return the inner string as a slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type CloseHandler = Box<dyn FnOnce(&Connection, CloseReason) + Send>;

enum CloseHook {
    Empty,
    Armed(CloseHandler),
    Fired,
}

/// A live subscriber connection.
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<String>>,
    close_reason: OnceLock<CloseReason>,
    closed: CancellationToken,
    hook: Mutex<CloseHook>,
    is_alive: AtomicBool,
    dropped_messages: AtomicU64,
    connected_at: Instant,
}

impl Connection {
    /// Create a connection around an existing outbound sender.
    pub fn new(tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
            close_reason: OnceLock::new(),
            closed: CancellationToken::new(),
            hook: Mutex::new(CloseHook::Empty),
            is_alive: AtomicBool::new(true),
            dropped_messages: AtomicU64::new(0),
            connected_at: Instant::now(),
        }
    }

    /// Create a connection with a fresh queue of `capacity` frames.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Connection identifier.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a text frame.
    ///
    /// Returns `false` when the connection is closed or its queue is full;
    /// the frame is dropped in both cases.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Request closure. Returns `true` if this call decided the reason.
    pub fn close(&self, reason: CloseReason) -> bool {
        let won = self.close_reason.set(reason).is_ok();
        if won {
            self.closed.cancel();
        }
        won
    }

    /// Whether closure has been requested.
    pub fn is_closed(&self) -> bool {
        self.close_reason.get().is_some()
    }

    /// The reason closure was requested with, if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    /// Resolves once closure has been requested.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Install the handler run by [`finish`](Self::finish).
    ///
    /// Replaces a previously installed handler. If the connection has
    /// already finished, the handler runs immediately.
    pub fn set_close_handler(&self, handler: impl FnOnce(&Connection, CloseReason) + Send + 'static) {
        let mut hook = self.hook.lock();
        if matches!(*hook, CloseHook::Fired) {
            drop(hook);
            handler(self, self.close_reason().unwrap_or(CloseReason::Disconnected));
            return;
        }
        *hook = CloseHook::Armed(Box::new(handler));
    }

    /// Mark the connection finished and run the close handler exactly once.
    ///
    /// Records [`CloseReason::Disconnected`] if no reason was set yet.
    pub fn finish(&self) -> CloseReason {
        let _ = self.close(CloseReason::Disconnected);
        let reason = self.close_reason().unwrap_or(CloseReason::Disconnected);
        let previous = std::mem::replace(&mut *self.hook.lock(), CloseHook::Fired);
        if let CloseHook::Armed(handler) = previous {
            handler(self, reason);
        }
        reason
    }

    /// Record a pong (or any sign of life).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection showed life since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Frames dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("close_reason", &self.close_reason())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(conn: &Connection) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        conn.set_close_handler(move |_, _| {
            let _ = seen.fetch_add(1, Ordering::SeqCst);
        });
        calls
    }

    #[test]
    fn ids_are_unique() {
        let (a, _ra) = Connection::channel(1);
        let (b, _rb) = Connection::channel(1);
        assert_ne!(a.id(), b.id());
        assert!(a.id().as_str().starts_with("conn_"));
    }

    #[tokio::test]
    async fn send_queues_frame() {
        let (conn, mut rx) = Connection::channel(4);
        assert!(conn.send(Arc::new("hello".into())));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn send_to_full_queue_drops() {
        let (conn, _rx) = Connection::channel(1);
        assert!(conn.send(Arc::new("one".into())));
        assert!(!conn.send(Arc::new("two".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_after_close_is_refused() {
        let (conn, mut rx) = Connection::channel(4);
        let _ = conn.close(CloseReason::Evicted);
        assert!(!conn.send(Arc::new("late".into())));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_to_dropped_receiver_fails() {
        let (conn, rx) = Connection::channel(4);
        drop(rx);
        assert!(!conn.send(Arc::new("x".into())));
    }

    #[test]
    fn first_close_reason_wins() {
        let (conn, _rx) = Connection::channel(1);
        assert!(conn.close(CloseReason::Evicted));
        assert!(!conn.close(CloseReason::Disconnected));
        assert_eq!(conn.close_reason(), Some(CloseReason::Evicted));
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let (conn, _rx) = Connection::channel(1);
        let conn = Arc::new(conn);
        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.closed().await })
        };
        let _ = conn.close(CloseReason::Shutdown);
        waiter.await.unwrap();
        assert!(conn.is_closed());
    }

    #[test]
    fn finish_runs_handler_once() {
        let (conn, _rx) = Connection::channel(1);
        let calls = counting_handler(&conn);
        assert_eq!(conn.finish(), CloseReason::Disconnected);
        assert_eq!(conn.finish(), CloseReason::Disconnected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finish_reports_earlier_reason() {
        let (conn, _rx) = Connection::channel(1);
        let reason = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&reason);
        conn.set_close_handler(move |_, r| *slot.lock() = Some(r));
        let _ = conn.close(CloseReason::Evicted);
        assert_eq!(conn.finish(), CloseReason::Evicted);
        assert_eq!(*reason.lock(), Some(CloseReason::Evicted));
    }

    #[test]
    fn handler_installed_after_finish_runs_immediately() {
        let (conn, _rx) = Connection::channel(1);
        let _ = conn.finish();
        let calls = counting_handler(&conn);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn racing_eviction_and_disconnect_fire_handler_once() {
        let (conn, _rx) = Connection::channel(1);
        let conn = Arc::new(conn);
        let calls = counting_handler(&conn);
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let conn = Arc::clone(&conn);
                std::thread::spawn(move || {
                    if i % 2 == 0 {
                        let _ = conn.close(CloseReason::Evicted);
                    }
                    let _ = conn.finish();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn heartbeat_flag_resets() {
        let (conn, _rx) = Connection::channel(1);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn close_frames() {
        assert_eq!(
            CloseReason::Evicted.close_frame(),
            Some((4001, "Another client subscribed to this token."))
        );
        assert_eq!(CloseReason::Shutdown.close_frame().map(|f| f.0), Some(1001));
        assert_eq!(CloseReason::TimedOut.close_frame().map(|f| f.0), Some(4002));
        assert!(CloseReason::Disconnected.close_frame().is_none());
    }

    #[test]
    fn eviction_is_distinguishable_from_shutdown() {
        assert_ne!(
            CloseReason::Evicted.close_frame().map(|f| f.0),
            CloseReason::Shutdown.close_frame().map(|f| f.0)
        );
    }
}
