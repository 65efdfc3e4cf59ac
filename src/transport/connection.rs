//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state (Connecting → Established → Draining → Closed)
//! - Own the connection's streams and stream-id counter
//! - Generate unique connection IDs for tracing
//! - Count accepted and active connections for graceful shutdown
//!
//! # Design Decisions
//! - Stream ids and the stream table change under one lock
//! - Closing a connection resets every stream still open
//! - Failures are reported classified, never as bare states

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use h2::Reason;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::stream::{StreamId, StreamIdAllocator, StreamState};
use crate::failure::{classify, ClassifiedError, RawFailure};
use crate::observability::metrics;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport, tunnel or handshake still in progress.
    Connecting,
    /// Ready for new streams.
    Established,
    /// No new streams; in-flight streams may finish.
    Draining,
    /// Connection is closed.
    Closed,
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    ids: StreamIdAllocator,
    streams: BTreeMap<StreamId, StreamState>,
    go_away: Option<(StreamId, Reason)>,
}

/// A connection and the streams it owns.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    inner: Mutex<Inner>,
}

impl Connection {
    /// A connection admitting the protocol maximum of streams.
    pub fn new() -> Self {
        Self::with_allocator(StreamIdAllocator::new())
    }

    /// A connection admitting at most `streams` streams.
    pub fn with_stream_limit(streams: u32) -> Self {
        Self::with_allocator(StreamIdAllocator::with_capacity(streams))
    }

    fn with_allocator(ids: StreamIdAllocator) -> Self {
        Self {
            id: ConnectionId::new(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Connecting,
                ids,
                streams: BTreeMap::new(),
                go_away: None,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Mark the handshake complete.
    pub fn establish(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Connecting {
            inner.state = ConnectionState::Established;
            tracing::trace!(connection_id = %self.id, "Connection established");
        }
    }

    /// Returns `true` while new streams may be opened.
    pub fn is_usable(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == ConnectionState::Established && !inner.ids.is_exhausted()
    }

    /// Open a stream with the next identifier.
    pub fn open_stream(&self) -> Result<StreamId, ClassifiedError> {
        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            ConnectionState::Established => {}
            ConnectionState::Draining | ConnectionState::Closed => {
                let go_away = inner.go_away;
                drop(inner);
                return Err(match go_away {
                    Some((last_stream_id, code)) => classify(RawFailure::GoAway {
                        connection: self.id,
                        last_stream_id,
                        code,
                        stream_id: None,
                    }),
                    // Drained or closed on our side, not by the peer.
                    None => ClassifiedError::generic(format!(
                        "{} was {} locally",
                        self.id,
                        if state == ConnectionState::Draining {
                            "drained"
                        } else {
                            "closed"
                        }
                    )),
                });
            }
            ConnectionState::Connecting => {
                drop(inner);
                return Err(ClassifiedError::generic(format!(
                    "{} is not established yet",
                    self.id
                )));
            }
        }

        match inner.ids.allocate() {
            Some(stream_id) => {
                inner.streams.insert(stream_id, StreamState::Open);
                Ok(stream_id)
            }
            None => {
                let max_stream_id = inner.ids.max();
                drop(inner);
                tracing::debug!(connection_id = %self.id, max_stream_id, "Stream ids exhausted");
                Err(classify(RawFailure::StreamIdsExhausted {
                    connection: self.id,
                    max_stream_id,
                }))
            }
        }
    }

    /// The local side finished sending on `stream_id`.
    pub fn half_close(&self, stream_id: StreamId) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.streams.get_mut(&stream_id) {
            if *state == StreamState::Open {
                *state = StreamState::HalfClosed;
            }
        }
    }

    /// `stream_id` completed normally.
    pub fn close_stream(&self, stream_id: StreamId) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.streams.get_mut(&stream_id) {
            if !state.is_terminal() {
                *state = StreamState::Closed;
            }
        }
    }

    /// `stream_id` was reset, by either side.
    pub fn reset_stream(&self, stream_id: StreamId) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.streams.get_mut(&stream_id) {
            if !state.is_terminal() {
                *state = StreamState::Reset;
            }
        }
    }

    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        self.inner.lock().streams.get(&stream_id).copied()
    }

    /// Streams not yet closed or reset.
    pub fn open_streams(&self) -> usize {
        self.inner
            .lock()
            .streams
            .values()
            .filter(|s| !s.is_terminal())
            .count()
    }

    /// Forget streams that reached a terminal state.
    pub fn prune(&self) {
        self.inner.lock().streams.retain(|_, s| !s.is_terminal());
    }

    /// The peer sent GOAWAY: stop opening streams and fail those above
    /// `last_stream_id`.
    pub fn go_away(&self, last_stream_id: StreamId, code: Reason) {
        let mut inner = self.inner.lock();
        inner.go_away = Some((last_stream_id, code));
        if inner.state != ConnectionState::Closed {
            inner.state = ConnectionState::Draining;
        }
        for (id, state) in inner.streams.iter_mut() {
            if *id > last_stream_id && !state.is_terminal() {
                *state = StreamState::Reset;
            }
        }
        tracing::debug!(
            connection_id = %self.id,
            last_stream_id = %last_stream_id,
            code = ?code,
            "GOAWAY received"
        );
    }

    /// Classified failure for `stream_id` after the peer's GOAWAY.
    pub fn go_away_error(&self, stream_id: Option<StreamId>) -> Option<ClassifiedError> {
        let (last_stream_id, code) = self.inner.lock().go_away?;
        Some(classify(RawFailure::GoAway {
            connection: self.id,
            last_stream_id,
            code,
            stream_id,
        }))
    }

    /// Stop opening new streams; in-flight streams may finish.
    pub fn drain(&self) {
        let mut inner = self.inner.lock();
        if matches!(
            inner.state,
            ConnectionState::Connecting | ConnectionState::Established
        ) {
            inner.state = ConnectionState::Draining;
        }
    }

    /// Close the connection, resetting every stream still open.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Closed;
        for state in inner.streams.values_mut() {
            if !state.is_terminal() {
                *state = StreamState::Reset;
            }
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks accepted connections for metrics and graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicU64,
    accepted: AtomicU64,
    idle: Notify,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        self.inner.accepted.fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened();
        ConnectionGuard {
            tracker: Arc::clone(&self.inner),
            id,
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Connections accepted since start.
    pub fn accepted_count(&self) -> u64 {
        self.inner.accepted.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or `timeout` passes.
    ///
    /// Returns `true` if every connection closed in time.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<TrackerInner>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.tracker.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
        metrics::connection_closed();
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::ErrorKind;

    fn established(limit: u32) -> Connection {
        let conn = Connection::with_stream_limit(limit);
        conn.establish();
        conn
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn exhaustion_is_retryable() {
        let conn = established(1);
        assert_eq!(conn.open_stream().unwrap(), StreamId::new(1));
        assert!(!conn.is_usable());

        let err = conn.open_stream().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamIdsExhausted);
        assert!(err.is_retryable());
    }

    #[test]
    fn not_established_rejects_streams() {
        let conn = Connection::new();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.open_stream().is_err());
    }

    #[test]
    fn close_resets_open_streams() {
        let conn = established(8);
        let a = conn.open_stream().unwrap();
        let b = conn.open_stream().unwrap();
        conn.close_stream(a);

        conn.close();
        assert_eq!(conn.stream_state(a), Some(StreamState::Closed));
        assert_eq!(conn.stream_state(b), Some(StreamState::Reset));
        assert_eq!(conn.open_streams(), 0);
    }

    #[test]
    fn go_away_fails_unstarted_streams_only() {
        let conn = established(8);
        let processed = conn.open_stream().unwrap();
        let unprocessed = conn.open_stream().unwrap();

        conn.go_away(processed, Reason::NO_ERROR);
        assert_eq!(conn.state(), ConnectionState::Draining);
        assert_eq!(conn.stream_state(processed), Some(StreamState::Open));
        assert_eq!(conn.stream_state(unprocessed), Some(StreamState::Reset));

        assert!(conn.go_away_error(Some(unprocessed)).unwrap().is_retryable());
        assert!(!conn.go_away_error(Some(processed)).unwrap().is_retryable());

        let err = conn.open_stream().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionClosedByPeer);
        assert!(err.is_retryable());
    }

    #[test]
    fn local_drain_or_close_is_not_peer_close() {
        let drained = established(8);
        drained.drain();
        let err = drained.open_stream().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generic);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("drained locally"), "{err}");

        let closed = established(8);
        closed.close();
        let err = closed.open_stream().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generic);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("closed locally"), "{err}");
    }

    #[test]
    fn close_after_peer_go_away_keeps_peer_classification() {
        let conn = established(8);
        conn.go_away(StreamId::new(0), Reason::NO_ERROR);
        conn.close();
        let err = conn.open_stream().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionClosedByPeer);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn tracker_counts_and_waits() {
        let tracker = ConnectionTracker::new();
        let guard1 = tracker.track(ConnectionId::new());
        let guard2 = tracker.track(ConnectionId::new());
        assert_eq!(tracker.active_count(), 2);
        assert_eq!(tracker.accepted_count(), 2);

        drop(guard1);
        assert!(!tracker.wait_idle(Duration::from_millis(20)).await);

        drop(guard2);
        assert!(tracker.wait_idle(Duration::from_millis(20)).await);
        assert_eq!(tracker.accepted_count(), 2);
    }
}
