//! Stream identifiers and per-stream state.

use std::fmt;

/// Largest identifier a stream may carry (31 bits).
pub const MAX_STREAM_ID: u32 = (1 << 31) - 1;

/// Identifier of a stream within one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(u32);

impl StreamId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Client-initiated streams carry odd identifiers.
    pub const fn is_client_initiated(&self) -> bool {
        self.0 % 2 == 1
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<StreamId> for u32 {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

/// Stream lifecycle.
///
/// ```text
/// Idle → Open → HalfClosed → Closed
///          └───────┴──→ Reset
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    /// The local side has finished sending.
    HalfClosed,
    Reset,
    Closed,
}

impl StreamState {
    /// Returns `true` once the stream can carry no more frames.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Reset | StreamState::Closed)
    }
}

/// Hands out client stream identifiers: odd, starting at 1, step 2.
#[derive(Debug, Clone)]
pub struct StreamIdAllocator {
    next: u32,
    max: u32,
}

impl StreamIdAllocator {
    /// Allocator bounded by the protocol maximum.
    pub fn new() -> Self {
        Self::with_max(MAX_STREAM_ID)
    }

    /// Allocator that stops after identifier `max`.
    pub fn with_max(max: u32) -> Self {
        Self {
            next: 1,
            max: max.min(MAX_STREAM_ID),
        }
    }

    /// Allocator that admits exactly `streams` streams.
    pub fn with_capacity(streams: u32) -> Self {
        let max = u64::from(streams.max(1)) * 2 - 1;
        Self::with_max(u32::try_from(max).unwrap_or(MAX_STREAM_ID))
    }

    /// Next identifier, or `None` once exhausted.
    pub fn allocate(&mut self) -> Option<StreamId> {
        if self.next > self.max {
            return None;
        }
        let id = StreamId(self.next);
        self.next = self.next.saturating_add(2);
        Some(id)
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn is_exhausted(&self) -> bool {
        self.next > self.max
    }
}

impl Default for StreamIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
