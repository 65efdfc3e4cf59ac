//! Transport layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake, ALPN)
//!     → connection.rs (lifecycle tracking, state machine)
//!     → Hand off to HTTP layer
//!
//! Outgoing connection
//!     → TCP connect → optional proxy tunnel → optional TLS
//!     → connection.rs (stream ids, stream table)
//!
//! Connection States:
//!     Connecting → Established → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - A stream never outlives its connection

pub mod connection;
pub mod listener;
pub mod stream;
pub mod tls;

pub use connection::{Connection, ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use stream::{StreamId, StreamIdAllocator, StreamState, MAX_STREAM_ID};
pub use tls::TlsError;
