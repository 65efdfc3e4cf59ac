//! Forward proxy tunnels.
//!
//! # Data Flow
//! ```text
//! TCP to proxy → tunnel.rs (CONNECT host:port) → response.rs (parse reply)
//!     → 2xx: raw transport handed to the TLS handshake
//!     → otherwise: ProxyRejected / ProxyMalformedResponse
//! ```
//!
//! # Design Decisions
//! - No secure handshake starts before the tunnel is established
//! - One CONNECT per connection establishment, never retried here

pub mod response;
pub mod tunnel;

pub use response::{ProxyResponseError, MAX_HEAD_BYTES};
pub use tunnel::{authority, establish, ProxyTunnel, TunnelState};
