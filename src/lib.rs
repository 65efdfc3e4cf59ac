//! Conduit: an async HTTP/1.1, HTTP/2 and unary RPC networking core.
//!
//! # Architecture Overview
//!
//! ```text
//!   accept (I/O executor)        offload bridge            worker executor
//!   ─────────────────────▶ read ──────┬──────▶ handle ──────┬──────▶ write
//!                                     │  context snapshot  │
//!                                     └─ capture/restore ──┘
//!
//!   client: TCP ─▶ [proxy CONNECT tunnel] ─▶ [TLS] ─▶ HTTP/1.1 | HTTP/2 | RPC
//!                      │                                │
//!                      └──────── failure taxonomy ◀─────┘ ─▶ caller retry layer
//! ```
//!
//! - [`context`]: request-scoped state that survives thread hops
//! - [`execution`]: per-stage strategies, executors and the offload bridge
//! - [`failure`]: classification of transport failures as retryable or fatal
//! - [`proxy`]: CONNECT tunnel negotiation through forward proxies
//! - [`transport`]: stream and connection models, listener, TLS configs
//! - [`http`], [`rpc`]: server and client surfaces
//! - [`resilience`]: caller-side retries driven by classification

// Core
pub mod context;
pub mod execution;
pub mod failure;
pub mod proxy;
pub mod transport;

// Surfaces
pub mod demo;
pub mod http;
pub mod rpc;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::RuntimeConfig;
pub use failure::{ClassifiedError, ErrorKind};
pub use http::{HttpClient, HttpServer};
pub use lifecycle::Shutdown;
