//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Server:
//!     TCP/TLS connection
//!         → server.rs (hyper-util auto: HTTP/1.1 or HTTP/2, Axum middleware)
//!         → bridge: read → handle (service.rs) → write (response.rs)
//!         → Send to client
//!
//! Client:
//!     client.rs (connection cache, proxy tunnel, TLS, stream model)
//!         → bridge: write → send → read
//!         → buffered response with trailers
//! ```

pub mod client;
pub mod request;
pub mod response;
pub mod server;
pub mod service;

use bytes::Bytes;

/// A request with its body fully read.
pub type HttpRequest = http::Request<Bytes>;

/// A response with its body buffered. Trailers travel as a [`Trailers`]
/// extension.
pub type HttpResponse = http::Response<Bytes>;

pub use client::HttpClient;
pub use request::{request_id, set_request_id, X_REQUEST_ID};
pub use response::{text, Trailers};
pub use server::{HttpServer, ServerContext, ServerError};
pub use service::{service_fn, HttpService, ServiceContext, ServiceFn};
