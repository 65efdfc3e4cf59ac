//! Unary RPC over HTTP/2.
//!
//! # Data Flow
//! ```text
//! RpcClient::unary(path, metadata, message)
//!     → codec.rs (compress, length-prefix)
//!     → HttpClient::send with the per-call strategy
//!     → server: UnaryService decodes, calls the handler, frames the reply
//!     → grpc-status from trailers (or headers for trailers-only)
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod metadata;
pub mod server;
pub mod status;

use http::HeaderValue;

pub use client::RpcClient;
pub use codec::ContentCodec;
pub use error::RpcError;
pub use metadata::RpcClientMetadata;
pub use server::{unary_service, UnaryService};
pub use status::{Code, RpcStatus};

pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// `application/grpc`, optionally with a `+format` suffix.
pub(crate) fn is_grpc_content_type(value: &HeaderValue) -> bool {
    value.to_str().is_ok_and(|v| {
        let v = v.split(';').next().unwrap_or_default().trim();
        v == GRPC_CONTENT_TYPE || v.starts_with("application/grpc+")
    })
}
