//! Per-call client metadata.

use std::time::Duration;

use super::codec::ContentCodec;
use crate::execution::ExecutionStrategy;

/// Options for a single RPC.
#[derive(Debug, Clone, Default)]
pub struct RpcClientMetadata {
    strategy: Option<ExecutionStrategy>,
    request_encoding: ContentCodec,
    timeout: Option<Duration>,
}

impl RpcClientMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strategy for this call; wins over the client's configured one.
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_request_encoding(mut self, codec: ContentCodec) -> Self {
        self.request_encoding = codec;
        self
    }

    /// Deadline for the whole call, also announced to the server.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn strategy(&self) -> Option<&ExecutionStrategy> {
        self.strategy.as_ref()
    }

    pub fn request_encoding(&self) -> ContentCodec {
        self.request_encoding
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
