//! RPC error type.

use std::time::Duration;

use super::status::{Code, RpcStatus};
use crate::failure::ClassifiedError;
use crate::resilience::RetryableError;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The server completed the call with a non-OK status.
    #[error("rpc failed: {0}")]
    Status(RpcStatus),

    /// The call never produced a status; the transport failure keeps its
    /// classification.
    #[error(transparent)]
    Transport(#[from] ClassifiedError),

    #[error("rpc protocol violation: {0}")]
    Protocol(String),

    #[error("message codec failed: {0}")]
    Codec(#[from] std::io::Error),

    #[error("rpc deadline of {0:?} exceeded")]
    Timeout(Duration),
}

impl RpcError {
    /// Status code of a completed call, if it completed.
    pub fn code(&self) -> Option<Code> {
        match self {
            RpcError::Status(status) => Some(status.code),
            _ => None,
        }
    }

    /// Only transport failures classified as retryable are retried; a status
    /// is the server's answer and is never retried here.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Transport(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl RetryableError for RpcError {
    fn is_retryable(&self) -> bool {
        RpcError::is_retryable(self)
    }
}
