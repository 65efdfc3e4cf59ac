//! Classified errors.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use h2::Reason;
use http::StatusCode;

/// Shared, type-erased cause.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The peer refused the stream before processing it.
    StreamRefused,
    /// The peer reset the stream with a code other than `REFUSED_STREAM`.
    StreamReset,
    /// No stream identifiers remain on the connection.
    StreamIdsExhausted,
    /// The peer closed or is draining the connection.
    ConnectionClosedByPeer,
    /// The forward proxy answered CONNECT with a non-2xx status.
    ProxyRejected,
    /// The forward proxy's reply to CONNECT could not be parsed.
    ProxyMalformedResponse,
    /// The offload executor refused or dropped a computation.
    ExecutorRejected,
    /// Anything else.
    Generic,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::StreamRefused => "stream_refused",
            ErrorKind::StreamReset => "stream_reset",
            ErrorKind::StreamIdsExhausted => "stream_ids_exhausted",
            ErrorKind::ConnectionClosedByPeer => "connection_closed_by_peer",
            ErrorKind::ProxyRejected => "proxy_rejected",
            ErrorKind::ProxyMalformedResponse => "proxy_malformed_response",
            ErrorKind::ExecutorRejected => "executor_rejected",
            ErrorKind::Generic => "generic",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error tagged with a stable kind and a retryable flag.
///
/// Built once, where the raw failure is first observed, by
/// [`classify`](super::classify). The flag then travels unchanged.
///
/// A backtrace is captured only when there is no cause; wrappers around a
/// cause rely on the cause's own diagnostics.
#[derive(Clone)]
pub struct ClassifiedError {
    kind: ErrorKind,
    retryable: bool,
    message: String,
    reset_code: Option<Reason>,
    proxy_status: Option<StatusCode>,
    cause: Option<Cause>,
    backtrace: Option<Arc<Backtrace>>,
}

impl ClassifiedError {
    pub(crate) fn new(kind: ErrorKind, retryable: bool, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable,
            message: message.into(),
            reset_code: None,
            proxy_status: None,
            cause: None,
            backtrace: None,
        }
    }

    pub(crate) fn with_cause(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub(crate) fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub(crate) fn with_reset_code(mut self, code: Reason) -> Self {
        self.reset_code = Some(code);
        self
    }

    pub(crate) fn with_proxy_status(mut self, status: Option<StatusCode>) -> Self {
        self.proxy_status = status;
        self
    }

    /// Finish construction: capture a backtrace if nothing else explains us.
    pub(crate) fn seal(mut self) -> Self {
        if self.cause.is_none() {
            let bt = Backtrace::capture();
            if bt.status() == BacktraceStatus::Captured {
                self.backtrace = Some(Arc::new(bt));
            }
        }
        self
    }

    /// A `Generic`, non-retryable error with no cause.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generic, false, message).seal()
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns `true` if the operation may be retried on another stream or
    /// connection.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Peer-supplied reset code, for stream-level failures.
    pub fn reset_code(&self) -> Option<Reason> {
        self.reset_code
    }

    /// Status the forward proxy answered with, if any.
    pub fn proxy_status(&self) -> Option<StatusCode> {
        self.proxy_status
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Find an error of type `E` in the cause chain.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let mut next = self.source();
        while let Some(err) = next {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            next = err.source();
        }
        None
    }

    /// Backtrace captured at construction, when there was no cause.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_deref()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ClassifiedError");
        d.field("kind", &self.kind)
            .field("retryable", &self.retryable)
            .field("message", &self.message);
        if let Some(code) = self.reset_code {
            d.field("reset_code", &code);
        }
        if let Some(status) = self.proxy_status {
            d.field("proxy_status", &status);
        }
        if let Some(cause) = &self.cause {
            d.field("cause", cause);
        }
        d.finish()
    }
}

impl StdError for ClassifiedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn StdError + 'static))
    }
}

/// Marks a lower-layer error as safe to retry.
///
/// Classification never downgrades an error wrapped in `Retryable`.
#[derive(Debug)]
pub struct Retryable(pub Box<dyn StdError + Send + Sync + 'static>);

impl Retryable {
    pub fn new(err: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self(err.into())
    }
}

impl fmt::Display for Retryable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for Retryable {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("inner")]
    struct Inner;

    #[test]
    fn downcast_walks_cause_chain() {
        let err = ClassifiedError::new(ErrorKind::Generic, false, "outer")
            .with_cause(Arc::new(Retryable::new(Inner)))
            .seal();

        assert!(err.downcast_ref::<Retryable>().is_some());
        assert!(err.downcast_ref::<Inner>().is_some());
        assert!(err.downcast_ref::<std::io::Error>().is_none());
    }

    #[test]
    fn wrapper_with_cause_skips_backtrace() {
        let err = ClassifiedError::new(ErrorKind::Generic, false, "outer")
            .with_cause(Arc::new(Inner))
            .seal();
        assert!(err.backtrace().is_none());
        assert_eq!(err.to_string(), "outer");
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(ErrorKind::StreamIdsExhausted.to_string(), "stream_ids_exhausted");
        assert_eq!(ErrorKind::ProxyRejected.as_str(), "proxy_rejected");
    }
}
