//! Classification of raw transport failures.
//!
//! # Rules
//! - `REFUSED_STREAM` from the peer → `StreamRefused`, retryable
//! - no stream ids left on the connection → `StreamIdsExhausted`, retryable
//! - any other peer reset → `StreamReset`, retryable only if the
//!   [`ResetPolicy`] says so (default: never)
//! - peer GOAWAY → `ConnectionClosedByPeer`, retryable for streams the peer
//!   never started
//! - proxy CONNECT failures → `ProxyRejected` / `ProxyMalformedResponse`
//! - executor refusal → `ExecutorRejected`
//! - everything else → `Generic`, retryable only if a lower layer said so
//!
//! An error that is already classified anywhere in a raw failure's source
//! chain is returned as is, and is not counted again. A lower layer's
//! retryable verdict still raises its retryable flag.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

use h2::Reason;

use super::kind::{Cause, ClassifiedError, ErrorKind, Retryable};
use crate::execution::RejectedExecution;
use crate::observability::metrics;
use crate::proxy::ProxyResponseError;
use crate::transport::{ConnectionId, StreamId};

/// A failure as reported by a collaborator, before classification.
#[derive(Debug)]
pub enum RawFailure {
    /// RST_STREAM received from the peer.
    StreamReset { stream_id: StreamId, code: Reason },
    /// The connection has handed out its last stream identifier.
    StreamIdsExhausted {
        connection: ConnectionId,
        max_stream_id: u32,
    },
    /// GOAWAY received from the peer.
    ///
    /// `stream_id` is the stream the failure is reported for; `None` means
    /// the stream was never assigned an identifier.
    GoAway {
        connection: ConnectionId,
        last_stream_id: StreamId,
        code: Reason,
        stream_id: Option<StreamId>,
    },
    /// CONNECT through the forward proxy failed.
    Proxy(ProxyResponseError),
    /// The offload executor refused a computation.
    Executor(RejectedExecution),
    Hyper(hyper::Error),
    H2(h2::Error),
    Io(io::Error),
    /// Any other error, with the lower layer's retryable verdict.
    Other {
        source: Box<dyn StdError + Send + Sync + 'static>,
        retryable: bool,
    },
}

impl From<hyper::Error> for RawFailure {
    fn from(err: hyper::Error) -> Self {
        RawFailure::Hyper(err)
    }
}

impl From<h2::Error> for RawFailure {
    fn from(err: h2::Error) -> Self {
        RawFailure::H2(err)
    }
}

impl From<io::Error> for RawFailure {
    fn from(err: io::Error) -> Self {
        RawFailure::Io(err)
    }
}

impl From<ProxyResponseError> for RawFailure {
    fn from(err: ProxyResponseError) -> Self {
        RawFailure::Proxy(err)
    }
}

impl From<RejectedExecution> for RawFailure {
    fn from(err: RejectedExecution) -> Self {
        RawFailure::Executor(err)
    }
}

/// Decides which peer reset codes, besides `REFUSED_STREAM`, are retryable.
///
/// This is the only place additional codes may be declared safe. The default
/// policy declares none.
pub trait ResetPolicy: Send + Sync + fmt::Debug {
    fn is_retryable(&self, code: Reason) -> bool;
}

/// Default [`ResetPolicy`]: no reset other than `REFUSED_STREAM` is retryable.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefusedStreamOnly;

impl ResetPolicy for RefusedStreamOnly {
    fn is_retryable(&self, _code: Reason) -> bool {
        false
    }
}

/// Classifies raw failures.
#[derive(Debug, Clone, Default)]
pub struct FailureClassifier {
    reset_policy: Option<Arc<dyn ResetPolicy>>,
}

impl FailureClassifier {
    /// Classifier with the default reset policy.
    pub const fn new() -> Self {
        Self { reset_policy: None }
    }

    /// Classifier with a custom reset policy.
    pub fn with_reset_policy(policy: Arc<dyn ResetPolicy>) -> Self {
        Self {
            reset_policy: Some(policy),
        }
    }

    fn reset_retryable(&self, code: Reason) -> bool {
        match &self.reset_policy {
            Some(policy) => policy.is_retryable(code),
            None => RefusedStreamOnly.is_retryable(code),
        }
    }

    /// Classify `raw`.
    pub fn classify(&self, raw: RawFailure) -> ClassifiedError {
        let classified = match self.classify_inner(raw) {
            Outcome::Passed(err) => return err,
            Outcome::Fresh(err) => err,
        };
        metrics::record_classified(classified.kind(), classified.is_retryable());
        tracing::debug!(
            kind = %classified.kind(),
            retryable = classified.is_retryable(),
            error = %classified,
            "Failure classified"
        );
        classified
    }

    fn classify_inner(&self, raw: RawFailure) -> Outcome {
        let fresh = match raw {
            RawFailure::StreamReset { stream_id, code } => self.stream_reset(stream_id, code),
            RawFailure::StreamIdsExhausted {
                connection,
                max_stream_id,
            } => ClassifiedError::new(
                ErrorKind::StreamIdsExhausted,
                true,
                format!("stream IDs exhausted on {connection} (max {max_stream_id})"),
            )
            .seal(),
            RawFailure::GoAway {
                connection,
                last_stream_id,
                code,
                stream_id,
            } => {
                // Streams above last-stream-id were never processed.
                let unstarted = stream_id.map_or(true, |id| id > last_stream_id);
                let message = match stream_id {
                    Some(id) => format!(
                        "GOAWAY received on {connection} (last_stream_id={last_stream_id}, code={code:?}) for streamId={id}"
                    ),
                    None => format!(
                        "GOAWAY received on {connection} (last_stream_id={last_stream_id}, code={code:?})"
                    ),
                };
                ClassifiedError::new(ErrorKind::ConnectionClosedByPeer, unstarted, message)
                    .with_reset_code(code)
                    .seal()
            }
            RawFailure::Proxy(err) => {
                let kind = match err {
                    ProxyResponseError::Rejected { .. } => ErrorKind::ProxyRejected,
                    ProxyResponseError::Malformed { .. } => ErrorKind::ProxyMalformedResponse,
                };
                let status = err.status();
                ClassifiedError::new(kind, false, err.to_string())
                    .with_proxy_status(status)
                    .with_cause(Arc::new(err))
                    .seal()
            }
            RawFailure::Executor(err) => {
                ClassifiedError::new(ErrorKind::ExecutorRejected, false, err.to_string())
                    .with_cause(Arc::new(err))
                    .seal()
            }
            RawFailure::Hyper(err) => {
                if let Some(found) = self.classify_chain(&err) {
                    return found.attach(Arc::new(err));
                }
                if err.is_canceled() {
                    // The dispatcher dropped the request before writing it.
                    ClassifiedError::new(ErrorKind::ConnectionClosedByPeer, true, err.to_string())
                        .with_cause(Arc::new(err))
                        .seal()
                } else {
                    self.generic(Arc::new(err), false)
                }
            }
            RawFailure::H2(err) => {
                let classified = self.h2(&err);
                classified.with_cause(Arc::new(err)).seal()
            }
            RawFailure::Io(err) => {
                let found = err
                    .get_ref()
                    .and_then(|inner| self.classify_chain(inner as &(dyn StdError + 'static)));
                if let Some(found) = found {
                    return found.attach(Arc::new(err));
                }
                self.generic(Arc::new(err), false)
            }
            RawFailure::Other { source, retryable } => {
                let found = self.classify_chain(&*source as &(dyn StdError + 'static));
                if let Some(found) = found {
                    let outcome = found.attach(Arc::from(source));
                    return if retryable {
                        outcome.raise_retryable()
                    } else {
                        outcome
                    };
                }
                self.generic(Arc::from(source), retryable)
            }
        };
        Outcome::Fresh(fresh)
    }

    fn stream_reset(&self, stream_id: StreamId, code: Reason) -> ClassifiedError {
        if code == Reason::REFUSED_STREAM {
            ClassifiedError::new(
                ErrorKind::StreamRefused,
                true,
                format!("RST_STREAM received for streamId={stream_id}, stream refused"),
            )
        } else {
            ClassifiedError::new(
                ErrorKind::StreamReset,
                self.reset_retryable(code),
                format!("RST_STREAM received for streamId={stream_id} with error code: {code:?}"),
            )
        }
        .with_reset_code(code)
        .seal()
    }

    /// Classification of an `h2::Error`, without cause attached.
    fn h2(&self, err: &h2::Error) -> ClassifiedError {
        let reason = err.reason();
        if reason == Some(Reason::REFUSED_STREAM) {
            return ClassifiedError::new(ErrorKind::StreamRefused, true, err.to_string())
                .with_reset_code(Reason::REFUSED_STREAM);
        }
        if err.is_go_away() && err.is_remote() {
            // h2 fails only streams above last-stream-id with a graceful
            // GOAWAY; an error GOAWAY may abort streams the peer processed.
            let code = reason.unwrap_or(Reason::NO_ERROR);
            return ClassifiedError::new(
                ErrorKind::ConnectionClosedByPeer,
                code == Reason::NO_ERROR,
                err.to_string(),
            )
            .with_reset_code(code);
        }
        if err.is_reset() && err.is_remote() {
            let code = reason.unwrap_or(Reason::INTERNAL_ERROR);
            return ClassifiedError::new(
                ErrorKind::StreamReset,
                self.reset_retryable(code),
                err.to_string(),
            )
            .with_reset_code(code);
        }
        ClassifiedError::new(ErrorKind::Generic, false, err.to_string())
    }

    /// Walk a source chain for something that decides the classification.
    fn classify_chain(&self, err: &(dyn StdError + 'static)) -> Option<Found> {
        let mut next = Some(err);
        while let Some(current) = next {
            if let Some(classified) = current.downcast_ref::<ClassifiedError>() {
                return Some(Found::Classified(classified.clone()));
            }
            if let Some(h2) = current.downcast_ref::<h2::Error>() {
                let classified = self.h2(h2);
                if classified.kind() != ErrorKind::Generic {
                    return Some(Found::Decided(classified));
                }
            }
            if current.downcast_ref::<Retryable>().is_some() {
                return Some(Found::Decided(ClassifiedError::new(
                    ErrorKind::Generic,
                    true,
                    current.to_string(),
                )));
            }
            next = current.source();
        }
        None
    }

    fn generic(&self, cause: Cause, retryable: bool) -> ClassifiedError {
        ClassifiedError::new(ErrorKind::Generic, retryable, cause.to_string())
            .with_cause(cause)
            .seal()
    }
}

/// Outcome of a source-chain walk.
enum Found {
    /// Classified earlier; returned unchanged.
    Classified(ClassifiedError),
    /// A fresh classification still missing its cause.
    Decided(ClassifiedError),
}

impl Found {
    fn attach(self, cause: Cause) -> Outcome {
        match self {
            Found::Classified(err) => Outcome::Passed(err),
            Found::Decided(err) => Outcome::Fresh(err.with_cause(cause).seal()),
        }
    }
}

/// Result of [`FailureClassifier::classify_inner`].
#[derive(Debug)]
enum Outcome {
    /// Classified by this call; recorded once.
    Fresh(ClassifiedError),
    /// Classified earlier; already recorded.
    Passed(ClassifiedError),
}

impl Outcome {
    fn raise_retryable(self) -> Self {
        match self {
            Outcome::Fresh(err) => Outcome::Fresh(err.with_retryable(true)),
            Outcome::Passed(err) => Outcome::Passed(err.with_retryable(true)),
        }
    }
}

static DEFAULT_CLASSIFIER: FailureClassifier = FailureClassifier::new();

/// Classify `raw` with the default reset policy.
pub fn classify(raw: impl Into<RawFailure>) -> ClassifiedError {
    DEFAULT_CLASSIFIER.classify(raw.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn reset(code: Reason) -> RawFailure {
        RawFailure::StreamReset {
            stream_id: StreamId::new(3),
            code,
        }
    }

    #[test]
    fn refused_stream_is_retryable() {
        let err = classify(reset(Reason::REFUSED_STREAM));
        assert_eq!(err.kind(), ErrorKind::StreamRefused);
        assert!(err.is_retryable());
        assert_eq!(err.reset_code(), Some(Reason::REFUSED_STREAM));
        assert_eq!(
            err.to_string(),
            "RST_STREAM received for streamId=3, stream refused"
        );
    }

    #[test]
    fn other_resets_are_not_retryable() {
        for code in [
            Reason::CANCEL,
            Reason::INTERNAL_ERROR,
            Reason::PROTOCOL_ERROR,
            Reason::ENHANCE_YOUR_CALM,
            Reason::NO_ERROR,
        ] {
            let err = classify(reset(code));
            assert_eq!(err.kind(), ErrorKind::StreamReset);
            assert!(!err.is_retryable(), "{code:?} must not be retryable");
            assert_eq!(err.reset_code(), Some(code));
        }
    }

    #[test]
    fn custom_reset_policy_extends_retryable_codes() {
        #[derive(Debug)]
        struct CalmDown;
        impl ResetPolicy for CalmDown {
            fn is_retryable(&self, code: Reason) -> bool {
                code == Reason::ENHANCE_YOUR_CALM
            }
        }

        let classifier = FailureClassifier::with_reset_policy(Arc::new(CalmDown));
        let err = classifier.classify(reset(Reason::ENHANCE_YOUR_CALM));
        assert_eq!(err.kind(), ErrorKind::StreamReset);
        assert!(err.is_retryable());
        assert!(!classifier.classify(reset(Reason::CANCEL)).is_retryable());
    }

    #[test]
    fn stream_id_exhaustion_is_retryable() {
        let err = classify(RawFailure::StreamIdsExhausted {
            connection: ConnectionId::new(),
            max_stream_id: 7,
        });
        assert_eq!(err.kind(), ErrorKind::StreamIdsExhausted);
        assert!(err.is_retryable());
    }

    #[test]
    fn go_away_retryable_only_for_unstarted_streams() {
        let connection = ConnectionId::new();
        let go_away = |stream_id| RawFailure::GoAway {
            connection,
            last_stream_id: StreamId::new(5),
            code: Reason::NO_ERROR,
            stream_id,
        };

        assert!(classify(go_away(Some(StreamId::new(7)))).is_retryable());
        assert!(classify(go_away(None)).is_retryable());

        let started = classify(go_away(Some(StreamId::new(5))));
        assert_eq!(started.kind(), ErrorKind::ConnectionClosedByPeer);
        assert!(!started.is_retryable());
    }

    #[test]
    fn proxy_failures_keep_status() {
        let err = classify(ProxyResponseError::Rejected {
            target: "example.com:443".into(),
            status: StatusCode::FORBIDDEN,
        });
        assert_eq!(err.kind(), ErrorKind::ProxyRejected);
        assert!(!err.is_retryable());
        assert_eq!(err.proxy_status(), Some(StatusCode::FORBIDDEN));
        assert!(err.downcast_ref::<ProxyResponseError>().is_some());

        let err = classify(ProxyResponseError::Malformed {
            target: "example.com:443".into(),
            status: None,
            detail: "garbage".into(),
        });
        assert_eq!(err.kind(), ErrorKind::ProxyMalformedResponse);
        assert_eq!(err.proxy_status(), None);
    }

    #[test]
    fn generic_preserves_lower_layer_retryable_marker() {
        let err = classify(RawFailure::Other {
            source: "boom".into(),
            retryable: true,
        });
        assert_eq!(err.kind(), ErrorKind::Generic);
        assert!(err.is_retryable());

        let wrapped = io::Error::new(io::ErrorKind::Other, Retryable::new("flaky"));
        assert!(classify(wrapped).is_retryable());

        let plain = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err = classify(plain);
        assert_eq!(err.kind(), ErrorKind::Generic);
        assert!(!err.is_retryable());
    }

    #[test]
    fn already_classified_passes_through() {
        let first = classify(reset(Reason::REFUSED_STREAM));
        let again = classify(RawFailure::Other {
            source: Box::new(first),
            retryable: false,
        });
        assert_eq!(again.kind(), ErrorKind::StreamRefused);
        assert!(again.is_retryable());
    }

    #[test]
    fn lower_layer_retryable_verdict_survives_pass_through() {
        let lower = ClassifiedError::generic("lower");
        assert!(!lower.is_retryable());
        let err = classify(RawFailure::Other {
            source: Box::new(lower),
            retryable: true,
        });
        assert_eq!(err.kind(), ErrorKind::Generic);
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "lower");
    }

    #[test]
    fn pass_through_is_not_classified_again() {
        let classifier = FailureClassifier::new();
        let first = classifier.classify(reset(Reason::CANCEL));

        let outcome = classifier.classify_inner(RawFailure::Other {
            source: Box::new(first.clone()),
            retryable: false,
        });
        assert!(matches!(&outcome, Outcome::Passed(err) if err.kind() == ErrorKind::StreamReset));

        let wrapped = io::Error::new(io::ErrorKind::Other, first);
        assert!(matches!(
            classifier.classify_inner(RawFailure::Io(wrapped)),
            Outcome::Passed(_)
        ));

        assert!(matches!(
            classifier.classify_inner(reset(Reason::CANCEL)),
            Outcome::Fresh(_)
        ));
    }

    #[test]
    fn executor_rejection() {
        let err = classify(RejectedExecution::Shutdown {
            executor: "w".into(),
        });
        assert_eq!(err.kind(), ErrorKind::ExecutorRejected);
        assert!(!err.is_retryable());
    }

    #[test]
    fn h2_refused_and_reset_errors() {
        let refused = classify(h2::Error::from(Reason::REFUSED_STREAM));
        assert_eq!(refused.kind(), ErrorKind::StreamRefused);
        assert!(refused.is_retryable());

        // A bare reason is a local (library) error, not a peer reset.
        let local = classify(h2::Error::from(Reason::CANCEL));
        assert_eq!(local.kind(), ErrorKind::Generic);
        assert!(!local.is_retryable());
    }
}
