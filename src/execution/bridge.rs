//! The offloading bridge: the single hand-off point between the I/O thread
//! and the worker executor.
//!
//! # Data Flow
//! ```text
//! run(stage, f)
//!   ├─ not offloaded → f() inline, context untouched
//!   └─ offloaded     → capture() → submit ──► worker: cancelled? → restore → f()
//!                                                         │
//!        caller ◄── oneshot (value, final snapshot) ◄─────┘
//! ```
//!
//! The result is delivered through a oneshot channel; the caller's task is
//! woken wherever it is already scheduled, no extra hop is submitted.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::oneshot;

use super::cancel::{CancelSignal, Cancelled};
use super::executor::{Executor, RejectedExecution};
use super::strategy::{ExecutionStrategy, Stage};
use crate::context::{scope, ContextSnapshot};
use crate::failure::{classify, ClassifiedError, RawFailure};
use crate::observability::metrics;

/// Error carried as the cause when an offloaded computation panics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("offloaded {stage} computation panicked: {message}")]
pub struct OffloadPanic {
    pub stage: Stage,
    pub message: String,
}

enum Outcome<T> {
    Done(T, ContextSnapshot),
    Cancelled,
    Panicked(String),
}

/// Per-request offloading bridge.
///
/// Holds the request's effective strategy, the executor offloaded stages run
/// on, and the request's cancel signal.
#[derive(Debug, Clone)]
pub struct OffloadBridge {
    strategy: ExecutionStrategy,
    executor: Arc<dyn Executor>,
    signal: CancelSignal,
}

impl OffloadBridge {
    pub fn new(strategy: ExecutionStrategy, executor: Arc<dyn Executor>) -> Self {
        Self {
            strategy,
            executor,
            signal: CancelSignal::new(),
        }
    }

    /// Use an existing cancel signal instead of a fresh one.
    pub fn with_signal(mut self, signal: CancelSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn strategy(&self) -> &ExecutionStrategy {
        &self.strategy
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.signal
    }

    /// Cancel the request. Queued computations will not start; running ones
    /// only see the signal.
    pub fn cancel(&self) {
        self.signal.cancel();
    }

    /// Run `computation` for `stage`, offloading it if the strategy says so.
    ///
    /// An offloaded computation runs with the caller's context; whatever
    /// context it leaves behind becomes the caller's context afterwards.
    pub async fn run<F, Fut, T>(&self, stage: Stage, computation: F) -> Result<T, ClassifiedError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.strategy.should_offload(stage) {
            metrics::record_offload(stage, false);
            return Ok(computation().await);
        }

        if self.signal.is_cancelled() {
            return Err(cancelled());
        }

        let snapshot = scope::capture();
        let signal = self.signal.clone();
        let (tx, rx) = oneshot::channel();

        let task = async move {
            if signal.is_cancelled() {
                let _ = tx.send(Outcome::Cancelled);
                return;
            }
            let hop = scope::restore(snapshot, async move {
                let value = computation().await;
                (value, scope::capture())
            });
            let outcome = match AssertUnwindSafe(hop).catch_unwind().await {
                Ok((value, after)) => Outcome::Done(value, after),
                Err(panic) => Outcome::Panicked(panic_message(panic.as_ref())),
            };
            let _ = tx.send(outcome);
        }
        .boxed();

        if let Err(rejected) = self.executor.submit(task) {
            tracing::warn!(
                stage = %stage,
                executor = %self.executor.name(),
                error = %rejected,
                "Offload rejected"
            );
            return Err(classify(rejected));
        }
        metrics::record_offload(stage, true);
        tracing::trace!(stage = %stage, executor = %self.executor.name(), "Stage offloaded");

        // Dropping the caller mid-hop cancels the request.
        let guard = self.signal.drop_guard();
        let received = rx.await;
        guard.disarm();

        match received {
            Ok(Outcome::Done(value, after)) => {
                // Outside a scope there is nothing to carry back into.
                let _ = scope::replace(after);
                Ok(value)
            }
            Ok(Outcome::Cancelled) => Err(cancelled()),
            Ok(Outcome::Panicked(message)) => {
                tracing::error!(stage = %stage, panic = %message, "Offloaded computation panicked");
                Err(classify(RawFailure::Other {
                    source: Box::new(OffloadPanic { stage, message }),
                    retryable: false,
                }))
            }
            Err(_) => Err(classify(RejectedExecution::Shutdown {
                executor: self.executor.name().to_owned(),
            })),
        }
    }
}

fn cancelled() -> ClassifiedError {
    classify(RawFailure::Other {
        source: Box::new(Cancelled),
        retryable: false,
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
