//! Failure taxonomy.
//!
//! # Responsibilities
//! - Give every failure crossing a component boundary a stable [`ErrorKind`]
//! - Decide once, at the point of observation, whether it is retryable
//! - Keep the original error reachable through the cause chain
//!
//! # Design Decisions
//! - Kinds form a closed set; callers match on [`ClassifiedError::kind`]
//!   instead of downcasting
//! - Retry layers read [`ClassifiedError::is_retryable`] and never
//!   reclassify
//! - Only `REFUSED_STREAM` is retryable among peer resets unless a
//!   [`ResetPolicy`] says otherwise

pub mod classify;
pub mod kind;

pub use classify::{classify, FailureClassifier, RawFailure, RefusedStreamOnly, ResetPolicy};
pub use kind::{Cause, ClassifiedError, ErrorKind, Retryable};
