//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call through a client:
//!     → failure classified once at the transport boundary
//!     → retries.rs (check is_retryable, retry with backoff.rs delays)
//!     → budget check before every retry
//! ```
//!
//! # Design Decisions
//! - The runtime itself never retries; only callers opt in
//! - Retries only for errors the failure taxonomy marks retryable

pub mod backoff;
pub mod retries;

pub use backoff::Backoff;
pub use retries::{RetryBudget, RetryPolicy, RetryableError};
