//! Execution strategies, executors and the offloading bridge.
//!
//! # Responsibilities
//! - Decide per stage (read, handle, write) whether work leaves the I/O thread
//! - Own the I/O and worker thread pools
//! - Move computations between them with the request context intact
//!
//! # Design Decisions
//! - Executors are explicit values handed to servers and clients; there is
//!   no global pool
//! - The bridge is the only hand-off point between pools
//! - Admission is bounded; a full executor rejects instead of queueing

pub mod bridge;
pub mod cancel;
pub mod executor;
pub mod strategy;

pub use bridge::{OffloadBridge, OffloadPanic};
pub use cancel::{CancelOnDrop, CancelSignal, Cancelled};
pub use executor::{
    current_thread_name, on_io_thread, Executor, IoExecutor, IoSpawner, RejectedExecution,
    WorkerExecutor,
};
pub use strategy::{resolve, ExecutionStrategy, Stage};
