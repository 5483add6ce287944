//! Fixed-size worker pool for blocking units of work.
//!
//! ## Design
//!
//! - Workers are named OS threads spawned once and reused for the pool's lifetime
//! - Submission is non-blocking (unbounded queue); each submission yields a
//!   one-shot `TaskHandle` that is awaited asynchronously
//! - Panics are contained per task and reported through the handle
//! - Shutdown interrupts sleeping tasks, drains the queue, and joins the workers
//!
//! ## Components
//!
//! - `WorkerPool`: owns the queue and the worker threads
//! - `WorkerContext`: per-worker view handed to every task (interruptible sleep)
//! - `TaskHandle`: awaitable result of one submitted task
//! - `TaskFault`: why a task produced no value

pub mod types;
pub mod worker;

pub use types::{PoolConfig, PoolError, PoolStats, TaskFault};
pub use worker::{TaskHandle, WorkerContext, WorkerPool};
