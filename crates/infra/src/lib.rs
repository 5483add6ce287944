//! Infrastructure layer: item storage, the worker pool, and batch reprocessing.

pub mod pool;
pub mod processing;
pub mod store;

pub use pool::{PoolConfig, PoolError, PoolStats, TaskFault, TaskHandle, WorkerContext, WorkerPool};
pub use processing::{
    BatchError, FailedItem, FaultPolicy, ItemProcessor, ProcessorConfig, ReprocessReport,
    TaskOutcome,
};
pub use store::{InMemoryItemStore, ItemStore, StoreError};
