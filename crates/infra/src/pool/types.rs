//! Worker pool configuration, statistics, and fault types.

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Thread name prefix; workers are named `{name}-{index}`
    pub name: String,
    /// Number of worker threads (concurrency ceiling)
    pub size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "item-worker".to_string(),
            size: 10,
        }
    }
}

impl PoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

/// Pool construction error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool size must be at least 1")]
    InvalidSize,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Why a submitted task produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskFault {
    /// The task's wait was cut short by pool shutdown.
    #[error("task interrupted")]
    Interrupted,
    /// The task panicked; the worker survived.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The pool was already shut down when the task was submitted.
    #[error("task rejected: worker pool is shut down")]
    Rejected,
    /// The task was dropped without reporting a result.
    #[error("task abandoned before reporting a result")]
    Abandoned,
    /// The task's own work failed.
    #[error("{0}")]
    Failed(String),
}

impl TaskFault {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub submitted: u64,
    pub succeeded: u64,
    pub faulted: u64,
    pub panicked: u64,
    pub rejected: u64,
}

impl PoolStats {
    /// Tasks accepted but not yet finished.
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.rejected)
            .saturating_sub(self.succeeded)
            .saturating_sub(self.faulted)
    }
}
