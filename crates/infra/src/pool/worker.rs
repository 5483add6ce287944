//! Worker threads, task submission, and task handles.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::types::{PoolConfig, PoolError, PoolStats, TaskFault};

type Job = Box<dyn FnOnce(&WorkerContext) + Send + 'static>;

/// Pool-wide interrupt flag. Once raised it stays raised.
#[derive(Debug, Default)]
struct Interrupt {
    raised: Mutex<bool>,
    cvar: Condvar,
}

impl Interrupt {
    fn raise(&self) {
        if let Ok(mut raised) = self.raised.lock() {
            *raised = true;
        }
        self.cvar.notify_all();
    }

    fn is_raised(&self) -> bool {
        self.raised.lock().map(|r| *r).unwrap_or(true)
    }

    /// Wait up to `timeout`. Returns `true` if the interrupt was raised.
    fn wait(&self, timeout: Duration) -> bool {
        let Ok(guard) = self.raised.lock() else {
            return true;
        };
        match self.cvar.wait_timeout_while(guard, timeout, |raised| !*raised) {
            Ok((raised, _)) => *raised,
            Err(_) => true,
        }
    }
}

/// Per-worker context handed to every task the worker runs.
#[derive(Debug)]
pub struct WorkerContext {
    name: String,
    interrupt: Arc<Interrupt>,
}

impl WorkerContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_raised()
    }

    /// Interruptible sleep.
    ///
    /// Returns `TaskFault::Interrupted` if the pool shuts down before `duration`
    /// elapses. The interrupt stays raised for the worker afterwards.
    pub fn sleep(&self, duration: Duration) -> Result<(), TaskFault> {
        if self.interrupt.wait(duration) {
            Err(TaskFault::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Awaitable result of one submitted task. Await it once with [`TaskHandle::join`].
#[derive(Debug)]
#[must_use = "a task handle does nothing unless joined"]
pub struct TaskHandle<T> {
    rx: Option<oneshot::Receiver<Result<T, TaskFault>>>,
}

impl<T> TaskHandle<T> {
    fn rejected() -> Self {
        Self { rx: None }
    }

    /// Wait for the task without blocking the calling thread.
    pub async fn join(self) -> Result<T, TaskFault> {
        match self.rx {
            Some(rx) => rx.await.unwrap_or(Err(TaskFault::Abandoned)),
            None => Err(TaskFault::Rejected),
        }
    }
}

/// Fixed-size pool of named worker threads.
///
/// Built once and shared (`Arc<WorkerPool>`); every batch reuses the same threads.
pub struct WorkerPool {
    name: String,
    size: usize,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    interrupt: Arc<Interrupt>,
    stats: Arc<Mutex<PoolStats>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("shut_down", &self.interrupt.is_raised())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `config.size` worker threads.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        if config.size == 0 {
            return Err(PoolError::InvalidSize);
        }

        let (tx, rx) = mpsc::channel::<Job>();
        let queue = Arc::new(Mutex::new(rx));
        let interrupt = Arc::new(Interrupt::default());

        let mut workers = Vec::with_capacity(config.size);
        for index in 0..config.size {
            let ctx = WorkerContext {
                name: format!("{}-{}", config.name, index),
                interrupt: interrupt.clone(),
            };
            let queue = queue.clone();
            let join = thread::Builder::new()
                .name(ctx.name.clone())
                .spawn(move || worker_loop(ctx, queue))
                .map_err(|e| PoolError::Spawn(e.to_string()))?;
            workers.push(join);
        }

        info!(pool = %config.name, workers = config.size, "worker pool started");

        Ok(Self {
            name: config.name,
            size: config.size,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            interrupt,
            stats: Arc::new(Mutex::new(PoolStats {
                workers: config.size,
                ..PoolStats::default()
            })),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Get current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Queue one unit of work. Never blocks.
    ///
    /// After [`WorkerPool::shutdown`] the returned handle resolves to
    /// `TaskFault::Rejected`.
    pub fn submit<T, F>(&self, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&WorkerContext) -> Result<T, TaskFault> + Send + 'static,
    {
        update(&self.stats, |s| s.submitted += 1);

        let (tx, rx) = oneshot::channel();
        let stats = self.stats.clone();
        let job: Job = Box::new(move |ctx: &WorkerContext| {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| work(ctx))) {
                Ok(result) => result,
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    warn!(worker = %ctx.name(), panic = %msg, "task panicked");
                    update(&stats, |s| s.panicked += 1);
                    Err(TaskFault::Panicked(msg))
                }
            };
            let ok = result.is_ok();
            update(&stats, |s| {
                if ok {
                    s.succeeded += 1;
                } else {
                    s.faulted += 1;
                }
            });
            // The caller may have dropped its handle.
            let _ = tx.send(result);
        });

        let sent = match self.sender.lock() {
            Ok(sender) => sender.as_ref().is_some_and(|s| s.send(job).is_ok()),
            Err(_) => false,
        };

        if sent {
            TaskHandle { rx: Some(rx) }
        } else {
            update(&self.stats, |s| s.rejected += 1);
            TaskHandle::rejected()
        }
    }

    /// Interrupt sleeping tasks, stop accepting work, drain the queue, and join
    /// every worker. Blocks until the workers exit; later calls are no-ops.
    pub fn shutdown(&self) {
        self.interrupt.raise();

        // Closing the channel lets workers exit once the queue is drained.
        let sender = self.sender.lock().ok().and_then(|mut s| s.take());
        drop(sender);

        let workers = self
            .workers
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default();
        if workers.is_empty() {
            return;
        }
        for worker in workers {
            let _ = worker.join();
        }

        info!(pool = %self.name, "worker pool stopped");
    }
}

fn worker_loop(ctx: WorkerContext, queue: Arc<Mutex<mpsc::Receiver<Job>>>) {
    debug!(worker = %ctx.name(), "worker started");

    loop {
        let job = match queue.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        match job {
            Ok(job) => job(&ctx),
            // Sender dropped and queue drained.
            Err(_) => break,
        }
    }

    debug!(worker = %ctx.name(), interrupted = ctx.is_interrupted(), "worker stopped");
}

fn update(stats: &Mutex<PoolStats>, f: impl FnOnce(&mut PoolStats)) {
    if let Ok(mut s) = stats.lock() {
        f(&mut s);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Instant;

    fn pool(size: usize) -> WorkerPool {
        WorkerPool::new(PoolConfig::default().with_name("test-worker").with_size(size)).unwrap()
    }

    #[test]
    fn rejects_zero_workers() {
        let err = WorkerPool::new(PoolConfig::default().with_size(0)).unwrap_err();
        assert_eq!(err, PoolError::InvalidSize);
    }

    #[tokio::test]
    async fn runs_work_and_returns_value() {
        let pool = pool(2);
        let handle = pool.submit(|_ctx| Ok::<_, TaskFault>(21 * 2));
        assert_eq!(handle.join().await, Ok(42));
    }

    #[tokio::test]
    async fn work_runs_on_named_pool_threads() {
        let pool = pool(3);
        let handles: Vec<_> = (0..12)
            .map(|_| {
                pool.submit(|ctx| {
                    let thread_name = thread::current().name().map(str::to_string);
                    assert_eq!(thread_name.as_deref(), Some(ctx.name()));
                    Ok(ctx.name().to_string())
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            seen.insert(h.join().await.unwrap());
        }
        let expected: HashSet<_> = (0..3).map(|i| format!("test-worker-{i}")).collect();
        assert!(!seen.is_empty());
        assert!(seen.is_subset(&expected), "{seen:?}");
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_pool_size() {
        let pool = pool(4);
        let delay = Duration::from_millis(50);

        let started = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| pool.submit(move |ctx| ctx.sleep(delay)))
            .collect();
        for h in handles {
            h.join().await.unwrap();
        }
        let elapsed = started.elapsed();

        // Two waves of four, never eight sequential sleeps.
        assert!(elapsed >= delay * 2, "{elapsed:?}");
        assert!(elapsed < delay * 6, "{elapsed:?}");
    }

    #[tokio::test]
    async fn panic_is_reported_and_worker_survives() {
        let pool = pool(1);

        let bad = pool.submit(|_ctx| -> Result<(), TaskFault> { panic!("boom") });
        let good = pool.submit(|_ctx| Ok::<_, TaskFault>("still here"));

        assert_eq!(bad.join().await, Err(TaskFault::Panicked("boom".to_string())));
        assert_eq!(good.join().await, Ok("still here"));

        let stats = pool.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.faulted, 1);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test]
    async fn task_failure_is_passed_through() {
        let pool = pool(1);
        let handle = pool.submit(|_ctx| Err::<(), _>(TaskFault::failed("nope")));
        assert_eq!(handle.join().await, Err(TaskFault::Failed("nope".to_string())));
    }

    #[tokio::test]
    async fn shutdown_interrupts_sleeping_tasks_and_rejects_new_work() {
        let pool = Arc::new(pool(2));

        let sleeper = pool.submit(|ctx| {
            let result = ctx.sleep(Duration::from_secs(30));
            // Interruption must still be visible after the sleep returns.
            assert!(ctx.is_interrupted());
            result
        });

        // Give the worker time to start sleeping.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        let p = pool.clone();
        tokio::task::spawn_blocking(move || p.shutdown()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        assert_eq!(sleeper.join().await, Err(TaskFault::Interrupted));

        let late = pool.submit(|_ctx| Ok::<_, TaskFault>(()));
        assert_eq!(late.join().await, Err(TaskFault::Rejected));
        assert_eq!(pool.stats().rejected, 1);

        // Idempotent.
        pool.shutdown();
    }

    #[tokio::test]
    async fn queued_work_still_resolves_on_shutdown() {
        let pool = Arc::new(pool(1));

        let handles: Vec<_> = (0..5)
            .map(|_| pool.submit(|ctx| ctx.sleep(Duration::from_secs(30))))
            .collect();

        let p = pool.clone();
        tokio::task::spawn_blocking(move || p.shutdown()).await.unwrap();

        for h in handles {
            assert_eq!(h.join().await, Err(TaskFault::Interrupted));
        }
        assert_eq!(pool.stats().in_flight(), 0);
    }
}
