//! Concurrent reprocessing of every stored item.
//!
//! One run:
//! 1. Takes a single snapshot of the store's ids
//! 2. Submits one task per id to the shared worker pool
//! 3. Awaits every task handle (full barrier)
//! 4. Keeps only items that were actually reprocessed
//!
//! Items deleted between the snapshot and their task are skipped silently.
//! Task faults are contained: they are logged and, depending on
//! [`FaultPolicy`], either omitted or reported once every task has finished.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use itemkeep_core::ItemId;
use itemkeep_items::Item;

use crate::pool::{TaskFault, WorkerContext, WorkerPool};
use crate::store::{ItemStore, StoreError};

/// What to do with task faults once the batch has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Log the fault and leave the item out of the result.
    #[default]
    Skip,
    /// Fail the whole batch with the first fault (in submission order).
    FailBatch,
}

impl std::str::FromStr for FaultPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "fail_batch" | "fail-batch" => Ok(Self::FailBatch),
            other => Err(format!("unknown fault policy: {other}")),
        }
    }
}

/// Item processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Simulated work performed by every task before touching the store
    pub task_delay: Duration,
    pub fault_policy: FaultPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            task_delay: Duration::from_millis(100),
            fault_policy: FaultPolicy::Skip,
        }
    }
}

impl ProcessorConfig {
    pub fn with_task_delay(mut self, delay: Duration) -> Self {
        self.task_delay = delay;
        self
    }

    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }
}

/// Outcome of one processing task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The item was marked processed and written back.
    Processed(Item),
    /// The item was deleted after the snapshot was taken.
    Absent(ItemId),
    /// The task faulted.
    Failed { id: ItemId, cause: TaskFault },
}

/// Batch-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("failed to snapshot item ids: {0}")]
    Snapshot(#[from] StoreError),

    #[error("worker pool rejected all {0} tasks")]
    PoolUnavailable(usize),

    #[error("processing item {id} failed: {cause}")]
    TaskFailed { id: ItemId, cause: TaskFault },
}

/// A failed task, as reported in [`ReprocessReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub id: ItemId,
    pub cause: String,
}

/// Detailed result of one reprocessing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReprocessReport {
    pub processed: Vec<Item>,
    pub absent: Vec<ItemId>,
    pub failed: Vec<FailedItem>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReprocessReport {
    /// Number of ids in the snapshot this run worked from.
    pub fn snapshot_len(&self) -> usize {
        self.processed.len() + self.absent.len() + self.failed.len()
    }
}

impl From<StoreError> for TaskFault {
    fn from(err: StoreError) -> Self {
        TaskFault::Failed(err.to_string())
    }
}

/// Reprocesses every stored item on a shared worker pool.
pub struct ItemProcessor<S> {
    store: S,
    pool: Arc<WorkerPool>,
    config: ProcessorConfig,
}

impl<S> ItemProcessor<S>
where
    S: ItemStore + Clone + 'static,
{
    pub fn new(store: S, pool: Arc<WorkerPool>, config: ProcessorConfig) -> Self {
        Self { store, pool, config }
    }

    /// Reprocess every item and return the ones that were written back.
    ///
    /// Resolves only after every task has completed or failed.
    pub async fn reprocess_all(&self) -> Result<Vec<Item>, BatchError> {
        Ok(self.reprocess_all_detailed().await?.processed)
    }

    /// Like [`ItemProcessor::reprocess_all`] but also reports absent and failed ids.
    pub async fn reprocess_all_detailed(&self) -> Result<ReprocessReport, BatchError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let ids = self.store.list_ids()?;
        if ids.is_empty() {
            debug!("no items to reprocess");
            return Ok(ReprocessReport {
                processed: Vec::new(),
                absent: Vec::new(),
                failed: Vec::new(),
                started_at,
                finished_at: Utc::now(),
            });
        }

        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let store = self.store.clone();
                let delay = self.config.task_delay;
                (id, self.pool.submit(move |ctx| process_one(ctx, &store, id, delay)))
            })
            .collect();

        // Barrier: nothing is assembled until every handle has resolved.
        let mut outcomes = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let outcome = match handle.join().await {
                Ok(Some(item)) => TaskOutcome::Processed(item),
                Ok(None) => TaskOutcome::Absent(id),
                Err(cause) => TaskOutcome::Failed { id, cause },
            };
            outcomes.push(outcome);
        }

        let report = self.assemble(outcomes, started_at)?;

        info!(
            snapshot = ids.len(),
            processed = report.processed.len(),
            absent = report.absent.len(),
            failed = report.failed.len(),
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "reprocessing run finished"
        );

        Ok(report)
    }

    fn assemble(
        &self,
        outcomes: Vec<TaskOutcome>,
        started_at: DateTime<Utc>,
    ) -> Result<ReprocessReport, BatchError> {
        let total = outcomes.len();
        let rejected = outcomes
            .iter()
            .filter(|o| matches!(o, TaskOutcome::Failed { cause: TaskFault::Rejected, .. }))
            .count();
        if total > 0 && rejected == total {
            return Err(BatchError::PoolUnavailable(total));
        }

        let mut processed = Vec::new();
        let mut absent = Vec::new();
        let mut failed = Vec::new();
        let mut first_fault = None;

        for outcome in outcomes {
            match outcome {
                TaskOutcome::Processed(item) => processed.push(item),
                TaskOutcome::Absent(id) => {
                    debug!(item_id = %id, "item vanished before processing");
                    absent.push(id);
                }
                TaskOutcome::Failed { id, cause } => {
                    warn!(item_id = %id, error = %cause, "item processing failed");
                    failed.push(FailedItem {
                        id,
                        cause: cause.to_string(),
                    });
                    first_fault.get_or_insert((id, cause));
                }
            }
        }

        if self.config.fault_policy == FaultPolicy::FailBatch {
            if let Some((id, cause)) = first_fault {
                return Err(BatchError::TaskFailed { id, cause });
            }
        }

        Ok(ReprocessReport {
            processed,
            absent,
            failed,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Body of one processing task. `Ok(None)` means the item is gone.
fn process_one<S: ItemStore>(
    ctx: &WorkerContext,
    store: &S,
    id: ItemId,
    delay: Duration,
) -> Result<Option<Item>, TaskFault> {
    ctx.sleep(delay)?;

    // One store step: a concurrent delete leaves nothing to write back.
    let saved = store.update(id, Item::mark_processed)?;

    if saved.is_some() {
        debug!(worker = %ctx.name(), item_id = %id, "item processed");
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use itemkeep_items::{NewItem, PROCESSED_STATUS};

    use crate::pool::PoolConfig;
    use crate::store::InMemoryItemStore;

    const DELAY: Duration = Duration::from_millis(20);

    fn pool(size: usize) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(PoolConfig::default().with_size(size)).unwrap())
    }

    fn processor<S: ItemStore + Clone + 'static>(store: S, size: usize) -> ItemProcessor<S> {
        ItemProcessor::new(store, pool(size), ProcessorConfig::default().with_task_delay(DELAY))
    }

    fn seed(store: &InMemoryItemStore, name: &str) -> Item {
        store
            .insert(
                NewItem::new(name, format!("{}@example.com", name.to_lowercase()))
                    .with_description(format!("Desc {name}"))
                    .with_status("NEW"),
            )
            .unwrap()
    }

    /// Store wrapper that fails writes for chosen ids, and can delete an id
    /// right before its task writes it back.
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: Arc<InMemoryItemStore>,
        corrupt: Arc<Mutex<HashSet<ItemId>>>,
        vanish_before_write: Arc<Mutex<HashSet<ItemId>>>,
    }

    impl ItemStore for FlakyStore {
        fn list_ids(&self) -> Result<Vec<ItemId>, StoreError> {
            self.inner.list_ids()
        }

        fn get(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
            self.inner.get(id)
        }

        fn put(&self, item: Item) -> Result<Item, StoreError> {
            self.inner.put(item)
        }

        fn update<F>(&self, id: ItemId, change: F) -> Result<Option<Item>, StoreError>
        where
            F: FnOnce(&mut Item),
        {
            if self.corrupt.lock().unwrap().contains(&id) {
                return Err(StoreError::Storage(format!("corrupt record {id}")));
            }
            if self.vanish_before_write.lock().unwrap().remove(&id) {
                self.inner.delete(id)?;
            }
            self.inner.update(id, change)
        }

        fn insert(&self, item: NewItem) -> Result<Item, StoreError> {
            self.inner.insert(item)
        }

        fn list(&self) -> Result<Vec<Item>, StoreError> {
            self.inner.list()
        }

        fn delete(&self, id: ItemId) -> Result<bool, StoreError> {
            self.inner.delete(id)
        }
    }

    #[tokio::test]
    async fn processes_every_item() {
        let store = InMemoryItemStore::arc();
        seed(&store, "Item1");
        seed(&store, "Item2");

        let processed = processor(store.clone(), 10).reprocess_all().await.unwrap();

        assert_eq!(processed.len(), 2);
        assert!(processed.iter().all(|i| i.status.as_deref() == Some(PROCESSED_STATUS)));
        assert!(store.list().unwrap().iter().all(Item::is_processed));
    }

    #[tokio::test]
    async fn empty_store_submits_nothing() {
        let store = InMemoryItemStore::arc();
        let processor = processor(store, 2);

        let report = processor.reprocess_all_detailed().await.unwrap();

        assert!(report.processed.is_empty());
        assert_eq!(report.snapshot_len(), 0);
        assert_eq!(processor.pool.stats().submitted, 0);
    }

    #[tokio::test]
    async fn item_deleted_mid_task_is_absent_and_not_recreated() {
        let store = FlakyStore::default();
        let a = seed(&store.inner, "Item1");
        let b = seed(&store.inner, "Item2");
        store.vanish_before_write.lock().unwrap().insert(a.id);

        let report = processor(store.clone(), 4).reprocess_all_detailed().await.unwrap();

        assert_eq!(report.absent, vec![a.id]);
        assert!(report.failed.is_empty());
        assert_eq!(report.processed.len(), 1);
        assert_eq!(report.processed[0].id, b.id);
        assert_eq!(report.processed[0].name, "Item2");
        assert!(report.processed[0].is_processed());

        assert_eq!(store.inner.get(a.id).unwrap(), None);
        assert_eq!(store.inner.list_ids().unwrap(), vec![b.id]);
    }

    #[tokio::test]
    async fn concurrent_edit_is_kept_by_reprocessing() {
        let store = InMemoryItemStore::arc();
        let id = seed(&store, "Item1").id;
        let processor = ItemProcessor::new(
            store.clone(),
            pool(1),
            ProcessorConfig::default().with_task_delay(Duration::from_millis(100)),
        );

        let editor = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                store.update(id, |i| i.name = "Edited".to_string()).unwrap();
            })
        };

        let processed = processor.reprocess_all().await.unwrap();
        editor.await.unwrap();

        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].name, "Edited");
        assert!(processed[0].is_processed());
        assert_eq!(store.get(id).unwrap(), Some(processed[0].clone()));
    }

    #[tokio::test]
    async fn one_faulty_record_does_not_poison_the_batch() {
        let store = FlakyStore::default();
        let items: Vec<_> = (0..6).map(|i| seed(&store.inner, &format!("Item{i}"))).collect();
        let bad = items[2].id;
        store.corrupt.lock().unwrap().insert(bad);

        let report = processor(store.clone(), 3).reprocess_all_detailed().await.unwrap();

        assert_eq!(report.processed.len(), 5);
        assert!(report.processed.iter().all(|i| i.id != bad && i.is_processed()));
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, bad);
        assert!(report.failed[0].cause.contains("corrupt record"));
    }

    #[tokio::test]
    async fn fail_batch_policy_reports_fault_after_all_tasks_finish() {
        let store = FlakyStore::default();
        let items: Vec<_> = (0..4).map(|i| seed(&store.inner, &format!("Item{i}"))).collect();
        let bad = items[1].id;
        store.corrupt.lock().unwrap().insert(bad);

        let processor = ItemProcessor::new(
            store.clone(),
            pool(2),
            ProcessorConfig::default()
                .with_task_delay(DELAY)
                .with_fault_policy(FaultPolicy::FailBatch),
        );

        let err = processor.reprocess_all().await.unwrap_err();
        assert!(matches!(err, BatchError::TaskFailed { id, .. } if id == bad));

        // Siblings were not aborted.
        let stored = store.inner.list().unwrap();
        assert_eq!(stored.iter().filter(|i| i.is_processed()).count(), 3);
    }

    #[tokio::test]
    async fn fans_out_concurrently() {
        let store = InMemoryItemStore::arc();
        for i in 0..20 {
            seed(&store, &format!("Item{i}"));
        }
        let delay = Duration::from_millis(50);
        let processor = ItemProcessor::new(
            store,
            pool(5),
            ProcessorConfig::default().with_task_delay(delay),
        );

        let started = Instant::now();
        let processed = processor.reprocess_all().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(processed.len(), 20);
        // ceil(20 / 5) = 4 waves; sequential would be 20.
        assert!(elapsed >= delay * 4, "{elapsed:?}");
        assert!(elapsed < delay * 12, "{elapsed:?}");
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let store = InMemoryItemStore::arc();
        for i in 0..5 {
            seed(&store, &format!("Item{i}"));
        }
        let processor = processor(store.clone(), 3);

        let first = processor.reprocess_all().await.unwrap();
        let before: HashMap<_, _> = store.list().unwrap().into_iter().map(|i| (i.id, i)).collect();
        let second = processor.reprocess_all().await.unwrap();

        let ids = |items: &[Item]| items.iter().map(|i| i.id).collect::<HashSet<_>>();
        assert_eq!(ids(&first[..]), ids(&second[..]));
        assert!(second.iter().all(Item::is_processed));
        for item in second {
            assert_eq!(before[&item.id], item);
        }
    }

    #[tokio::test]
    async fn pool_is_reused_across_batches() {
        let store = InMemoryItemStore::arc();
        seed(&store, "Item1");
        let processor = processor(store, 2);

        processor.reprocess_all().await.unwrap();
        processor.reprocess_all().await.unwrap();

        let stats = processor.pool.stats();
        assert_eq!(stats.workers, 2);
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.succeeded, 2);
    }

    #[tokio::test]
    async fn shut_down_pool_fails_the_batch() {
        let store = InMemoryItemStore::arc();
        seed(&store, "Item1");
        seed(&store, "Item2");
        let processor = processor(store.clone(), 2);

        let pool = processor.pool.clone();
        tokio::task::spawn_blocking(move || pool.shutdown()).await.unwrap();

        let err = processor.reprocess_all().await.unwrap_err();
        assert_eq!(err, BatchError::PoolUnavailable(2));
        assert!(store.list().unwrap().iter().all(|i| !i.is_processed()));
    }

    #[tokio::test]
    async fn interrupted_tasks_are_failures_not_absences() {
        let store = InMemoryItemStore::arc();
        seed(&store, "Item1");
        let processor = ItemProcessor::new(
            store.clone(),
            pool(1),
            ProcessorConfig::default().with_task_delay(Duration::from_secs(30)),
        );

        let pool = processor.pool.clone();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::task::spawn_blocking(move || pool.shutdown()).await.unwrap();
        });

        let report = processor.reprocess_all_detailed().await.unwrap();
        stopper.await.unwrap();

        assert!(report.processed.is_empty());
        assert!(report.absent.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].cause, TaskFault::Interrupted.to_string());
    }

    #[test]
    fn fault_policy_parses() {
        assert_eq!("skip".parse::<FaultPolicy>(), Ok(FaultPolicy::Skip));
        assert_eq!("FAIL_BATCH".parse::<FaultPolicy>(), Ok(FaultPolicy::FailBatch));
        assert!("explode".parse::<FaultPolicy>().is_err());
    }
}
