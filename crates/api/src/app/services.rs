use std::sync::Arc;

use itemkeep_core::{DomainError, ItemId};
use itemkeep_infra::{
    BatchError, InMemoryItemStore, ItemProcessor, ItemStore, PoolError, PoolStats, ReprocessReport,
    StoreError, WorkerPool,
};
use itemkeep_items::{Item, NewItem};

use crate::config::AppConfig;

/// Error returned by the CRUD facade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Service facade: CRUD pass-through plus the reprocessing entry point.
///
/// Built once per process; the worker pool inside is shared by every batch.
pub struct AppServices {
    store: Arc<InMemoryItemStore>,
    pool: Arc<WorkerPool>,
    processor: ItemProcessor<Arc<InMemoryItemStore>>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("items", &self.store.len())
            .field("pool", &self.pool)
            .finish()
    }
}

/// In-memory wiring: store + worker pool + processor.
pub fn build_services(config: &AppConfig) -> Result<AppServices, PoolError> {
    let store = InMemoryItemStore::arc();
    let pool = Arc::new(WorkerPool::new(config.pool.clone())?);
    let processor = ItemProcessor::new(store.clone(), pool.clone(), config.processor.clone());

    tracing::info!(
        workers = pool.size(),
        task_delay_ms = config.processor.task_delay.as_millis() as u64,
        fault_policy = ?config.processor.fault_policy,
        "services built"
    );

    Ok(AppServices {
        store,
        pool,
        processor,
    })
}

impl AppServices {
    pub fn find_all(&self) -> Result<Vec<Item>, ServiceError> {
        Ok(self.store.list()?)
    }

    pub fn find_by_id(&self, id: ItemId) -> Result<Option<Item>, ServiceError> {
        Ok(self.store.get(id)?)
    }

    pub fn create(&self, item: NewItem) -> Result<Item, ServiceError> {
        item.validate()?;
        Ok(self.store.insert(item)?)
    }

    /// Replace an existing item's fields. `Ok(None)` if no such item.
    pub fn update(&self, id: ItemId, fields: NewItem) -> Result<Option<Item>, ServiceError> {
        fields.validate()?;
        Ok(self.store.update(id, move |item| item.replace_fields(fields))?)
    }

    /// Delete an item. Returns whether it existed.
    pub fn delete(&self, id: ItemId) -> Result<bool, ServiceError> {
        Ok(self.store.delete(id)?)
    }

    pub async fn reprocess_all(&self) -> Result<Vec<Item>, BatchError> {
        self.processor.reprocess_all().await
    }

    pub async fn reprocess_all_detailed(&self) -> Result<ReprocessReport, BatchError> {
        self.processor.reprocess_all_detailed().await
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop the worker pool. Blocks until the workers have exited.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
