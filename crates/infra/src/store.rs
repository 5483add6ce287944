//! Item storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use itemkeep_core::{Entity, ItemId};
use itemkeep_items::{Item, NewItem};

/// Keyed item store abstraction.
///
/// Each operation is atomic on its own; nothing here spans operations.
pub trait ItemStore: Send + Sync {
    /// Point-in-time snapshot of every stored id.
    fn list_ids(&self) -> Result<Vec<ItemId>, StoreError>;

    /// Load one item; `None` if it is not (or no longer) stored.
    fn get(&self, id: ItemId) -> Result<Option<Item>, StoreError>;

    /// Upsert an item and return the persisted value.
    fn put(&self, item: Item) -> Result<Item, StoreError>;

    /// Apply `change` to a stored item in place and return the result.
    ///
    /// Load, change and write happen as one step; `None` if the item is not
    /// stored, in which case nothing is written.
    fn update<F>(&self, id: ItemId, change: F) -> Result<Option<Item>, StoreError>
    where
        F: FnOnce(&mut Item);

    /// Store a new item under a freshly assigned id.
    fn insert(&self, item: NewItem) -> Result<Item, StoreError>;

    /// List all items.
    fn list(&self) -> Result<Vec<Item>, StoreError>;

    /// Delete an item. Returns whether anything was removed.
    fn delete(&self, id: ItemId) -> Result<bool, StoreError>;
}

impl<S> ItemStore for Arc<S>
where
    S: ItemStore + ?Sized,
{
    fn list_ids(&self) -> Result<Vec<ItemId>, StoreError> {
        (**self).list_ids()
    }

    fn get(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        (**self).get(id)
    }

    fn put(&self, item: Item) -> Result<Item, StoreError> {
        (**self).put(item)
    }

    fn update<F>(&self, id: ItemId, change: F) -> Result<Option<Item>, StoreError>
    where
        F: FnOnce(&mut Item),
    {
        (**self).update(id, change)
    }

    fn insert(&self, item: NewItem) -> Result<Item, StoreError> {
        (**self).insert(item)
    }

    fn list(&self) -> Result<Vec<Item>, StoreError> {
        (**self).list()
    }

    fn delete(&self, id: ItemId) -> Result<bool, StoreError> {
        (**self).delete(id)
    }
}

/// Item store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("item already exists: {0}")]
    AlreadyExists(ItemId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    fn poisoned() -> Self {
        Self::Storage("item store lock poisoned".to_string())
    }
}

/// In-memory item store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    items: RwLock<HashMap<ItemId, Item>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ItemStore for InMemoryItemStore {
    fn list_ids(&self) -> Result<Vec<ItemId>, StoreError> {
        let items = self.items.read().map_err(|_| StoreError::poisoned())?;
        let mut ids: Vec<_> = items.keys().copied().collect();
        // UUIDv7 ids sort by creation time.
        ids.sort();
        Ok(ids)
    }

    fn get(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        let items = self.items.read().map_err(|_| StoreError::poisoned())?;
        Ok(items.get(&id).cloned())
    }

    fn put(&self, item: Item) -> Result<Item, StoreError> {
        let mut items = self.items.write().map_err(|_| StoreError::poisoned())?;
        items.insert(*item.id(), item.clone());
        Ok(item)
    }

    fn update<F>(&self, id: ItemId, change: F) -> Result<Option<Item>, StoreError>
    where
        F: FnOnce(&mut Item),
    {
        let mut items = self.items.write().map_err(|_| StoreError::poisoned())?;
        Ok(items.get_mut(&id).map(|item| {
            change(item);
            item.clone()
        }))
    }

    fn insert(&self, item: NewItem) -> Result<Item, StoreError> {
        let mut items = self.items.write().map_err(|_| StoreError::poisoned())?;
        let id = ItemId::new();
        if items.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        let item = item.into_item(id);
        items.insert(id, item.clone());
        Ok(item)
    }

    fn list(&self) -> Result<Vec<Item>, StoreError> {
        let items = self.items.read().map_err(|_| StoreError::poisoned())?;
        let mut all: Vec<_> = items.values().cloned().collect();
        all.sort_by_key(|i| i.id);
        Ok(all)
    }

    fn delete(&self, id: ItemId) -> Result<bool, StoreError> {
        let mut items = self.items.write().map_err(|_| StoreError::poisoned())?;
        Ok(items.remove(&id).is_some())
    }
}
