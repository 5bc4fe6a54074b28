//! In-memory media store for tests and lightweight embedding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ContentId, Item, ItemId, ItemStatus, MediaStore, StoreError};

/// Hash-map backed [`MediaStore`].
///
/// Keeps an audit trail of status transitions and file deletions so tests
/// can assert on the exact sequence of store operations a coordinator
/// performed.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMediaStore {
    inner: Arc<RwLock<StoreState>>,
}

#[derive(Debug, Default)]
struct StoreState {
    items: HashMap<ItemId, Item>,
    next_file_id: i64,
    status_log: Vec<(ItemId, ItemStatus)>,
    deleted_files: Vec<i64>,
}

impl InMemoryMediaStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status transition written so far, in write order.
    pub async fn status_log(&self) -> Vec<(ItemId, ItemStatus)> {
        self.inner.read().await.status_log.clone()
    }

    /// Identifiers of files removed via `delete_file`, in call order.
    pub async fn deleted_files(&self) -> Vec<i64> {
        self.inner.read().await.deleted_files.clone()
    }

    /// Total number of items currently stored.
    pub async fn item_count(&self) -> usize {
        self.inner.read().await.items.len()
    }
}

#[async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn save_item(&self, item: &Item) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;

        let mut stored = item.clone();
        for file in &mut stored.files {
            if file.id == 0 {
                state.next_file_id += 1;
                file.id = state.next_file_id;
            }
        }

        state.items.insert(stored.id, stored);
        Ok(())
    }

    async fn item(&self, id: ItemId) -> Result<Item, StoreError> {
        self.inner
            .read()
            .await
            .items
            .get(&id)
            .cloned()
            .ok_or(StoreError::ItemNotFound { id })
    }

    async fn item_by_content(
        &self,
        content_id: ContentId,
    ) -> Result<Option<Item>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .items
            .values()
            .find(|item| item.content_id == content_id)
            .cloned())
    }

    async fn items_with_status(&self, status: ItemStatus) -> Result<Vec<Item>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .items
            .values()
            .filter(|item| item.status == status)
            .cloned()
            .collect())
    }

    async fn set_status(&self, id: ItemId, status: ItemStatus) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;
        let item = state
            .items
            .get_mut(&id)
            .ok_or(StoreError::ItemNotFound { id })?;

        item.status = status;
        state.status_log.push((id, status));
        Ok(())
    }

    async fn set_poster(&self, id: ItemId, url: &str) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;
        let item = state
            .items
            .get_mut(&id)
            .ok_or(StoreError::ItemNotFound { id })?;

        item.poster = Some(url.to_string());
        Ok(())
    }

    async fn delete_file(&self, file_id: i64) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;
        let owner = state
            .items
            .values_mut()
            .find(|item| item.files.iter().any(|file| file.id == file_id))
            .ok_or(StoreError::FileNotFound { id: file_id })?;

        owner.files.retain(|file| file.id != file_id);
        state.deleted_files.push(file_id);
        Ok(())
    }

    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;
        state
            .items
            .remove(&id)
            .ok_or(StoreError::ItemNotFound { id })?;
        Ok(())
    }
}
