//! Conversation state store
//!
//! Whole-snapshot replace-on-write, keyed by thread id.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::state_machine::Snapshot;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Latest snapshot for a thread, `None` for a new thread
    async fn get(&self, thread_id: &str) -> Result<Option<Snapshot>, StoreError>;

    async fn put(&self, thread_id: &str, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Whether the thread is waiting on an approval decision
    async fn is_suspended(&self, thread_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .get(thread_id)
            .await?
            .is_some_and(|s| s.is_suspended()))
    }
}

#[async_trait]
impl<T: SnapshotStore + ?Sized> SnapshotStore for Arc<T> {
    async fn get(&self, thread_id: &str) -> Result<Option<Snapshot>, StoreError> {
        (**self).get(thread_id).await
    }

    async fn put(&self, thread_id: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
        (**self).put(thread_id, snapshot).await
    }

    async fn is_suspended(&self, thread_id: &str) -> Result<bool, StoreError> {
        (**self).is_suspended(thread_id).await
    }
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryStore {
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.snapshots.read().await.get(thread_id).cloned())
    }

    async fn put(&self, thread_id: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.snapshots
            .write()
            .await
            .insert(thread_id.to_string(), snapshot.clone());
        Ok(())
    }
}
