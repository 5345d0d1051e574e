use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Batch, BatchKey, BatchState};
use crate::error::StoreError;

/// Result of an atomic state transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The batch was in one of the expected states and now holds the new one.
    Swapped(Batch),
    /// The batch exists but was in a different state; returned unchanged.
    Mismatch(Batch),
    Missing,
}

/// Key → batch mapping consumed by the accumulator. Implementations must make
/// `compare_and_swap_state` atomic with respect to every other operation on
/// the same key.
#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn get(&self, key: &BatchKey) -> Result<Option<Batch>, StoreError>;

    async fn put(&self, batch: Batch) -> Result<(), StoreError>;

    async fn delete(&self, key: &BatchKey)
    -> Result<Option<Batch>, StoreError>;

    async fn compare_and_swap_state(
        &self,
        key: &BatchKey,
        expected: &[BatchState],
        next: BatchState,
    ) -> Result<CasOutcome, StoreError>;
}

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    batches: RwLock<HashMap<BatchKey, Batch>>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.batches.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.batches.read().await.is_empty()
    }
}

#[async_trait]
impl BatchStore for InMemoryBatchStore {
    async fn get(&self, key: &BatchKey) -> Result<Option<Batch>, StoreError> {
        Ok(self.batches.read().await.get(key).cloned())
    }

    async fn put(&self, batch: Batch) -> Result<(), StoreError> {
        self.batches.write().await.insert(batch.key.clone(), batch);
        Ok(())
    }

    async fn delete(
        &self,
        key: &BatchKey,
    ) -> Result<Option<Batch>, StoreError> {
        Ok(self.batches.write().await.remove(key))
    }

    async fn compare_and_swap_state(
        &self,
        key: &BatchKey,
        expected: &[BatchState],
        next: BatchState,
    ) -> Result<CasOutcome, StoreError> {
        let mut batches = self.batches.write().await;
        let Some(batch) = batches.get_mut(key) else {
            return Ok(CasOutcome::Missing);
        };

        if !expected.contains(&batch.state) {
            return Ok(CasOutcome::Mismatch(batch.clone()));
        }

        batch.state = next;
        Ok(CasOutcome::Swapped(batch.clone()))
    }
}
