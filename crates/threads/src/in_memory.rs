//! In-memory thread store. State lives as long as the process.

use async_trait::async_trait;
use quarry_core::error::ThreadStoreError;
use quarry_core::message::{ConversationState, ThreadId};
use quarry_core::thread::{ThreadGuard, ThreadStore};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

type LockMap = Arc<std::sync::Mutex<HashMap<ThreadId, Arc<Mutex<()>>>>>;

/// Stores one `ConversationState` per thread id in a map, with a
/// per-thread async mutex serializing runs on the same thread.
///
/// A thread's mutex only lives while some run holds or waits for it.
pub struct InMemoryThreadStore {
    states: Arc<RwLock<HashMap<ThreadId, ConversationState>>>,
    locks: LockMap,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Number of threads currently locked or waited on.
    pub fn lock_count(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for InMemoryThreadStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Forget `thread_id`'s mutex if the map holds the only reference.
fn release_slot(locks: &LockMap, thread_id: &ThreadId) {
    let mut locks = locks.lock().unwrap_or_else(PoisonError::into_inner);
    if locks
        .get(thread_id)
        .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
        locks.remove(thread_id);
    }
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn lock(&self, thread_id: &ThreadId) -> ThreadGuard {
        let slot = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Slots left behind by waits that were abandoned
            locks.retain(|id, slot| id == thread_id || Arc::strong_count(slot) > 1);
            locks
                .entry(thread_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        debug!(thread_id = %thread_id, "Waiting for thread lock");
        let guard = slot.lock_owned().await;

        let locks = self.locks.clone();
        let thread_id = thread_id.clone();
        ThreadGuard::new(guard).on_release(move || release_slot(&locks, &thread_id))
    }

    async fn get(&self, thread_id: &ThreadId) -> Result<ConversationState, ThreadStoreError> {
        let states = self.states.read().await;
        Ok(states
            .get(thread_id)
            .cloned()
            .unwrap_or_else(|| ConversationState::new(thread_id.clone())))
    }

    async fn put(
        &self,
        thread_id: &ThreadId,
        state: ConversationState,
    ) -> Result<(), ThreadStoreError> {
        if &state.thread_id != thread_id {
            return Err(ThreadStoreError::Storage(format!(
                "state for thread '{}' cannot be stored under '{}'",
                state.thread_id, thread_id
            )));
        }
        self.states.write().await.insert(thread_id.clone(), state);
        Ok(())
    }

    async fn remove(&self, thread_id: &ThreadId) -> Result<bool, ThreadStoreError> {
        let existed = self.states.write().await.remove(thread_id).is_some();

        // A held lock must stay in the map, or a later caller would get a
        // fresh mutex and run concurrently with the holder.
        release_slot(&self.locks, thread_id);
        Ok(existed)
    }

    async fn thread_count(&self) -> Result<usize, ThreadStoreError> {
        Ok(self.states.read().await.len())
    }
}
