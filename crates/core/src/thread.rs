//! Conversation state kept between runs, keyed by thread.
//!
//! A store holds exactly one [`ConversationState`] per thread id. Runs on
//! the same thread are serialized through [`ThreadStore::lock`]; a run
//! holds the guard from its first `get` until its final `put`, so two runs
//! never interleave messages on one thread.

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::error::ThreadStoreError;
use crate::message::{ConversationState, ThreadId};

/// Exclusive access to one thread. Released on drop.
///
/// A store may attach a release hook, run after the lock itself is
/// released, to forget bookkeeping for threads nobody is waiting on.
pub struct ThreadGuard {
    guard: Option<OwnedMutexGuard<()>>,
    on_release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ThreadGuard {
    pub fn new(guard: OwnedMutexGuard<()>) -> Self {
        Self {
            guard: Some(guard),
            on_release: None,
        }
    }

    pub fn on_release(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for ThreadGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadGuard").finish_non_exhaustive()
    }
}

/// The core ThreadStore trait.
///
/// Implementations: in-memory (process lifetime). An external backend can
/// implement the same `get`/`put` contract without touching the loop.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Wait for exclusive access to a thread.
    async fn lock(&self, thread_id: &ThreadId) -> ThreadGuard;

    /// Load a thread's state, or a fresh empty state if it is unknown.
    async fn get(&self, thread_id: &ThreadId) -> Result<ConversationState, ThreadStoreError>;

    /// Replace a thread's state with a complete, consistent snapshot.
    async fn put(
        &self,
        thread_id: &ThreadId,
        state: ConversationState,
    ) -> Result<(), ThreadStoreError>;

    /// Forget a thread. Returns whether it existed.
    async fn remove(&self, thread_id: &ThreadId) -> Result<bool, ThreadStoreError>;

    /// Number of threads with stored state.
    async fn thread_count(&self) -> Result<usize, ThreadStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn hook_runs_after_the_lock_is_released() {
        let mutex = Arc::new(Mutex::new(()));
        let released = Arc::new(AtomicBool::new(false));

        let guard = {
            let mutex = mutex.clone();
            let released = released.clone();
            ThreadGuard::new(mutex.clone().lock_owned().await).on_release(move || {
                released.store(mutex.try_lock().is_ok(), Ordering::SeqCst);
            })
        };
        assert!(mutex.try_lock().is_err());

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
    }
}
