//! Work that continues after a response has been returned.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;

/// Tracked background tasks: cache refreshes and write-throughs.
///
/// Nothing awaits these on the request path. [`BackgroundTasks::settle`] lets
/// the host wait for them, which is how a fetch event's lifetime is extended.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Tasks not yet reaped. Finished tasks count until the next spawn or settle.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Wait for every tracked task, including tasks spawned while waiting.
    ///
    /// Returns how many tasks were awaited.
    pub async fn settle(&self) -> usize {
        let mut settled = 0;
        loop {
            let mut batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return settled;
            }
            while let Some(result) = batch.join_next().await {
                settled += 1;
                if let Err(e) = result {
                    tracing::warn!("background task failed: {e}");
                }
            }
        }
    }
}
