//! Injected task-submission seam for background sync runs.
//!
//! Batch and full syncs can run off the request path; the spawner is a
//! capability handed to the orchestrator so tests can substitute a
//! deterministic executor instead of reaching for a process-global pool.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::oneshot;

use crate::error::{CoreError, Result};
use crate::sync::types::SyncResult;

pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Something that can run a task to completion in the background.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, task: BoxedTask);
}

/// Production spawner backed by the ambient tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BoxedTask) {
        tokio::spawn(task);
    }
}

/// Deferred result of a background batch sync.
pub struct BatchHandle {
    rx: oneshot::Receiver<Result<SyncResult>>,
}

impl BatchHandle {
    pub(crate) fn channel() -> (oneshot::Sender<Result<SyncResult>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Wait for the background run to finish.
    pub async fn join(self) -> Result<SyncResult> {
        self.rx
            .await
            .map_err(|_| CoreError::Custom("batch sync task dropped before completing".into()))?
    }
}
