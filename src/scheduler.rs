//! Bounded-concurrency transfer execution.

use crate::error::{Result, SyncError};
use crate::store::ObjectStore;
use crate::types::{Direction, TransferOutcome, TransferTask};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, warn};

/// Runs transfer tasks on a fixed pool of workers.
///
/// Workers pull tasks from a shared FIFO queue and publish one
/// [`TransferOutcome`] per task on a results channel, in completion order.
/// A failing task becomes a `Failed` outcome and never affects the others.
#[derive(Clone)]
pub struct TransferScheduler {
    store: Arc<dyn ObjectStore>,
    workers: usize,
    retries: usize,
    retry_interval: Duration,
}

impl TransferScheduler {
    /// `workers` below 1 is treated as 1.
    pub fn new(store: Arc<dyn ObjectStore>, workers: usize) -> Self {
        Self {
            store,
            workers: workers.max(1),
            retries: 0,
            retry_interval: Duration::from_secs(1),
        }
    }

    /// Retries transient failures `retries` more times, `interval` apart.
    pub fn with_retries(mut self, retries: usize, interval: Duration) -> Self {
        self.retries = retries;
        self.retry_interval = interval;
        self
    }

    /// Starts executing `tasks` and returns the stream of outcomes.
    ///
    /// The receiver yields exactly one outcome per task and closes once
    /// every task has finished. With one worker, tasks run strictly in
    /// submission order.
    pub fn spawn(&self, tasks: Vec<TransferTask>) -> mpsc::Receiver<TransferOutcome> {
        let pool_size = self.workers.min(tasks.len());
        let (results_tx, results_rx) = mpsc::channel(pool_size.max(1) * 2);
        let (queue_tx, queue_rx) = async_channel::unbounded();

        for task in tasks {
            // Unbounded and still open: cannot fail.
            let _ = queue_tx.try_send(task);
        }
        queue_tx.close();

        for worker_id in 0..pool_size {
            let queue = queue_rx.clone();
            let results = results_tx.clone();
            let scheduler = self.clone();
            tokio::spawn(async move {
                while let Ok(task) = queue.recv().await {
                    let outcome = scheduler.run_isolated(task).await;
                    if results.send(outcome).await.is_err() {
                        debug!("Worker {} stopping: results receiver dropped", worker_id);
                        break;
                    }
                }
            });
        }

        results_rx
    }

    /// Runs one task on its own tokio task so that even a panic is turned
    /// into a `Failed` outcome.
    async fn run_isolated(&self, task: TransferTask) -> TransferOutcome {
        let key = task.key.clone();
        let started = Instant::now();
        let scheduler = self.clone();
        match tokio::spawn(async move { scheduler.run_task(task).await }).await {
            Ok(outcome) => outcome,
            Err(e) => TransferOutcome::failed(
                key,
                SyncError::TransferFailed(e.to_string()).to_string(),
                started.elapsed(),
            ),
        }
    }

    async fn run_task(&self, task: TransferTask) -> TransferOutcome {
        let started = Instant::now();
        let strategy = tokio_retry2::strategy::FixedInterval::from_millis(
            self.retry_interval.as_millis() as u64,
        )
        .take(self.retries);

        let result = Retry::spawn(strategy, || {
            let store = Arc::clone(&self.store);
            let task = task.clone();
            async move {
                match execute(store.as_ref(), &task).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_permanent() => RetryError::to_permanent(e),
                    Err(e) => {
                        warn!("Failed to {} {} due to error: {}", task.direction, task.key, e);
                        RetryError::to_transient(e)
                    }
                }
            }
        })
        .await;

        let elapsed = started.elapsed();
        match result {
            Ok(()) => {
                debug!(
                    "{} {} in {}",
                    task.direction.past_tense(),
                    task.key,
                    humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64))
                );
                TransferOutcome::transferred(task.key, elapsed)
            }
            Err(e) => TransferOutcome::failed(task.key, e.to_string(), elapsed),
        }
    }
}

/// Creates `dir` and its parents; a concurrent creator winning the race is
/// not an error.
async fn ensure_dir(dir: &Path) -> Result<()> {
    match tokio::fs::create_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn execute(store: &dyn ObjectStore, task: &TransferTask) -> Result<()> {
    match task.direction {
        Direction::Upload => store.upload_file(&task.path, &task.key).await,
        Direction::Download => {
            if let Some(parent) = task.path.parent() {
                ensure_dir(parent).await?;
            }
            store.download_file(&task.key, &task.path).await
        }
    }
}
