//! Main orchestration logic for one push or pull pass.

use crate::diff::decide;
use crate::error::Result;
use crate::keys::KeyMapping;
use crate::listing::collect_workspace_objects;
use crate::local::{stat_local, workspace_files};
use crate::progress::{ProgressTracker, StatusSink};
use crate::scheduler::TransferScheduler;
use crate::store::ObjectStore;
use crate::types::{Direction, SyncOptions, SyncSummary, TransferOutcome, TransferTask};
use futures_util::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What the diff phase decided for a whole pass.
#[derive(Debug, Default)]
struct SyncPlan {
    pending: Vec<TransferTask>,
    skipped: usize,
    /// Items that failed before reaching the scheduler (local stat errors).
    failures: Vec<TransferOutcome>,
}

/// Per-item result of the push diff phase.
enum PlanItem {
    Pending(TransferTask),
    Skipped,
    Failed(TransferOutcome),
}

/// Restores the workspace from the store.
///
/// Lists every object under `key_prefix`, downloads those whose local copy
/// is missing, a different size or older than the remote, and reports
/// progress through `sink`. A listing failure aborts the pass before any
/// transfer; individual download failures are counted and logged.
///
/// # Example
///
/// ```no_run
/// use r2sync::{pull_workspace, R2Store, SyncOptions, TracingSink};
/// use std::sync::Arc;
///
/// # async fn example(params: r2sync::ConnectionParams) -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(R2Store::connect(&params).await);
/// let options = SyncOptions::default();
/// let summary = pull_workspace(store, &params.key_prefix, &options, &TracingSink).await?;
/// println!("{} downloaded, {} failed", summary.transferred, summary.failed);
/// # Ok(())
/// # }
/// ```
pub async fn pull_workspace(
    store: Arc<dyn ObjectStore>,
    key_prefix: &str,
    options: &SyncOptions,
    sink: &dyn StatusSink,
) -> Result<SyncSummary> {
    let mapping = KeyMapping::new(&options.workspace_root, key_prefix);
    let objects = collect_workspace_objects(store.as_ref(), &mapping).await?;

    let total = objects.len();
    if total == 0 {
        info!(
            "No workspace objects found under prefix {}.",
            mapping.listing_prefix()
        );
        return Ok(empty_summary(Direction::Download));
    }
    info!("Workspace restore: {} objects to consider.", total);

    let mut plan = SyncPlan::default();
    for (remote, path) in objects {
        let started = Instant::now();
        match stat_local(&path).await {
            Ok(local) => {
                let decision =
                    decide(Direction::Download, local.as_ref(), Some(&remote), options.overwrite);
                debug!("{}: {:?} ({})", remote.key, decision.action, decision.reason);
                if decision.is_transfer() {
                    plan.pending.push(TransferTask {
                        key: remote.key,
                        path,
                        direction: Direction::Download,
                    });
                } else {
                    plan.skipped += 1;
                }
            }
            Err(e) => plan.failures.push(TransferOutcome::failed(
                remote.key,
                format!("cannot stat {}: {}", path.display(), e),
                started.elapsed(),
            )),
        }
    }

    if plan.pending.is_empty() && plan.failures.is_empty() {
        info!("Workspace restore: all files already up to date.");
    } else {
        info!(
            "Workspace restore: {} downloads pending ({} skipped).",
            plan.pending.len(),
            plan.skipped
        );
    }

    execute_plan(store, Direction::Download, total, plan, options, sink).await
}

/// Mirrors the local workspace directories into the store.
///
/// Walks the configured directories, looks up each file's remote metadata
/// (concurrently, bounded by the worker count), uploads files that are
/// missing remotely, a different size or newer than the remote copy, and
/// reports progress through `sink`.
pub async fn push_workspace(
    store: Arc<dyn ObjectStore>,
    key_prefix: &str,
    options: &SyncOptions,
    sink: &dyn StatusSink,
) -> Result<SyncSummary> {
    let mapping = KeyMapping::new(&options.workspace_root, key_prefix);
    let files: Vec<PathBuf> =
        workspace_files(&options.workspace_root, &options.workspace_dirs).collect();

    let total = files.len();
    if total == 0 {
        info!("No workspace files found to sync.");
        return Ok(empty_summary(Direction::Upload));
    }
    info!("Workspace sync: {} files to scan.", total);

    let items: Vec<PlanItem> = stream::iter(files)
        .map(|path| plan_upload(store.as_ref(), &mapping, path, options.overwrite))
        .buffer_unordered(options.workers.max(1))
        .collect()
        .await;

    let mut plan = SyncPlan::default();
    for item in items {
        match item {
            PlanItem::Pending(task) => plan.pending.push(task),
            PlanItem::Skipped => plan.skipped += 1,
            PlanItem::Failed(outcome) => plan.failures.push(outcome),
        }
    }

    if plan.pending.is_empty() && plan.failures.is_empty() {
        info!("Workspace sync: all files already up to date.");
    } else {
        info!(
            "Workspace sync: {} uploads pending ({} skipped).",
            plan.pending.len(),
            plan.skipped
        );
    }

    execute_plan(store, Direction::Upload, total, plan, options, sink).await
}

/// Diffs one local file against its remote counterpart.
async fn plan_upload(
    store: &dyn ObjectStore,
    mapping: &KeyMapping,
    path: PathBuf,
    overwrite: bool,
) -> PlanItem {
    let started = Instant::now();
    let Some(key) = mapping.key_for(&path) else {
        return PlanItem::Failed(TransferOutcome::failed(
            path.display().to_string(),
            "path cannot be mapped to a remote key".to_string(),
            started.elapsed(),
        ));
    };

    let local = match stat_local(&path).await {
        Ok(local) => local,
        Err(e) => {
            return PlanItem::Failed(TransferOutcome::failed(
                key,
                format!("cannot stat {}: {}", path.display(), e),
                started.elapsed(),
            ))
        }
    };

    // Lookup failures other than "not found" are treated as a missing
    // remote copy; the upload itself reports real connectivity problems.
    let remote = match store.head_object(&key).await {
        Ok(remote) => remote,
        Err(e) => {
            debug!("HEAD failed for {}: {}", key, e);
            None
        }
    };

    let decision = decide(Direction::Upload, local.as_ref(), remote.as_ref(), overwrite);
    debug!("{}: {:?} ({})", key, decision.action, decision.reason);
    if decision.is_transfer() {
        PlanItem::Pending(TransferTask {
            key,
            path,
            direction: Direction::Upload,
        })
    } else {
        PlanItem::Skipped
    }
}

/// Runs the pending transfers and folds every outcome into the tracker.
async fn execute_plan(
    store: Arc<dyn ObjectStore>,
    direction: Direction,
    total: usize,
    plan: SyncPlan,
    options: &SyncOptions,
    sink: &dyn StatusSink,
) -> Result<SyncSummary> {
    let mut tracker = ProgressTracker::new(
        direction,
        total,
        &options.eta_windows,
        options.log_every,
        sink,
    );
    tracker.set_pending(plan.pending.len());
    tracker.record_skipped(plan.skipped);
    for failure in &plan.failures {
        tracker.record(failure);
    }

    if !plan.pending.is_empty() {
        let scheduler = TransferScheduler::new(store, options.workers)
            .with_retries(options.retries, options.retry_interval);
        let mut outcomes = scheduler.spawn(plan.pending);
        while let Some(outcome) = outcomes.recv().await {
            tracker.record(&outcome);
        }
    }

    Ok(tracker.finish())
}

fn empty_summary(direction: Direction) -> SyncSummary {
    SyncSummary {
        direction,
        total: 0,
        pending: 0,
        transferred: 0,
        skipped: 0,
        failed: 0,
        elapsed: Duration::ZERO,
    }
}
