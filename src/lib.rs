//! R2Sync - Incremental two-way sync of workspace directories against S3/R2
//!
//! This library keeps a set of workspace directories mirrored against an
//! S3-compatible object store, in both directions, deciding per file whether a
//! transfer is needed from size and modification time alone.
//!
//! # Features
//!
//! - **Incremental**: only files that are missing, resized or stale are moved
//! - **Bounded Parallelism**: a fixed pool of workers executes transfers
//! - **Failure Isolation**: one failed transfer never stops the others
//! - **Progress Tracking**: periodic status lines with a multi-window ETA
//! - **Automatic Retry**: transient store errors are retried per transfer
//!
//! # Example
//!
//! ```no_run
//! use r2sync::{load_connection_params, push_workspace, ProcessEnv, R2Store, SyncOptions, TracingSink};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = SyncOptions::default();
//! let params = load_connection_params(&ProcessEnv, &options.workspace_root)?;
//! let store = Arc::new(R2Store::connect(&params).await);
//!
//! let summary = push_workspace(store, &params.key_prefix, &options, &TracingSink).await?;
//! println!("{} uploaded, {} skipped", summary.transferred, summary.skipped);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod keys;
pub mod listing;
pub mod local;
pub mod orchestrator;
pub mod progress;
pub mod scheduler;
pub mod store;
pub mod types;

pub use config::{load_connection_params, workspace_root, EnvSource, ProcessEnv};
pub use error::{Result, SyncError};
pub use local::clean_workspace_dirs;
pub use orchestrator::{pull_workspace, push_workspace};
pub use progress::{ProgressBarSink, StatusSink, TracingSink};
pub use store::{ObjectStore, R2Store};
pub use types::{
    normalize_workers, ConnectionParams, Direction, RemoteObject, SyncOptions, SyncSummary,
    TransferOutcome, TransferStatus,
};
