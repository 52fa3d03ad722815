//! Data structures for sync operations.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Default key prefix under which workspace files are stored.
pub const DEFAULT_KEY_PREFIX: &str = "workspace/backups";

/// Workspace subdirectories mirrored by default.
pub const DEFAULT_WORKSPACE_DIRS: [&str; 2] = [".codex", ".vscode-server"];

/// Default number of concurrent transfers.
pub const DEFAULT_WORKERS: usize = 4;

/// A status line is emitted every this many processed items.
pub const DEFAULT_LOG_EVERY: usize = 200;

/// Rolling-average windows used for the ETA estimate.
pub const DEFAULT_ETA_WINDOWS: [usize; 3] = [10, 50, 200];

/// Resolved, validated connection parameters for the object store.
///
/// Built once by [`crate::config::load_connection_params`]; the sync engine
/// never sees raw configuration keys.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Cloudflare account id, if known.
    pub account_id: Option<String>,
    /// Bucket holding the workspace objects.
    pub bucket: String,
    /// S3-compatible endpoint URL.
    pub endpoint: String,
    /// Access key id.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
    /// Optional session token.
    pub token: Option<String>,
    /// Key prefix under which workspace files live (no trailing slash needed).
    pub key_prefix: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("account_id", &self.account_id)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

/// Options controlling a single sync pass.
///
/// # Example
///
/// ```
/// use r2sync::SyncOptions;
///
/// let options = SyncOptions {
///     workspace_root: "/workspace".into(),
///     workers: 8,
///     ..SyncOptions::default()
/// };
/// assert_eq!(options.log_every, 200);
/// ```
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Root directory the workspace dirs are resolved against.
    pub workspace_root: PathBuf,
    /// Top-level workspace subdirectories to mirror.
    pub workspace_dirs: Vec<String>,
    /// Maximum number of in-flight transfers (default: 4, never below 1).
    pub workers: usize,
    /// Transfer even when the destination looks up to date (default: false).
    pub overwrite: bool,
    /// Emit a status line every this many processed items.
    pub log_every: usize,
    /// Rolling-average window sizes for the ETA estimate.
    pub eta_windows: Vec<usize>,
    /// Additional attempts for a transfer failing with a transient error.
    pub retries: usize,
    /// Delay between transfer attempts.
    pub retry_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            workspace_dirs: DEFAULT_WORKSPACE_DIRS.iter().map(|d| d.to_string()).collect(),
            workers: DEFAULT_WORKERS,
            overwrite: false,
            log_every: DEFAULT_LOG_EVERY,
            eta_windows: DEFAULT_ETA_WINDOWS.to_vec(),
            retries: 2,
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Coerces a requested worker count to the supported range (at least 1).
pub fn normalize_workers(requested: i64) -> usize {
    requested.max(1) as usize
}

/// Snapshot of one object as reported by the store listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Full object key, slash-delimited.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Store-assigned modification time; absent for synthetic listings.
    pub last_modified: Option<SystemTime>,
}

/// A local file with the metadata the diff engine looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Absolute or root-joined path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub mtime: SystemTime,
}

/// Which way bytes move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local → remote.
    Upload,
    /// Remote → local.
    Download,
}

impl Direction {
    /// Past-tense verb used in status lines.
    pub fn past_tense(self) -> &'static str {
        match self {
            Direction::Upload => "uploaded",
            Direction::Download => "downloaded",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Skip or transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Skip,
    Transfer,
}

/// Why the diff engine reached its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    /// Overwrite was forced by the caller.
    Forced,
    /// The destination side has no copy.
    Missing,
    /// The source side has nothing to send.
    NoSource,
    /// Sizes differ.
    SizeMismatch { local: u64, remote: u64 },
    /// The source side carries a strictly newer timestamp.
    SourceNewer,
    /// Sizes match and timestamps do not call for a transfer.
    UpToDate,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::Forced => write!(f, "overwrite forced"),
            DecisionReason::Missing => write!(f, "missing at destination"),
            DecisionReason::NoSource => write!(f, "nothing to transfer"),
            DecisionReason::SizeMismatch { local, remote } => {
                write!(f, "size mismatch (local={} bytes, remote={} bytes)", local, remote)
            }
            DecisionReason::SourceNewer => write!(f, "source is newer"),
            DecisionReason::UpToDate => write!(f, "up to date"),
        }
    }
}

/// Outcome of the diff engine for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncDecision {
    pub action: Action,
    pub direction: Direction,
    pub reason: DecisionReason,
}

impl SyncDecision {
    /// True when the item has to be moved.
    pub fn is_transfer(&self) -> bool {
        self.action == Action::Transfer
    }
}

/// A unit of work for the transfer scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    /// Remote key.
    pub key: String,
    /// Local path; the source for uploads, the destination for downloads.
    pub path: PathBuf,
    pub direction: Direction,
}

/// Final state of one attempted item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Transferred,
    Skipped,
    Failed,
}

/// Result of processing one item. Created once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub key: String,
    pub status: TransferStatus,
    /// Human-readable failure description, set only for `Failed`.
    pub error_message: Option<String>,
    /// Wall time spent on the item, retries included.
    pub duration: Duration,
}

impl TransferOutcome {
    pub(crate) fn transferred(key: String, duration: Duration) -> Self {
        Self {
            key,
            status: TransferStatus::Transferred,
            error_message: None,
            duration,
        }
    }

    pub(crate) fn failed(key: String, message: String, duration: Duration) -> Self {
        Self {
            key,
            status: TransferStatus::Failed,
            error_message: Some(message),
            duration,
        }
    }
}

/// Counts reported at the end of a sync pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSummary {
    pub direction: Direction,
    /// Items discovered (local files for push, considered objects for pull).
    pub total: usize,
    /// Items that went through the diff engine as `transfer`.
    pub pending: usize,
    pub transferred: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl SyncSummary {
    /// Items accounted for so far.
    pub fn processed(&self) -> usize {
        self.transferred + self.skipped + self.failed
    }

    /// True when at least one item ended in `Failed`.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_floored_at_one() {
        assert_eq!(normalize_workers(0), 1);
        assert_eq!(normalize_workers(-3), 1);
        assert_eq!(normalize_workers(1), 1);
        assert_eq!(normalize_workers(16), 16);
    }

    #[test]
    fn connection_params_debug_hides_secrets() {
        let params = ConnectionParams {
            account_id: None,
            bucket: "bucket".to_string(),
            endpoint: "https://example.com".to_string(),
            access_key: "AKIA".to_string(),
            secret_key: "super-secret".to_string(),
            token: Some("session-token".to_string()),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        };
        let rendered = format!("{:?}", params);
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("session-token"));
        assert!(rendered.contains("bucket"));
    }
}
