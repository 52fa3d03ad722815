//! Staleness rules deciding whether an item needs to be transferred.
//!
//! Without a content hash, size and modification time are the only signals:
//!
//! - a size mismatch always means transfer, in either direction;
//! - downloads happen when the local copy is strictly older than the remote;
//! - uploads happen when the local copy is strictly newer than the remote.
//!
//! Equal timestamps never trigger a transfer in either direction, and a
//! remote object without a timestamp is trusted when sizes match.

use crate::types::{Action, DecisionReason, Direction, LocalFile, RemoteObject, SyncDecision};

fn transfer(direction: Direction, reason: DecisionReason) -> SyncDecision {
    SyncDecision {
        action: Action::Transfer,
        direction,
        reason,
    }
}

fn skip(direction: Direction, reason: DecisionReason) -> SyncDecision {
    SyncDecision {
        action: Action::Skip,
        direction,
        reason,
    }
}

/// Decides what to do with one item.
///
/// `local` and `remote` are the two sides as currently observed; either may
/// be absent. `overwrite` forces a transfer regardless of metadata.
pub fn decide(
    direction: Direction,
    local: Option<&LocalFile>,
    remote: Option<&RemoteObject>,
    overwrite: bool,
) -> SyncDecision {
    if overwrite {
        return transfer(direction, DecisionReason::Forced);
    }

    match direction {
        Direction::Download => {
            let Some(remote) = remote else {
                return skip(direction, DecisionReason::NoSource);
            };
            let Some(local) = local else {
                return transfer(direction, DecisionReason::Missing);
            };
            if local.size != remote.size {
                return transfer(direction, size_mismatch(local, remote));
            }
            match remote.last_modified {
                Some(remote_time) if local.mtime < remote_time => {
                    transfer(direction, DecisionReason::SourceNewer)
                }
                _ => skip(direction, DecisionReason::UpToDate),
            }
        }
        Direction::Upload => {
            let Some(local) = local else {
                return skip(direction, DecisionReason::NoSource);
            };
            let Some(remote) = remote else {
                return transfer(direction, DecisionReason::Missing);
            };
            if local.size != remote.size {
                return transfer(direction, size_mismatch(local, remote));
            }
            match remote.last_modified {
                Some(remote_time) if local.mtime > remote_time => {
                    transfer(direction, DecisionReason::SourceNewer)
                }
                _ => skip(direction, DecisionReason::UpToDate),
            }
        }
    }
}

fn size_mismatch(local: &LocalFile, remote: &RemoteObject) -> DecisionReason {
    DecisionReason::SizeMismatch {
        local: local.size,
        remote: remote.size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn local(size: u64, mtime: u64) -> LocalFile {
        LocalFile {
            path: "/workspace/.codex/a.txt".into(),
            size,
            mtime: at(mtime),
        }
    }

    fn remote(size: u64, last_modified: Option<u64>) -> RemoteObject {
        RemoteObject {
            key: "workspace/backups/.codex/a.txt".to_string(),
            size,
            last_modified: last_modified.map(at),
        }
    }

    const BOTH: [Direction; 2] = [Direction::Upload, Direction::Download];

    #[test]
    fn equal_size_without_remote_timestamp_skips() {
        for direction in BOTH {
            let d = decide(direction, Some(&local(10, 500)), Some(&remote(10, None)), false);
            assert_eq!(d.action, Action::Skip, "{:?}", direction);
            assert_eq!(d.reason, DecisionReason::UpToDate);
        }
    }

    #[test]
    fn forced_overwrite_always_transfers() {
        for direction in BOTH {
            for (l, r) in [
                (local(10, 100), remote(10, Some(100))),
                (local(10, 100), remote(10, None)),
                (local(10, 1), remote(99, Some(500))),
            ] {
                let d = decide(direction, Some(&l), Some(&r), true);
                assert_eq!(d.action, Action::Transfer);
                assert_eq!(d.reason, DecisionReason::Forced);
                assert_eq!(d.direction, direction);
            }
        }
    }

    #[test]
    fn size_mismatch_always_transfers() {
        for direction in BOTH {
            for (lt, rt) in [(100, Some(50)), (50, Some(100)), (100, Some(100)), (100, None)] {
                let d = decide(direction, Some(&local(11, lt)), Some(&remote(10, rt)), false);
                assert_eq!(d.action, Action::Transfer);
                assert_eq!(d.reason, DecisionReason::SizeMismatch { local: 11, remote: 10 });
            }
        }
    }

    #[test]
    fn download_when_local_is_older() {
        let d = decide(Direction::Download, Some(&local(10, 99)), Some(&remote(10, Some(100))), false);
        assert!(d.is_transfer());
        assert_eq!(d.reason, DecisionReason::SourceNewer);

        let d = decide(Direction::Download, Some(&local(10, 101)), Some(&remote(10, Some(100))), false);
        assert!(!d.is_transfer());
    }

    #[test]
    fn upload_when_local_is_newer() {
        let d = decide(Direction::Upload, Some(&local(10, 101)), Some(&remote(10, Some(100))), false);
        assert!(d.is_transfer());
        assert_eq!(d.reason, DecisionReason::SourceNewer);

        let d = decide(Direction::Upload, Some(&local(10, 99)), Some(&remote(10, Some(100))), false);
        assert!(!d.is_transfer());
    }

    #[test]
    fn identical_timestamps_never_transfer() {
        // A file modified exactly at the remote's recorded time stays put in
        // both directions.
        for direction in BOTH {
            let d = decide(direction, Some(&local(10, 100)), Some(&remote(10, Some(100))), false);
            assert_eq!(d.action, Action::Skip, "{:?}", direction);
        }
    }

    #[test]
    fn missing_destination_transfers() {
        let d = decide(Direction::Download, None, Some(&remote(10, Some(1))), false);
        assert_eq!(d.reason, DecisionReason::Missing);
        assert!(d.is_transfer());

        let d = decide(Direction::Upload, Some(&local(10, 1)), None, false);
        assert_eq!(d.reason, DecisionReason::Missing);
        assert!(d.is_transfer());
    }

    #[test]
    fn missing_source_is_skipped() {
        let d = decide(Direction::Download, Some(&local(10, 1)), None, false);
        assert_eq!(d.action, Action::Skip);
        assert_eq!(d.reason, DecisionReason::NoSource);
    }
}
