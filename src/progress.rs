//! Progress accounting, ETA estimation and status output.

use crate::types::{Direction, SyncSummary, TransferOutcome, TransferStatus};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Formats seconds as `H:MM:SS` (one hour or more) or `M:SS`.
///
/// Negative or non-finite input renders as `n/a`.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "n/a".to_string();
    }
    let total = seconds.round() as u64;
    let (hours, rem) = (total / 3600, total % 3600);
    let (minutes, secs) = (rem / 60, rem % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Remaining-time estimator averaging the most recent transfer durations
/// over several window sizes.
#[derive(Debug, Clone)]
pub struct RollingEta {
    windows: Vec<(usize, VecDeque<f64>)>,
}

impl RollingEta {
    pub fn new(windows: &[usize]) -> Self {
        Self {
            windows: windows
                .iter()
                .map(|&w| (w.max(1), VecDeque::with_capacity(w.max(1))))
                .collect(),
        }
    }

    /// Records one successful transfer, evicting the oldest sample of every
    /// window that is already full.
    pub fn add(&mut self, duration: Duration) {
        let secs = duration.as_secs_f64();
        for (window, samples) in &mut self.windows {
            samples.push_back(secs);
            if samples.len() > *window {
                samples.pop_front();
            }
        }
    }

    /// Number of samples currently held by each window, in window order.
    pub fn sample_counts(&self) -> Vec<usize> {
        self.windows.iter().map(|(_, s)| s.len()).collect()
    }

    /// Estimated time for `remaining` more transfers, one entry per window
    /// that has samples, e.g. `w10(n=10)=1:05, w50(n=37)=1:12`.
    pub fn estimate_remaining(&self, remaining: usize) -> String {
        if remaining == 0 {
            return "0s".to_string();
        }
        let parts: Vec<String> = self
            .windows
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(window, samples)| {
                let avg = samples.iter().sum::<f64>() / samples.len() as f64;
                format!(
                    "w{}(n={})={}",
                    window,
                    samples.len(),
                    format_duration(remaining as f64 * avg)
                )
            })
            .collect();
        if parts.is_empty() {
            "n/a".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Destination for status output.
///
/// Passed explicitly into the tracker so the engine never touches global
/// output state.
pub trait StatusSink: Send + Sync {
    /// Periodic and final status lines.
    fn status(&self, line: &str);

    /// One line per failed item.
    fn item_failed(&self, key: &str, message: &str);

    /// Called after every accounted item; `processed` out of `total`.
    fn advance(&self, _processed: usize, _total: usize) {}

    /// Called once when the pass is over.
    fn finish(&self) {}
}

/// Writes status lines through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn status(&self, line: &str) {
        info!("{}", line);
    }

    fn item_failed(&self, key: &str, message: &str) {
        warn!("Workspace {} failed: {}", key, message);
    }
}

/// Drives an interactive progress bar; status lines are still logged above it.
pub struct ProgressBarSink {
    pb: indicatif::ProgressBar,
}

impl ProgressBarSink {
    pub fn new(label: &str) -> Self {
        let pb = indicatif::ProgressBar::new(0);
        pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
                .progress_chars("█▓▒░ "),
        );
        pb.set_message(label.to_string());
        pb.enable_steady_tick(Duration::from_millis(200));
        Self { pb }
    }
}

impl StatusSink for ProgressBarSink {
    fn status(&self, line: &str) {
        self.pb.suspend(|| info!("{}", line));
    }

    fn item_failed(&self, key: &str, message: &str) {
        self.pb
            .suspend(|| warn!("Workspace {} failed: {}", key, message));
    }

    fn advance(&self, processed: usize, total: usize) {
        self.pb.set_length(total as u64);
        self.pb.set_position(processed as u64);
    }

    fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Counters for one pass. `processed == transferred + skipped + failed`
/// holds after every update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressState {
    pub total: usize,
    pub processed: usize,
    pub transferred: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ProgressState {
    fn check(&self) {
        debug_assert_eq!(self.processed, self.transferred + self.skipped + self.failed);
        debug_assert!(self.processed <= self.total);
    }
}

/// Accumulates outcomes for a pass and emits status lines through a sink.
pub struct ProgressTracker<'a> {
    direction: Direction,
    state: ProgressState,
    pending: usize,
    eta: RollingEta,
    sink: &'a dyn StatusSink,
    started: Instant,
    log_every: usize,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(
        direction: Direction,
        total: usize,
        eta_windows: &[usize],
        log_every: usize,
        sink: &'a dyn StatusSink,
    ) -> Self {
        Self {
            direction,
            state: ProgressState {
                total,
                ..ProgressState::default()
            },
            pending: 0,
            eta: RollingEta::new(eta_windows),
            sink,
            started: Instant::now(),
            log_every: log_every.max(1),
        }
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }

    /// Number of items that went to the scheduler.
    pub fn set_pending(&mut self, pending: usize) {
        self.pending = pending;
    }

    /// Accounts one item. Transfers contribute a duration sample; skips and
    /// failures only count.
    pub fn record(&mut self, outcome: &TransferOutcome) {
        self.state.processed += 1;
        match outcome.status {
            TransferStatus::Transferred => {
                self.state.transferred += 1;
                self.eta.add(outcome.duration);
            }
            TransferStatus::Skipped => self.state.skipped += 1,
            TransferStatus::Failed => {
                self.state.failed += 1;
                let message = outcome.error_message.as_deref().unwrap_or("unknown error");
                self.sink.item_failed(&outcome.key, message);
            }
        }
        self.state.check();
        self.sink.advance(self.state.processed, self.state.total);

        if self.state.processed % self.log_every == 0 || self.state.processed == self.state.total
        {
            self.sink.status(&self.status_line());
        }
    }

    /// Accounts items the diff engine decided to skip, without emitting a
    /// status line.
    pub fn record_skipped(&mut self, count: usize) {
        self.state.processed += count;
        self.state.skipped += count;
        self.state.check();
        self.sink.advance(self.state.processed, self.state.total);
    }

    pub fn status_line(&self) -> String {
        let remaining = self.state.total.saturating_sub(self.state.processed);
        format!(
            "Workspace: {}/{} done ({} {}, {} skipped, {} failed). Elapsed {}. ETA {}",
            self.state.processed,
            self.state.total,
            self.state.transferred,
            self.direction.past_tense(),
            self.state.skipped,
            self.state.failed,
            format_duration(self.started.elapsed().as_secs_f64()),
            self.eta.estimate_remaining(remaining),
        )
    }

    /// Closes the sink and returns the pass summary.
    pub fn finish(self) -> SyncSummary {
        self.sink.finish();
        SyncSummary {
            direction: self.direction,
            total: self.state.total,
            pending: self.pending,
            transferred: self.state.transferred,
            skipped: self.state.skipped,
            failed: self.state.failed,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Sink capturing everything, for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) lines: std::sync::Mutex<Vec<String>>,
    pub(crate) failures: std::sync::Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl StatusSink for RecordingSink {
    fn status(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn item_failed(&self, key: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((key.to_string(), message.to_string()));
    }
}
