//! Run-scoped state shared by every pipeline stage.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio_util::sync::CancellationToken;

use crate::{
    domain::ExportMode, errors::Error, export::message::Channel, logging::LogSink,
    progress::ProgressSink, Result,
};

/// Per-run state machine:
/// `Idle -> Scanning -> Deconstructing -> Aggregating -> Reconstructing -> {Completed | Cancelled | Failed}`.
///
/// Deconstructing and Aggregating alternate once per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Scanning,
    Deconstructing,
    Aggregating,
    Reconstructing,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Scanning => "scanning",
            RunState::Deconstructing => "deconstructing",
            RunState::Aggregating => "aggregating",
            RunState::Reconstructing => "reconstructing",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Final outcome of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

impl From<RunStatus> for RunState {
    fn from(s: RunStatus) -> Self {
        match s {
            RunStatus::Completed => RunState::Completed,
            RunStatus::Cancelled => RunState::Cancelled,
            RunStatus::Failed => RunState::Failed,
        }
    }
}

/// Context object for one import: counters, cancellation, and the two sinks.
///
/// Created at run start and dropped at the end; nothing here outlives the run.
pub struct ImportRun {
    root: PathBuf,
    mode: ExportMode,
    state: RunState,
    history: Vec<RunState>,
    pub total_files: usize,
    pub files_processed: usize,
    pub hidden_files: usize,
    cancel: CancellationToken,
    log: Arc<dyn LogSink>,
    progress: Arc<dyn ProgressSink>,
}

impl ImportRun {
    pub fn new(
        root: impl Into<PathBuf>,
        mode: ExportMode,
        cancel: CancellationToken,
        log: Arc<dyn LogSink>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            root: root.into(),
            mode,
            state: RunState::Idle,
            history: vec![RunState::Idle],
            total_files: 0,
            files_processed: 0,
            hidden_files: 0,
            cancel,
            log,
            progress,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> ExportMode {
        self.mode
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn transition(&mut self, next: RunState) {
        if self.state == next || self.state.is_terminal() {
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "run state");
        self.state = next;
        self.history.push(next);
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Poll point: `Err(Error::Cancelled)` once cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn log(&self, line: impl AsRef<str>) {
        self.log.write_line(line.as_ref());
    }

    pub fn log_sink(&self) -> &dyn LogSink {
        self.log.as_ref()
    }

    pub fn progress(&self) -> &dyn ProgressSink {
        self.progress.as_ref()
    }

    /// Count one more file handled (parsed or failed) and report it.
    pub fn file_processed(&mut self) {
        self.files_processed += 1;
        self.progress
            .on_progress(self.files_processed, self.total_files, "files");
    }
}

/// Per-channel counts reported at the end of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelSummary {
    pub name: String,
    pub files: usize,
    pub skipped_files: usize,
    pub hidden_files: usize,
    /// Canonical messages produced by deconstruction.
    pub messages: usize,
    /// Records that could not be deconstructed.
    pub skipped_records: usize,
    pub delivered: usize,
    /// Messages given up on during delivery (rejected, throttled past the retry budget).
    pub failed_deliveries: usize,
    /// Replies whose parent was unavailable and went out top-level.
    pub degraded_replies: usize,
    /// Whether delivery for this channel ran to the end.
    pub completed: bool,
}

impl ChannelSummary {
    pub fn from_channel(channel: &Channel) -> Self {
        Self {
            name: channel.name.clone(),
            files: channel.file_count,
            skipped_files: channel.skipped_files,
            hidden_files: channel.hidden_files,
            messages: channel.messages.len(),
            skipped_records: channel.skipped_records,
            ..Default::default()
        }
    }

    /// Messages that did not make it to the target, for whatever reason.
    pub fn skipped(&self) -> usize {
        self.skipped_records + self.failed_deliveries
    }
}

/// Outcome of one import run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub status: RunStatus,
    pub root: PathBuf,
    pub mode: ExportMode,
    pub total_files: usize,
    pub files_processed: usize,
    pub hidden_files: usize,
    pub channels: Vec<ChannelSummary>,
    /// Channel directories skipped because they could not be read.
    pub unreadable_channels: Vec<String>,
    /// Cause for a `Failed` run.
    pub error: Option<String>,
}

impl RunSummary {
    pub fn channel(&self, name: &str) -> Option<&ChannelSummary> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn delivered(&self) -> usize {
        self.channels.iter().map(|c| c.delivered).sum()
    }

    pub fn skipped(&self) -> usize {
        self.channels.iter().map(ChannelSummary::skipped).sum()
    }

    pub fn skipped_files(&self) -> usize {
        self.channels.iter().map(|c| c.skipped_files).sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            RunStatus::Completed => "Completed",
            RunStatus::Cancelled => "Cancelled",
            RunStatus::Failed => "Failed",
        };
        writeln!(
            f,
            "Import {status}: {} delivered, {} skipped, {}/{} files processed, {} unreadable files, {} hidden files",
            self.delivered(),
            self.skipped(),
            self.files_processed,
            self.total_files,
            self.skipped_files(),
            self.hidden_files
        )?;
        for c in &self.channels {
            writeln!(
                f,
                "  #{}: {} delivered, {} skipped",
                c.name,
                c.delivered,
                c.skipped()
            )?;
        }
        for name in &self.unreadable_channels {
            writeln!(f, "  #{name}: unreadable")?;
        }
        if let Some(e) = &self.error {
            writeln!(f, "  error: {e}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{logging::MemoryLogSink, progress::RecordingProgress};

    fn run() -> (ImportRun, Arc<RecordingProgress>) {
        let progress = Arc::new(RecordingProgress::new());
        let run = ImportRun::new(
            "/export",
            ExportMode::Full,
            CancellationToken::new(),
            Arc::new(MemoryLogSink::new()),
            progress.clone(),
        );
        (run, progress)
    }

    #[test]
    fn terminal_state_is_sticky() {
        let (mut r, _) = run();
        r.transition(RunState::Scanning);
        r.transition(RunState::Cancelled);
        r.transition(RunState::Reconstructing);
        assert_eq!(r.state(), RunState::Cancelled);
        assert_eq!(
            r.history(),
            &[RunState::Idle, RunState::Scanning, RunState::Cancelled]
        );
    }

    #[test]
    fn file_progress_is_reported() {
        let (mut r, progress) = run();
        r.total_files = 3;
        r.file_processed();
        r.file_processed();
        assert_eq!(progress.last_progress("files"), Some((2, 3)));
    }

    #[test]
    fn cancellation_poll() {
        let (r, _) = run();
        assert!(r.check_cancelled().is_ok());
        r.cancel_token().cancel();
        assert!(matches!(r.check_cancelled(), Err(Error::Cancelled)));
    }

    #[test]
    fn summary_totals() {
        let summary = RunSummary {
            status: RunStatus::Completed,
            root: "/export".into(),
            mode: ExportMode::Full,
            total_files: 4,
            files_processed: 4,
            hidden_files: 0,
            channels: vec![
                ChannelSummary {
                    name: "general".into(),
                    delivered: 4,
                    skipped_records: 1,
                    ..Default::default()
                },
                ChannelSummary {
                    name: "random".into(),
                    delivered: 2,
                    failed_deliveries: 1,
                    ..Default::default()
                },
            ],
            unreadable_channels: vec![],
            error: None,
        };
        assert_eq!(summary.delivered(), 6);
        assert_eq!(summary.skipped(), 2);
        assert!(summary.to_string().starts_with("Import Completed: 6 delivered"));
        assert_eq!(summary.channel("random").unwrap().skipped(), 1);
    }
}
