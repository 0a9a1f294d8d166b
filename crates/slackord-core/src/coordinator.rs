//! One import run: Scan → Deconstruct → Aggregate → Reconstruct.
//!
//! The coordinator is where a run's outcome is decided. Errors from any stage
//! stop here and become a `Failed` summary; nothing propagates to the caller.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use tokio_util::sync::CancellationToken;

use crate::{
    config::ImportSettings,
    domain::ExportMode,
    errors::Error,
    export::{
        aggregate::{ChannelAggregator, HiddenFileDetector, SlackLimitDetector},
        deconstruct::MessageDeconstructor,
        scanner::{load_channel_descriptions, ExportLayout, ExportScanner},
        users::UserDirectory,
    },
    formatting::MessageRenderer,
    logging::LogSink,
    messaging::{port::TargetPort, throttled::ThrottledTarget},
    progress::ProgressSink,
    reconstruct::{DeliveryOutcome, Reconstructor},
    run::{ChannelSummary, ImportRun, RunState, RunStatus, RunSummary},
    Result,
};

pub struct ImportCoordinator {
    target: Arc<dyn TargetPort>,
    settings: ImportSettings,
    detector: Arc<dyn HiddenFileDetector>,
    log: Arc<dyn LogSink>,
    progress: Arc<dyn ProgressSink>,
    current: Mutex<Option<CancellationToken>>,
    run_lock: tokio::sync::Mutex<()>,
}

/// What a run produced before it ended, however it ended.
#[derive(Default)]
struct Partial {
    channels: Vec<ChannelSummary>,
    unreadable: Vec<String>,
}

impl ImportCoordinator {
    /// `target` is wrapped in a [`ThrottledTarget`] using `settings.throttle`.
    pub fn new(
        target: Arc<dyn TargetPort>,
        settings: ImportSettings,
        log: Arc<dyn LogSink>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let throttled: Arc<dyn TargetPort> = Arc::new(ThrottledTarget::new(target, settings.throttle));
        Self {
            target: throttled,
            settings,
            detector: Arc::new(SlackLimitDetector),
            log,
            progress,
            current: Mutex::new(None),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_hidden_file_detector(mut self, detector: Arc<dyn HiddenFileDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Fresh cancellation signal for the next run. Any previous signal is cancelled.
    pub fn begin_run(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.current.lock() {
            if let Some(prev) = current.replace(token.clone()) {
                prev.cancel();
            }
        }
        token
    }

    /// Cancel the run started by the last [`begin_run`](Self::begin_run).
    pub fn cancel(&self) {
        if let Ok(current) = self.current.lock() {
            if let Some(token) = current.as_ref() {
                token.cancel();
            }
        }
    }

    /// Cancel whatever is running and import `root`.
    pub async fn start(&self, root: &Path, mode: ExportMode) -> RunSummary {
        let cancel = self.begin_run();
        self.run(root, mode, cancel).await
    }

    /// Execute one run. Runs are serialized; a second caller waits for the first.
    pub async fn run(&self, root: &Path, mode: ExportMode, cancel: CancellationToken) -> RunSummary {
        let _guard = self.run_lock.lock().await;

        let mut run = ImportRun::new(
            root,
            mode,
            cancel,
            self.log.clone(),
            self.progress.clone(),
        );
        run.progress().on_progress(0, 0, "files");
        tracing::info!(root = %root.display(), %mode, "import started");

        let mut partial = Partial::default();
        let result = self.execute(&mut run, &mut partial).await;

        let (status, error) = match result {
            Ok(DeliveryOutcome::Completed) => (RunStatus::Completed, None),
            Ok(DeliveryOutcome::Cancelled) | Err(Error::Cancelled) => (RunStatus::Cancelled, None),
            Err(e) => {
                run.log(format!("Import failed: {e}"));
                tracing::error!(error = %e, "import failed");
                (RunStatus::Failed, Some(e.to_string()))
            }
        };
        run.transition(status.into());

        run.progress().on_hidden_file_count_final(run.hidden_files);
        if run.hidden_files > 0 {
            run.log(format!(
                "Total files hidden by Slack due to limits: {}",
                run.hidden_files
            ));
        }
        match status {
            RunStatus::Completed => run.log("Import Completed."),
            RunStatus::Cancelled => run.log("Import cancelled."),
            RunStatus::Failed => {}
        }

        let summary = RunSummary {
            status,
            root: root.to_path_buf(),
            mode,
            total_files: run.total_files,
            files_processed: run.files_processed,
            hidden_files: run.hidden_files,
            channels: partial.channels,
            unreadable_channels: partial.unreadable,
            error,
        };
        tracing::info!(
            status = %run.state(),
            delivered = summary.delivered(),
            skipped = summary.skipped(),
            "import finished"
        );
        summary
    }

    async fn execute(&self, run: &mut ImportRun, partial: &mut Partial) -> Result<DeliveryOutcome> {
        run.transition(RunState::Scanning);
        let scanner = ExportScanner::new(
            self.settings.users_file_name.clone(),
            self.settings.channels_file_name.clone(),
        );
        let layout = scanner.discover(run.root(), run.mode()).await?;

        for skipped in &layout.unreadable {
            run.log(format!(
                "Skipping channel {}: {}",
                skipped.name, skipped.reason
            ));
            partial.unreadable.push(skipped.name.clone());
        }

        run.total_files = layout.total_files();
        run.progress().on_progress(0, run.total_files, "files");

        let users = self.load_users(&layout, run).await;
        let descriptions = self.load_descriptions(&layout, run).await;
        if run.is_cancelled() {
            return Ok(DeliveryOutcome::Cancelled);
        }

        let deconstructor = MessageDeconstructor::new(&users, self.settings.display_policy);
        let aggregator = ChannelAggregator::new(&deconstructor, self.detector.as_ref())
            .with_large_channel_files(self.settings.large_channel_files);

        let mut channels = Vec::with_capacity(layout.channels.len());
        for dir in &layout.channels {
            if run.is_cancelled() {
                return Ok(DeliveryOutcome::Cancelled);
            }
            let channel = aggregator.aggregate(dir, &descriptions, run).await;
            partial.channels.push(ChannelSummary::from_channel(&channel));
            channels.push(channel);
        }
        if run.is_cancelled() {
            return Ok(DeliveryOutcome::Cancelled);
        }

        let renderer = MessageRenderer::new(
            &users,
            self.settings.display_policy,
            self.settings.timestamp_format,
        );
        let reconstructor = Reconstructor::new(
            self.target.as_ref(),
            renderer,
            self.settings.retry,
            self.settings.message_limit,
        );
        reconstructor
            .reconstruct(&channels, &mut partial.channels, run)
            .await
    }

    /// A malformed user list is logged and treated as empty; mentions then stay raw.
    async fn load_users(&self, layout: &ExportLayout, run: &ImportRun) -> UserDirectory {
        match UserDirectory::load(layout.users_file.as_deref()).await {
            Ok(users) => {
                tracing::debug!(users = users.len(), "user directory loaded");
                users
            }
            Err(e) => {
                run.log(format!("Could not read user list: {e}"));
                UserDirectory::default()
            }
        }
    }

    async fn load_descriptions(
        &self,
        layout: &ExportLayout,
        run: &ImportRun,
    ) -> HashMap<String, String> {
        let Some(path) = layout.channels_file.as_deref() else {
            return HashMap::new();
        };
        match load_channel_descriptions(path).await {
            Ok(d) => d,
            Err(e) => {
                run.log(format!("Could not read channel list: {e}"));
                HashMap::new()
            }
        }
    }
}
