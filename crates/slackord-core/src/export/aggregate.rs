//! Per-channel aggregation of deconstructed messages.

use std::{collections::HashMap, path::Path};

use serde_json::Value;

use crate::{
    errors::Error,
    export::{deconstruct::MessageDeconstructor, message::Channel, scanner::ChannelDir},
    run::{ImportRun, RunState},
    Result,
};

/// Decides how many files a raw record references that the source platform withheld.
///
/// Slack does not document a single signal for this, so the rule is pluggable.
pub trait HiddenFileDetector: Send + Sync {
    fn hidden_files(&self, record: &Value) -> usize;
}

/// Counts `files[]` entries whose `mode` is `hidden_by_limit` (free-plan history limit).
#[derive(Clone, Copy, Debug, Default)]
pub struct SlackLimitDetector;

impl HiddenFileDetector for SlackLimitDetector {
    fn hidden_files(&self, record: &Value) -> usize {
        record
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter(|f| f.get("mode").and_then(Value::as_str) == Some("hidden_by_limit"))
                    .count()
            })
            .unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoHiddenFiles;

impl HiddenFileDetector for NoHiddenFiles {
    fn hidden_files(&self, _record: &Value) -> usize {
        0
    }
}

pub const DEFAULT_LARGE_CHANNEL_FILES: usize = 400;

pub struct ChannelAggregator<'a> {
    deconstructor: &'a MessageDeconstructor<'a>,
    detector: &'a dyn HiddenFileDetector,
    large_channel_files: usize,
}

impl<'a> ChannelAggregator<'a> {
    pub fn new(
        deconstructor: &'a MessageDeconstructor<'a>,
        detector: &'a dyn HiddenFileDetector,
    ) -> Self {
        Self {
            deconstructor,
            detector,
            large_channel_files: DEFAULT_LARGE_CHANNEL_FILES,
        }
    }

    #[must_use]
    pub fn with_large_channel_files(mut self, threshold: usize) -> Self {
        self.large_channel_files = threshold;
        self
    }

    /// Build one channel from its files, in lexical order.
    ///
    /// File failures are logged and counted, never fatal. On cancellation the
    /// channel built so far is returned and the caller checks the run's token.
    pub async fn aggregate(
        &self,
        dir: &ChannelDir,
        descriptions: &HashMap<String, String>,
        run: &mut ImportRun,
    ) -> Channel {
        let mut channel = Channel::new(dir.name.clone());
        channel.file_count = dir.files.len();

        run.transition(RunState::Deconstructing);
        run.progress().on_channel_started(&channel.name, channel.file_count);
        run.log(format!(
            "Begin parsing JSON data for {} with {} JSON files...",
            channel.name, channel.file_count
        ));
        if channel.file_count > self.large_channel_files {
            run.log(format!(
                "Channel {} holds {} files. Reconstructing will take a long time, please be patient.",
                channel.name, channel.file_count
            ));
        }

        for file in &dir.files {
            if run.is_cancelled() {
                tracing::debug!(channel = %channel.name, "aggregation cancelled");
                return channel;
            }

            if let Err(e) = self.read_file(file, &mut channel, run).await {
                channel.skipped_files += 1;
                run.log(format!(
                    "Exception processing file {}: {e}",
                    file_label(file)
                ));
            }
            run.file_processed();
        }

        run.transition(RunState::Aggregating);
        // Stable: equal timestamps keep file order, untimestamped records go last.
        channel
            .messages
            .sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        channel.description = descriptions.get(&channel.name).cloned().unwrap_or_default();

        run.log(format!("Completed importing channel {}.", channel.name));
        channel
    }

    async fn read_file(&self, file: &Path, channel: &mut Channel, run: &mut ImportRun) -> Result<()> {
        let contents = tokio::fs::read_to_string(file).await?;
        let records = match serde_json::from_str::<Value>(&contents)? {
            Value::Array(records) => records,
            _ => {
                return Err(Error::parse(
                    Some(file.to_path_buf()),
                    "expected a JSON array of messages",
                ))
            }
        };

        for (index, record) in records.iter().enumerate() {
            let hidden = self.detector.hidden_files(record);
            channel.hidden_files += hidden;
            run.hidden_files += hidden;

            match self.deconstructor.deconstruct(record) {
                Ok(msg) => channel.messages.push(msg),
                Err(e) => {
                    channel.skipped_records += 1;
                    run.log(format!(
                        "Skipped record {index} in {}: {e}",
                        file_label(file)
                    ));
                }
            }
        }
        Ok(())
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::ExportMode,
        export::users::{DisplayPolicy, UserDirectory},
        logging::MemoryLogSink,
        progress::{ProgressEvent, RecordingProgress},
    };
    use serde_json::json;
    use std::{fs, path::PathBuf, sync::Arc};
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        _tmp: tempfile::TempDir,
        dir: ChannelDir,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("general");
        fs::create_dir_all(&path).unwrap();
        let mut paths: Vec<PathBuf> = files
            .iter()
            .map(|(name, body)| {
                let p = path.join(name);
                fs::write(&p, body).unwrap();
                p
            })
            .collect();
        paths.sort();
        Fixture {
            _tmp: tmp,
            dir: ChannelDir {
                name: "general".to_string(),
                path,
                files: paths,
            },
        }
    }

    fn new_run(
        cancel: CancellationToken,
    ) -> (ImportRun, Arc<MemoryLogSink>, Arc<RecordingProgress>) {
        let log = Arc::new(MemoryLogSink::new());
        let progress = Arc::new(RecordingProgress::new());
        let run = ImportRun::new(
            "/export",
            ExportMode::Full,
            cancel,
            log.clone(),
            progress.clone(),
        );
        (run, log, progress)
    }

    #[tokio::test]
    async fn aggregates_files_in_order_with_description() {
        let fx = fixture(&[
            ("2024-01-02.json", r#"[{"text":"third","ts":"300.0"}]"#),
            (
                "2024-01-01.json",
                r#"[{"text":"first","ts":"100.0"},{"text":"second","ts":"200.0"}]"#,
            ),
        ]);
        let users = UserDirectory::default();
        let d = MessageDeconstructor::new(&users, DisplayPolicy::default());
        let agg = ChannelAggregator::new(&d, &SlackLimitDetector);
        let (mut run, log, progress) = new_run(CancellationToken::new());
        run.total_files = 2;

        let descriptions = HashMap::from([("general".to_string(), "Company-wide".to_string())]);
        let channel = agg.aggregate(&fx.dir, &descriptions, &mut run).await;

        let texts: Vec<_> = channel.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(channel.description, "Company-wide");
        assert_eq!(channel.file_count, 2);
        assert_eq!(run.files_processed, 2);
        assert_eq!(progress.last_progress("files"), Some((2, 2)));
        assert!(log.contains("Begin parsing JSON data for general with 2 JSON files"));
        assert!(log.contains("Completed importing channel general."));
        assert_eq!(
            progress.events()[0],
            ProgressEvent::ChannelStarted {
                name: "general".to_string(),
                file_count: 2
            }
        );
    }

    #[tokio::test]
    async fn malformed_file_is_counted_and_skipped() {
        let fx = fixture(&[
            ("2024-01-01.json", "[{\"text\":"),
            ("2024-01-02.json", r#"{"text":"not an array"}"#),
            ("2024-01-03.json", r#"[{"text":"ok","ts":"1.0"}]"#),
        ]);
        let users = UserDirectory::default();
        let d = MessageDeconstructor::new(&users, DisplayPolicy::default());
        let agg = ChannelAggregator::new(&d, &NoHiddenFiles);
        let (mut run, log, _) = new_run(CancellationToken::new());

        let channel = agg.aggregate(&fx.dir, &HashMap::new(), &mut run).await;
        assert_eq!(channel.skipped_files, 2);
        assert_eq!(channel.messages.len(), 1);
        assert_eq!(run.files_processed, 3);
        assert!(log.contains("Exception processing file 2024-01-01.json"));
        assert!(log.contains("expected a JSON array"));
        assert_eq!(channel.description, "");
    }

    #[tokio::test]
    async fn malformed_record_is_counted_per_record() {
        let fx = fixture(&[(
            "2024-01-01.json",
            r#"[{"text":"a","ts":"1.0"}, "garbage", {"text":"b","ts":"2.0"}]"#,
        )]);
        let users = UserDirectory::default();
        let d = MessageDeconstructor::new(&users, DisplayPolicy::default());
        let agg = ChannelAggregator::new(&d, &NoHiddenFiles);
        let (mut run, log, _) = new_run(CancellationToken::new());

        let channel = agg.aggregate(&fx.dir, &HashMap::new(), &mut run).await;
        assert_eq!(channel.messages.len(), 2);
        assert_eq!(channel.skipped_records, 1);
        assert_eq!(channel.skipped_files, 0);
        assert!(log.contains("Skipped record 1 in 2024-01-01.json"));
    }

    #[tokio::test]
    async fn untimestamped_records_sort_last() {
        let fx = fixture(&[(
            "2024-01-01.json",
            r#"[{"text":"late"}, {"text":"b","ts":"2.0"}, {"text":"a","ts":"1.0"}]"#,
        )]);
        let users = UserDirectory::default();
        let d = MessageDeconstructor::new(&users, DisplayPolicy::default());
        let agg = ChannelAggregator::new(&d, &NoHiddenFiles);
        let (mut run, _, _) = new_run(CancellationToken::new());

        let channel = agg.aggregate(&fx.dir, &HashMap::new(), &mut run).await;
        let texts: Vec<_> = channel.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "late"]);
    }

    #[tokio::test]
    async fn counts_hidden_files() {
        let record = json!([{
            "text": "", "ts": "1.0",
            "files": [{"mode": "hidden_by_limit"}, {"mode": "hidden_by_limit"}, {"name": "x", "url_private": "u"}]
        }]);
        let fx = fixture(&[("2024-01-01.json", &record.to_string())]);
        let users = UserDirectory::default();
        let d = MessageDeconstructor::new(&users, DisplayPolicy::default());
        let agg = ChannelAggregator::new(&d, &SlackLimitDetector);
        let (mut run, _, _) = new_run(CancellationToken::new());

        let channel = agg.aggregate(&fx.dir, &HashMap::new(), &mut run).await;
        assert_eq!(channel.hidden_files, 2);
        assert_eq!(run.hidden_files, 2);
        assert_eq!(channel.messages[0].attachments.len(), 1);
    }

    #[tokio::test]
    async fn warns_about_large_channels() {
        let fx = fixture(&[("a.json", "[]"), ("b.json", "[]")]);
        let users = UserDirectory::default();
        let d = MessageDeconstructor::new(&users, DisplayPolicy::default());
        let agg = ChannelAggregator::new(&d, &NoHiddenFiles).with_large_channel_files(1);
        let (mut run, log, _) = new_run(CancellationToken::new());

        agg.aggregate(&fx.dir, &HashMap::new(), &mut run).await;
        assert!(log.contains("please be patient"));
    }

    #[tokio::test]
    async fn stops_reading_when_cancelled() {
        let fx = fixture(&[
            ("a.json", r#"[{"text":"a","ts":"1.0"}]"#),
            ("b.json", r#"[{"text":"b","ts":"2.0"}]"#),
        ]);
        let users = UserDirectory::default();
        let d = MessageDeconstructor::new(&users, DisplayPolicy::default());
        let agg = ChannelAggregator::new(&d, &NoHiddenFiles);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (mut run, _, _) = new_run(cancel);

        let channel = agg.aggregate(&fx.dir, &HashMap::new(), &mut run).await;
        assert!(channel.messages.is_empty());
        assert_eq!(run.files_processed, 0);
    }
}
