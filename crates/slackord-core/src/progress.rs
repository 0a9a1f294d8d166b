//! Progress events pushed to whoever displays the import.

use std::sync::Mutex;

/// Receives progress from the pipeline. Calls are synchronous and cheap.
pub trait ProgressSink: Send + Sync {
    /// `unit` is `"files"` while parsing and `"channels"` while delivering.
    fn on_progress(&self, processed: usize, total: usize, unit: &str);
    fn on_channel_started(&self, name: &str, file_count: usize);
    fn on_channel_completed(&self, name: &str);
    fn on_hidden_file_count_final(&self, count: usize);
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _processed: usize, _total: usize, _unit: &str) {}
    fn on_channel_started(&self, _name: &str, _file_count: usize) {}
    fn on_channel_completed(&self, _name: &str) {}
    fn on_hidden_file_count_final(&self, _count: usize) {}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    Progress {
        processed: usize,
        total: usize,
        unit: String,
    },
    ChannelStarted {
        name: String,
        file_count: usize,
    },
    ChannelCompleted {
        name: String,
    },
    HiddenFileCountFinal(usize),
}

/// Records events in order.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Last `(processed, total)` reported for `unit`.
    pub fn last_progress(&self, unit: &str) -> Option<(usize, usize)> {
        self.events().into_iter().rev().find_map(|e| match e {
            ProgressEvent::Progress {
                processed,
                total,
                unit: u,
            } if u == unit => Some((processed, total)),
            _ => None,
        })
    }

    fn push(&self, event: ProgressEvent) {
        if let Ok(mut e) = self.events.lock() {
            e.push(event);
        }
    }
}

impl ProgressSink for RecordingProgress {
    fn on_progress(&self, processed: usize, total: usize, unit: &str) {
        self.push(ProgressEvent::Progress {
            processed,
            total,
            unit: unit.to_string(),
        });
    }

    fn on_channel_started(&self, name: &str, file_count: usize) {
        self.push(ProgressEvent::ChannelStarted {
            name: name.to_string(),
            file_count,
        });
    }

    fn on_channel_completed(&self, name: &str) {
        self.push(ProgressEvent::ChannelCompleted {
            name: name.to_string(),
        });
    }

    fn on_hidden_file_count_final(&self, count: usize) {
        self.push(ProgressEvent::HiddenFileCountFinal(count));
    }
}

/// Percentage in `0.0..=100.0`; an empty total counts as done.
pub fn percentage(processed: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        (processed.min(total) as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_events_in_order() {
        let p = RecordingProgress::new();
        p.on_channel_started("general", 2);
        p.on_progress(1, 2, "files");
        p.on_progress(2, 2, "files");
        p.on_channel_completed("general");
        p.on_hidden_file_count_final(0);

        assert_eq!(p.events().len(), 5);
        assert_eq!(p.last_progress("files"), Some((2, 2)));
        assert_eq!(p.last_progress("channels"), None);
        assert_eq!(
            p.events().last(),
            Some(&ProgressEvent::HiddenFileCountFinal(0))
        );
    }

    #[test]
    fn percentage_handles_edges() {
        assert_eq!(percentage(0, 0), 100.0);
        assert_eq!(percentage(1, 4), 25.0);
        assert_eq!(percentage(9, 4), 100.0);
    }
}
