use std::sync::Mutex;

use crate::Result;

/// Initialize tracing for the importer.
///
/// Default: info for our crates, warn for everything else. Can be overridden
/// with `RUST_LOG`.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,slackord=info,slackord_core=info,slackord_discord=info,{service_name}=info"
        ))
    });

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init();

    Ok(())
}

/// Append-only stream of human-readable status lines.
///
/// The core calls this synchronously; whoever displays the lines owns any
/// thread-affinity concerns.
pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Forwards status lines to `tracing` at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write_line(&self, line: &str) {
        tracing::info!(target: "slackord::import", "{line}");
    }
}

/// Keeps every line in memory (log-copy collaborators, tests).
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }

    /// Full log as one string, one line per entry.
    pub fn text(&self) -> String {
        self.lines().join("\n")
    }

    pub fn clear(&self) {
        if let Ok(mut l) = self.lines.lock() {
            l.clear();
        }
    }
}

impl LogSink for MemoryLogSink {
    fn write_line(&self, line: &str) {
        if let Ok(mut l) = self.lines.lock() {
            l.push(line.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemoryLogSink::new();
        sink.write_line("first");
        sink.write_line("second");
        assert_eq!(sink.lines(), vec!["first", "second"]);
        assert!(sink.contains("sec"));
        assert_eq!(sink.text(), "first\nsecond");

        sink.clear();
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn init_twice_is_harmless() {
        init("slackord-test").unwrap();
        init("slackord-test").unwrap();
    }
}
