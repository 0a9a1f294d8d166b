use std::{path::PathBuf, time::Duration};

/// Core error type for the importer.
///
/// Adapter crates map their transport errors into this type so the pipeline
/// can tell absorbable failures (throttling, rejected sends, bad files) from
/// run-fatal ones (unreachable target, unreadable export root).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("parse error{}: {reason}", path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    Parse {
        path: Option<PathBuf>,
        reason: String,
    },

    #[error("throttled by target{}", retry_after.map(|d| format!(" (retry after {}ms)", d.as_millis())).unwrap_or_default())]
    Throttled { retry_after: Option<Duration> },

    #[error("target unreachable: {0}")]
    Connection(String),

    #[error("target rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// A reply could not be threaded under its parent; the message itself was not sent.
    #[error("thread unavailable: {0}")]
    ThreadUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn parse(path: Option<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Parse {
            path,
            reason: reason.into(),
        }
    }

    /// Throttling signal from the target platform.
    pub fn is_throttle(&self) -> bool {
        matches!(self, Error::Throttled { .. })
    }

    /// Conditions that end a run as `Failed` rather than being absorbed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::InvalidPath { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_fatal_and_throttle() {
        assert!(Error::Connection("down".into()).is_fatal());
        assert!(Error::InvalidPath {
            path: "/nope".into(),
            reason: "missing".into()
        }
        .is_fatal());
        assert!(!Error::Cancelled.is_fatal());
        assert!(!Error::ThreadUnavailable("403".into()).is_fatal());
        assert!(Error::Throttled { retry_after: None }.is_throttle());
        assert!(!Error::Rejected {
            status: 400,
            body: String::new()
        }
        .is_throttle());
    }

    #[test]
    fn parse_error_mentions_path() {
        let e = Error::parse(Some("general/2024-01-01.json".into()), "expected array");
        let s = e.to_string();
        assert!(s.contains("general/2024-01-01.json"));
        assert!(s.contains("expected array"));
    }

    #[test]
    fn throttle_message_includes_hint() {
        let e = Error::Throttled {
            retry_after: Some(Duration::from_millis(1500)),
        };
        assert!(e.to_string().contains("1500ms"));
    }
}
