use std::fmt;

/// Source-platform (Slack) user id, e.g. `U024BE7LH`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceUserId(pub String);

/// Target-platform channel id (Discord snowflake).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TargetChannelId(pub String);

/// Target-platform message id (Discord snowflake).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TargetMessageId(pub String);

/// A conversation that exists on the target platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetChannel {
    pub id: TargetChannelId,
    pub name: String,
    /// `true` when this run created the channel, `false` when an existing one was reused.
    pub created: bool,
}

/// Whether the export root holds every channel or the selection is one channel directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportMode {
    Full,
    Partial,
}

impl ExportMode {
    pub fn from_full_flag(is_full_export: bool) -> Self {
        if is_full_export {
            ExportMode::Full
        } else {
            ExportMode::Partial
        }
    }

    pub fn is_full(self) -> bool {
        matches!(self, ExportMode::Full)
    }
}

impl fmt::Display for SourceUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TargetChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TargetMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportMode::Full => f.write_str("full"),
            ExportMode::Partial => f.write_str("partial"),
        }
    }
}
