//! Platform-neutral intermediate model of one export.

use std::{cmp::Ordering, fmt};

use chrono::{DateTime, Utc};

use crate::{errors::Error, Result};

/// Slack message timestamp (`"1700000000.123456"`).
///
/// Keeps the raw string, which doubles as the message's identity inside its
/// channel (thread parents reference it verbatim), plus the parsed instant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageTs {
    raw: String,
    secs: i64,
    micros: u32,
}

impl MessageTs {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let (secs_part, frac_part) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        let secs = secs_part
            .parse::<i64>()
            .map_err(|_| Error::parse(None, format!("invalid timestamp: {raw:?}")))?;

        if !frac_part.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::parse(None, format!("invalid timestamp: {raw:?}")));
        }
        // Fractional digits beyond microseconds are dropped; fewer are right-padded.
        let mut digits: String = frac_part.chars().take(6).collect();
        while digits.len() < 6 {
            digits.push('0');
        }
        let micros = digits.parse::<u32>().unwrap_or(0);

        Ok(Self {
            raw: trimmed.to_string(),
            secs,
            micros,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The instant alone. `"10.5"` and `"10.500000"` share a key.
    pub fn key(&self) -> (i64, u32) {
        (self.secs, self.micros)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.secs, self.micros * 1_000)
    }
}

impl PartialOrd for MessageTs {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MessageTs {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.secs, self.micros)
            .cmp(&(other.secs, other.micros))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl fmt::Display for MessageTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A file shared in a message. Only the reference travels, never the content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: String,
    pub count: u32,
}

/// Non-default message kinds that render as system notices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageSubtype {
    ChannelJoin,
    ChannelLeave,
    ChannelTopic,
    ChannelPurpose,
    ChannelName,
    ChannelArchive,
    BotMessage,
    ThreadBroadcast,
    Other(String),
}

impl MessageSubtype {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "channel_join" => Self::ChannelJoin,
            "channel_leave" => Self::ChannelLeave,
            "channel_topic" => Self::ChannelTopic,
            "channel_purpose" => Self::ChannelPurpose,
            "channel_name" => Self::ChannelName,
            "channel_archive" => Self::ChannelArchive,
            "bot_message" => Self::BotMessage,
            "thread_broadcast" => Self::ThreadBroadcast,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::ChannelJoin => "channel_join",
            Self::ChannelLeave => "channel_leave",
            Self::ChannelTopic => "channel_topic",
            Self::ChannelPurpose => "channel_purpose",
            Self::ChannelName => "channel_name",
            Self::ChannelArchive => "channel_archive",
            Self::BotMessage => "bot_message",
            Self::ThreadBroadcast => "thread_broadcast",
            Self::Other(s) => s,
        }
    }

    /// Membership/metadata events, rendered as italic notices instead of chat lines.
    pub fn is_system_notice(&self) -> bool {
        matches!(
            self,
            Self::ChannelJoin
                | Self::ChannelLeave
                | Self::ChannelTopic
                | Self::ChannelPurpose
                | Self::ChannelName
                | Self::ChannelArchive
        )
    }
}

/// One reconstructed unit of conversation. Never mutated after deconstruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalMessage {
    /// `None` when the record carried no recognizable timestamp; such messages sort last.
    pub ts: Option<MessageTs>,
    pub author_id: Option<String>,
    /// Name carried inline by the record (bot name, embedded profile).
    pub author_name: Option<String>,
    /// Body with mention tokens already resolved.
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<Reaction>,
    pub thread_parent: Option<MessageTs>,
    pub subtype: Option<MessageSubtype>,
}

impl CanonicalMessage {
    pub fn is_reply(&self) -> bool {
        self.thread_parent.is_some()
    }

    pub fn is_system_notice(&self) -> bool {
        self.subtype
            .as_ref()
            .map(MessageSubtype::is_system_notice)
            .unwrap_or(false)
    }

    /// Ordering key: timestamped messages by time, then untimestamped ones.
    pub fn order_key(&self) -> (bool, Option<&MessageTs>) {
        (self.ts.is_none(), self.ts.as_ref())
    }
}

/// A named conversation with its messages in source chronological order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub description: String,
    pub messages: Vec<CanonicalMessage>,
    /// JSON files found for the channel.
    pub file_count: usize,
    /// Files that could not be read or parsed.
    pub skipped_files: usize,
    /// Individual records inside readable files that could not be deconstructed.
    pub skipped_records: usize,
    /// Files the source platform withheld because of its export limits.
    pub hidden_files: usize,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_timestamps() {
        let ts = MessageTs::parse("1700000000.000200").unwrap();
        assert_eq!(ts.as_str(), "1700000000.000200");
        let dt = ts.to_datetime().unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_micros(), 200);

        let short = MessageTs::parse("1700000000.5").unwrap();
        assert_eq!(short.to_datetime().unwrap().timestamp_subsec_micros(), 500_000);

        let whole = MessageTs::parse("1700000000").unwrap();
        assert_eq!(whole.to_datetime().unwrap().timestamp_subsec_micros(), 0);
    }

    #[test]
    fn key_ignores_trailing_zeros() {
        let short = MessageTs::parse("1700000000.0001").unwrap();
        let padded = MessageTs::parse("1700000000.000100").unwrap();
        assert_ne!(short, padded);
        assert_eq!(short.key(), padded.key());
    }

    #[test]
    fn rejects_garbage_timestamps() {
        assert!(MessageTs::parse("").is_err());
        assert!(MessageTs::parse("yesterday").is_err());
        assert!(MessageTs::parse("1700000000.12ab").is_err());
    }

    #[test]
    fn orders_numerically_not_lexically() {
        let a = MessageTs::parse("999999999.900000").unwrap();
        let b = MessageTs::parse("1000000000.000001").unwrap();
        assert!(a < b);

        let c = MessageTs::parse("1700000000.1").unwrap();
        let d = MessageTs::parse("1700000000.099999").unwrap();
        assert!(d < c);
    }

    #[test]
    fn subtype_tags_round_trip() {
        for tag in ["channel_join", "bot_message", "pinned_item"] {
            assert_eq!(MessageSubtype::from_tag(tag).tag(), tag);
        }
        assert!(MessageSubtype::ChannelTopic.is_system_notice());
        assert!(!MessageSubtype::BotMessage.is_system_notice());
        assert!(!MessageSubtype::Other("file_share".into()).is_system_notice());
    }
}
