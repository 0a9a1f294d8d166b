//! Formatting utilities (canonical message → Discord markdown, delivery splitting).

use std::{fmt, str::FromStr};

use crate::{
    errors::Error,
    export::{
        message::{Attachment, CanonicalMessage, MessageTs, Reaction},
        users::{DisplayPolicy, UserDirectory},
    },
    Result,
};

/// Prefix on every chunk after the first when a message is split.
pub const CONTINUATION_PREFIX: &str = "(continued) ";

/// Discord caps thread names at 100 characters.
pub const THREAD_NAME_MAX: usize = 100;

const FALLBACK_AUTHOR: &str = "Slack";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimestampFormat {
    #[default]
    TwelveHour,
    TwentyFourHour,
}

impl TimestampFormat {
    fn pattern(self) -> &'static str {
        match self {
            TimestampFormat::TwelveHour => "%Y-%m-%d %I:%M %p",
            TimestampFormat::TwentyFourHour => "%Y-%m-%d %H:%M",
        }
    }

    pub fn format(self, ts: &MessageTs) -> String {
        ts.to_datetime()
            .map(|dt| dt.format(self.pattern()).to_string())
            .unwrap_or_else(|| ts.as_str().to_string())
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampFormat::TwelveHour => f.write_str("12 Hour"),
            TimestampFormat::TwentyFourHour => f.write_str("24 Hour"),
        }
    }
}

impl FromStr for TimestampFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let norm: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match norm.as_str() {
            "12" | "12h" | "12hour" => Ok(TimestampFormat::TwelveHour),
            "24" | "24h" | "24hour" => Ok(TimestampFormat::TwentyFourHour),
            _ => Err(Error::Config(format!("unknown timestamp format: {s:?}"))),
        }
    }
}

/// Escape Discord markdown control characters.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '*' | '_' | '~' | '`' | '|' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Renders canonical messages with a fixed author policy and timestamp format.
#[derive(Clone, Copy)]
pub struct MessageRenderer<'a> {
    users: &'a UserDirectory,
    policy: DisplayPolicy,
    timestamps: TimestampFormat,
    markdown: bool,
}

impl<'a> MessageRenderer<'a> {
    pub fn new(users: &'a UserDirectory, policy: DisplayPolicy, timestamps: TimestampFormat) -> Self {
        Self {
            users,
            policy,
            timestamps,
            markdown: true,
        }
    }

    /// Plain-text output for targets that show markdown literally.
    pub fn with_markdown(mut self, markdown: bool) -> Self {
        self.markdown = markdown;
        self
    }

    /// Known users go through the display policy; otherwise the inline name, then the raw id.
    pub fn author(&self, msg: &CanonicalMessage) -> String {
        if let Some(id) = msg.author_id.as_deref() {
            if let Some(name) = self.users.try_resolve(id, self.policy) {
                return name;
            }
        }
        msg.author_name
            .clone()
            .or_else(|| msg.author_id.clone())
            .unwrap_or_else(|| FALLBACK_AUTHOR.to_string())
    }

    pub fn render(&self, msg: &CanonicalMessage) -> String {
        if msg.is_system_notice() {
            let body = msg.text.trim();
            let body = if body.is_empty() {
                msg.subtype.as_ref().map(|s| s.tag()).unwrap_or("notice")
            } else {
                body
            };
            if !self.markdown {
                return body.to_string();
            }
            return format!("*{body}*");
        }

        let when = msg
            .ts
            .as_ref()
            .map(|ts| self.timestamps.format(ts))
            .unwrap_or_else(|| "unknown time".to_string());
        let mut out = if self.markdown {
            format!("**{}** `{when}`", escape_markdown(&self.author(msg)))
        } else {
            format!("{} [{when}]", self.author(msg))
        };

        let body = msg.text.trim_end();
        if !body.is_empty() {
            out.push('\n');
            out.push_str(body);
        }
        for a in &msg.attachments {
            out.push('\n');
            out.push_str(&attachment_line(a));
        }
        if !msg.reactions.is_empty() {
            out.push('\n');
            out.push_str(&reactions_line(&msg.reactions));
        }
        out
    }
}

fn attachment_line(a: &Attachment) -> String {
    let name = if a.name.is_empty() { "file" } else { &a.name };
    if a.url.is_empty() {
        format!("📎 {name} ({})", human_size(a.size))
    } else {
        format!("📎 {name} ({}) {}", human_size(a.size), a.url)
    }
}

fn reactions_line(reactions: &[Reaction]) -> String {
    reactions
        .iter()
        .map(|r| format!(":{}: ×{}", r.emoji, r.count))
        .collect::<Vec<_>>()
        .join("  ")
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Thread title from a parent's text: first non-empty line, truncated.
pub fn thread_name(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Thread");
    truncate_chars(line, THREAD_NAME_MAX)
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Split `content` into chunks of at most `max_len` characters.
///
/// Breaks at the last newline (else space) inside the window; chunks after the
/// first carry [`CONTINUATION_PREFIX`]. Never returns an empty vector.
pub fn split_for_delivery(content: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    if content.chars().count() <= max_len {
        return vec![content.to_string()];
    }

    let prefix_len = CONTINUATION_PREFIX.chars().count();
    let mut out = Vec::new();
    let mut rest = content;
    while !rest.is_empty() {
        let (prefix, budget) = if out.is_empty() || max_len <= prefix_len {
            ("", max_len)
        } else {
            (CONTINUATION_PREFIX, max_len - prefix_len)
        };
        let (chunk, tail) = take_chunk(rest, budget);
        out.push(format!("{prefix}{chunk}"));
        rest = tail;
    }
    out
}

fn take_chunk(s: &str, budget: usize) -> (&str, &str) {
    let Some((end, _)) = s.char_indices().nth(budget) else {
        return (s, "");
    };
    let window = &s[..end];
    match window.rfind('\n').or_else(|| window.rfind(' ')) {
        // Separators are single-byte, so `i + 1` stays on a char boundary.
        Some(i) if i > 0 => (&s[..i], &s[i + 1..]),
        _ => (window, &s[end..]),
    }
}
