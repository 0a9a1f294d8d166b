//! Discord REST payloads and response classification.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use slackord_core::errors::Error;

/// `GUILD_TEXT`.
pub const CHANNEL_TYPE_TEXT: u8 = 0;
/// `GUILD_ANNOUNCEMENT`; accepted when reusing an existing channel.
pub const CHANNEL_TYPE_ANNOUNCEMENT: u8 = 5;

pub const CHANNEL_NAME_MAX: usize = 100;
pub const TOPIC_MAX: usize = 1024;
/// One week, the longest auto-archive Discord offers.
pub const THREAD_AUTO_ARCHIVE_MINUTES: u32 = 10_080;
/// "A thread has already been created for this message."
pub const THREAD_ALREADY_EXISTS: u64 = 160_004;

#[derive(Debug, Deserialize)]
pub struct ChannelObject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: u8,
}

#[derive(Debug, Deserialize)]
pub struct MessageObject {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct CreateChannel<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateMessage<'a> {
    pub content: &'a str,
    pub allowed_mentions: AllowedMentions,
}

impl<'a> CreateMessage<'a> {
    /// Historical messages never ping anyone.
    pub fn silent(content: &'a str) -> Self {
        Self {
            content,
            allowed_mentions: AllowedMentions { parse: Vec::new() },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AllowedMentions {
    pub parse: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct StartThread<'a> {
    pub name: &'a str,
    pub auto_archive_duration: u32,
}

#[derive(Debug, Deserialize)]
struct RateLimited {
    retry_after: f64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: u64,
}

/// Discord channel name for a Slack channel: lowercase, no whitespace, at most 100 chars.
pub fn channel_name(slack_name: &str) -> String {
    slack_name
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .flat_map(char::to_lowercase)
        .take(CHANNEL_NAME_MAX)
        .collect()
}

pub fn topic(description: &str) -> Option<String> {
    let d = description.trim();
    (!d.is_empty()).then(|| d.chars().take(TOPIC_MAX).collect())
}

/// Retry hint from a 429: JSON `retry_after` (seconds, fractional) or the `Retry-After` header.
pub fn parse_retry_after(body: &str, header: Option<&str>) -> Option<Duration> {
    serde_json::from_str::<RateLimited>(body)
        .ok()
        .map(|r| r.retry_after)
        .or_else(|| header.and_then(|h| h.trim().parse::<f64>().ok()))
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Discord JSON error code from a failed response body, if any.
pub fn api_error_code(body: &str) -> Option<u64> {
    serde_json::from_str::<ApiError>(body)
        .ok()
        .map(|e| e.code)
        .filter(|c| *c != 0)
}

/// Map a non-success status onto the core error taxonomy.
///
/// 429 is throttling, gateway errors and a refused token mean the target is
/// unusable, anything else rejects just this request.
pub fn classify_status(status: u16, body: &str, retry_after_header: Option<&str>) -> Error {
    match status {
        429 => Error::Throttled {
            retry_after: parse_retry_after(body, retry_after_header),
        },
        401 => Error::Connection("discord refused the bot token (401)".to_string()),
        502..=504 => Error::Connection(format!("discord returned {status}")),
        _ => Error::Rejected {
            status,
            body: body.chars().take(200).collect(),
        },
    }
}

pub fn map_transport(e: reqwest::Error) -> Error {
    if e.is_connect() || e.is_timeout() {
        Error::Connection(format!("discord request error: {e}"))
    } else {
        Error::External(format!("discord request error: {e}"))
    }
}
