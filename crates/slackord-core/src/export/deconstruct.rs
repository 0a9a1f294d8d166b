//! Raw Slack message record → [`CanonicalMessage`].
//!
//! Tolerant by construction: any JSON object is accepted and missing fields
//! degrade to empty values. Only records that are not objects at all are
//! rejected, so the caller can count them as skipped.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::{
    errors::Error,
    export::{
        message::{Attachment, CanonicalMessage, MessageSubtype, MessageTs, Reaction},
        users::{DisplayPolicy, UserDirectory},
    },
    Result,
};

/// File modes Slack uses for entries whose content is not in the export.
const WITHHELD_FILE_MODES: [&str; 2] = ["hidden_by_limit", "tombstone"];

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([^<>\s][^<>]*)>").expect("valid regex"))
}

/// Converts raw records using a fixed user directory and display policy.
///
/// Mentions are resolved once, here; the resulting text is not re-resolved
/// if the policy changes later.
pub struct MessageDeconstructor<'a> {
    users: &'a UserDirectory,
    policy: DisplayPolicy,
}

impl<'a> MessageDeconstructor<'a> {
    pub fn new(users: &'a UserDirectory, policy: DisplayPolicy) -> Self {
        Self { users, policy }
    }

    pub fn policy(&self) -> DisplayPolicy {
        self.policy
    }

    pub fn deconstruct(&self, raw: &Value) -> Result<CanonicalMessage> {
        let obj = raw.as_object().ok_or_else(|| {
            Error::parse(
                None,
                format!("expected a message object, found {}", json_kind(raw)),
            )
        })?;

        let ts = obj.get("ts").and_then(parse_ts);
        let thread_parent = obj
            .get("thread_ts")
            .and_then(parse_ts)
            .filter(|parent| Some(parent.key()) != ts.as_ref().map(MessageTs::key));

        let mut text = self.normalize_text(str_field(obj, "text").unwrap_or_default());
        if text.trim().is_empty() {
            text = attachment_fallback(obj);
        }

        Ok(CanonicalMessage {
            ts,
            author_id: str_field(obj, "user")
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            author_name: inline_author_name(obj),
            text,
            attachments: parse_files(obj),
            reactions: parse_reactions(obj),
            thread_parent,
            subtype: str_field(obj, "subtype").map(MessageSubtype::from_tag),
        })
    }

    /// Resolve `<…>` control sequences and decode Slack's HTML entities.
    pub fn normalize_text(&self, text: &str) -> String {
        let replaced = token_re().replace_all(text, |caps: &Captures<'_>| {
            let whole = &caps[0];
            self.render_token(&caps[1])
                .unwrap_or_else(|| whole.to_string())
        });
        decode_entities(&replaced)
    }

    fn render_token(&self, inner: &str) -> Option<String> {
        let (target, label) = match inner.split_once('|') {
            Some((t, l)) => (t, Some(l)),
            None => (inner, None),
        };

        if let Some(user_id) = target.strip_prefix('@') {
            // Unknown users keep their raw token unless Slack supplied a label.
            return self
                .users
                .try_resolve(user_id, self.policy)
                .or_else(|| label.filter(|l| !l.is_empty()).map(str::to_string))
                .map(|name| format!("@{}", name.trim_start_matches('@')));
        }

        if let Some(channel_id) = target.strip_prefix('#') {
            return Some(format!("#{}", label.unwrap_or(channel_id)));
        }

        if let Some(special) = target.strip_prefix('!') {
            return Some(match special {
                "here" | "channel" | "everyone" => format!("@{special}"),
                _ => match label {
                    Some(l) => l.to_string(),
                    None => return None,
                },
            });
        }

        if target.contains("://") || target.starts_with("mailto:") {
            let url = target;
            return Some(match label {
                Some(l) if !l.is_empty() && l != url && !url.ends_with(l) => {
                    format!("{l} ({url})")
                }
                _ => url.trim_start_matches("mailto:").to_string(),
            });
        }

        None
    }
}

fn parse_ts(v: &Value) -> Option<MessageTs> {
    match v {
        Value::String(s) => MessageTs::parse(s).ok(),
        Value::Number(n) => MessageTs::parse(&n.to_string()).ok(),
        _ => None,
    }
}

fn str_field<'v>(obj: &'v Map<String, Value>, key: &str) -> Option<&'v str> {
    obj.get(key).and_then(Value::as_str)
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn inline_author_name(obj: &Map<String, Value>) -> Option<String> {
    let profile = obj.get("user_profile").and_then(Value::as_object);
    let from_profile = profile.and_then(|p| {
        ["display_name", "real_name", "name"]
            .iter()
            .find_map(|k| str_field(p, k).and_then(non_empty))
    });
    from_profile
        .or_else(|| str_field(obj, "username").and_then(non_empty))
        .or_else(|| {
            obj.get("bot_profile")
                .and_then(Value::as_object)
                .and_then(|b| str_field(b, "name"))
                .and_then(non_empty)
        })
}

fn parse_files(obj: &Map<String, Value>) -> Vec<Attachment> {
    let Some(files) = obj.get("files").and_then(Value::as_array) else {
        return Vec::new();
    };

    files
        .iter()
        .filter_map(Value::as_object)
        .filter(|f| {
            !str_field(f, "mode")
                .map(|m| WITHHELD_FILE_MODES.contains(&m))
                .unwrap_or(false)
        })
        .filter_map(|f| {
            let url = ["url_private", "url_private_download", "permalink"]
                .iter()
                .find_map(|k| str_field(f, k).and_then(non_empty))?;
            let name = ["name", "title"]
                .iter()
                .find_map(|k| str_field(f, k).and_then(non_empty))
                .unwrap_or_else(|| "file".to_string());
            let size = f.get("size").and_then(Value::as_u64).unwrap_or(0);
            Some(Attachment { url, name, size })
        })
        .collect()
}

fn parse_reactions(obj: &Map<String, Value>) -> Vec<Reaction> {
    let Some(reactions) = obj.get("reactions").and_then(Value::as_array) else {
        return Vec::new();
    };

    reactions
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|r| {
            let emoji = str_field(r, "name").and_then(non_empty)?;
            let count = r
                .get("count")
                .and_then(Value::as_u64)
                .or_else(|| r.get("users").and_then(Value::as_array).map(|u| u.len() as u64))
                .unwrap_or(1);
            Some(Reaction {
                emoji,
                count: u32::try_from(count).unwrap_or(u32::MAX),
            })
        })
        .collect()
}

/// Link unfurls and bot attachments carry a plain-text `fallback` when the body is empty.
fn attachment_fallback(obj: &Map<String, Value>) -> String {
    obj.get("attachments")
        .and_then(Value::as_array)
        .map(|xs| {
            xs.iter()
                .filter_map(Value::as_object)
                .filter_map(|a| {
                    str_field(a, "fallback")
                        .or_else(|| str_field(a, "text"))
                        .and_then(non_empty)
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
