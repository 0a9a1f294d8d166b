use crate::domain::TargetMessageId;

/// Capabilities / limits of a target platform implementation.
#[derive(Clone, Copy, Debug)]
pub struct TargetCapabilities {
    pub supports_threads: bool,
    pub supports_markdown: bool,
    pub max_message_len: usize,
}

/// Where a reply goes: the already-delivered parent and a title for a newly opened thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyAnchor {
    pub parent: TargetMessageId,
    pub thread_name: String,
}

/// One delivery unit: a single send to the target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: String,
    pub reply_to: Option<ReplyAnchor>,
}

impl OutgoingMessage {
    pub fn top_level(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reply_to: None,
        }
    }

    pub fn reply(content: impl Into<String>, anchor: ReplyAnchor) -> Self {
        Self {
            content: content.into(),
            reply_to: Some(anchor),
        }
    }
}
