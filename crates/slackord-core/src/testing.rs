//! In-memory target used by the pipeline tests.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{TargetChannel, TargetChannelId, TargetMessageId},
    errors::Error,
    messaging::{
        port::TargetPort,
        types::{OutgoingMessage, TargetCapabilities},
    },
    Result,
};

#[derive(Clone, Debug)]
pub struct SentMessage {
    pub channel: String,
    pub id: TargetMessageId,
    pub message: OutgoingMessage,
}

#[derive(Clone, Debug)]
enum Failure {
    Throttle { remaining: usize, retry_after: Option<Duration> },
    Reject,
}

#[derive(Default)]
pub struct FakeTarget {
    next_id: AtomicUsize,
    channels: Mutex<Vec<TargetChannel>>,
    sent: Mutex<Vec<SentMessage>>,
    failures: Mutex<Vec<(String, Failure)>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    unreachable: AtomicBool,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    max_len: Option<usize>,
    threads_refused: AtomicBool,
    plain_text: bool,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(1000),
            ..Default::default()
        }
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
            ..Self::new()
        }
    }

    /// A target that shows markdown literally.
    pub fn plain_text() -> Self {
        Self {
            plain_text: true,
            ..Self::new()
        }
    }

    /// Replies fail as if the target refused to open threads.
    pub fn refuse_threads(&self) {
        self.threads_refused.store(true, Ordering::SeqCst);
    }

    /// A conversation that already exists on the target.
    pub fn preexisting(&self, name: &str) {
        let id = self.alloc();
        self.channels.lock().unwrap().push(TargetChannel {
            id: TargetChannelId(id),
            name: name.to_string(),
            created: false,
        });
    }

    /// Throttle sends whose content contains `needle`, `times` times.
    pub fn throttle_matching(&self, needle: &str, times: usize, retry_after: Option<Duration>) {
        self.failures.lock().unwrap().push((
            needle.to_string(),
            Failure::Throttle {
                remaining: times,
                retry_after,
            },
        ));
    }

    /// Permanently reject sends whose content contains `needle`.
    pub fn reject_matching(&self, needle: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((needle.to_string(), Failure::Reject));
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Cancel `token` once `sends` messages went out.
    pub fn cancel_after(&self, sends: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((sends, token));
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, channel: &str) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|s| s.channel == channel)
            .collect()
    }

    pub fn channels(&self) -> Vec<TargetChannel> {
        self.channels.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn alloc(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn scripted_failure(&self, content: &str) -> Option<Error> {
        let mut failures = self.failures.lock().unwrap();
        for (needle, failure) in failures.iter_mut() {
            if !content.contains(needle.as_str()) {
                continue;
            }
            match failure {
                Failure::Throttle {
                    remaining,
                    retry_after,
                } if *remaining > 0 => {
                    *remaining -= 1;
                    return Some(Error::Throttled {
                        retry_after: *retry_after,
                    });
                }
                Failure::Throttle { .. } => {}
                Failure::Reject => {
                    return Some(Error::Rejected {
                        status: 400,
                        body: "rejected by fake".to_string(),
                    })
                }
            }
        }
        None
    }
}

#[async_trait]
impl TargetPort for FakeTarget {
    fn capabilities(&self) -> TargetCapabilities {
        TargetCapabilities {
            supports_threads: true,
            supports_markdown: !self.plain_text,
            max_message_len: self.max_len.unwrap_or(2000),
        }
    }

    async fn ensure_channel(&self, name: &str, _description: &str) -> Result<TargetChannel> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Connection("fake target offline".to_string()));
        }
        let mut channels = self.channels.lock().unwrap();
        if let Some(existing) = channels.iter().find(|c| c.name == name) {
            return Ok(TargetChannel {
                created: false,
                ..existing.clone()
            });
        }
        let channel = TargetChannel {
            id: TargetChannelId(self.alloc()),
            name: name.to_string(),
            created: true,
        };
        channels.push(channel.clone());
        Ok(channel)
    }

    async fn send_message(
        &self,
        channel: &TargetChannel,
        message: &OutgoingMessage,
    ) -> Result<TargetMessageId> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Connection("fake target offline".to_string()));
        }
        if message.reply_to.is_some() && self.threads_refused.load(Ordering::SeqCst) {
            return Err(Error::ThreadUnavailable("missing permissions".to_string()));
        }
        if let Some(err) = self.scripted_failure(&message.content) {
            return Err(err);
        }
        if let Some(max) = self.max_len {
            if message.content.chars().count() > max {
                return Err(Error::Rejected {
                    status: 400,
                    body: "message too long".to_string(),
                });
            }
        }

        let id = TargetMessageId(self.alloc());
        let total = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(SentMessage {
                channel: channel.name.clone(),
                id: id.clone(),
                message: message.clone(),
            });
            sent.len()
        };

        if let Some((after, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if total >= *after {
                token.cancel();
            }
        }
        Ok(id)
    }
}
