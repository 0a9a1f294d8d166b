//! Delivery of aggregated channels to the target platform.
//!
//! Channels go out in discovery order and messages in stored order, one send
//! at a time. Pacing is the job of the port decorator
//! ([`ThrottledTarget`](crate::messaging::throttled::ThrottledTarget)); this
//! module retries what still gets throttled and decides what is fatal.

use std::{collections::HashMap, future::Future, time::Duration};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{TargetChannel, TargetMessageId},
    errors::Error,
    export::message::{CanonicalMessage, Channel},
    formatting::{split_for_delivery, thread_name, MessageRenderer},
    messaging::{
        port::TargetPort,
        types::{OutgoingMessage, ReplyAnchor},
    },
    run::{ChannelSummary, ImportRun, RunState},
    Result,
};

/// Bounded exponential backoff for throttled or unreachable sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Throttle hints from the server win when they ask for longer than our backoff.
    fn wait_for(&self, err: &Error, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        match err {
            Error::Throttled {
                retry_after: Some(hint),
            } => (*hint).max(backoff),
            _ => backoff,
        }
    }
}

/// How delivery ended when it did not fail fatally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed,
    Cancelled,
}

pub struct Reconstructor<'a> {
    target: &'a dyn TargetPort,
    renderer: MessageRenderer<'a>,
    retry: RetryPolicy,
    message_limit: usize,
}

impl<'a> Reconstructor<'a> {
    pub fn new(
        target: &'a dyn TargetPort,
        renderer: MessageRenderer<'a>,
        retry: RetryPolicy,
        message_limit: usize,
    ) -> Self {
        let caps = target.capabilities();
        let message_limit = message_limit.min(caps.max_message_len);
        Self {
            target,
            renderer: renderer.with_markdown(caps.supports_markdown),
            retry,
            message_limit,
        }
    }

    /// Deliver `channels`, filling the matching entry of `summaries` for each.
    ///
    /// `summaries` is index-aligned with `channels`. Errors only with
    /// [`Error::Connection`] once the target stays unreachable past the retry
    /// budget; everything else is counted, logged and skipped.
    pub async fn reconstruct(
        &self,
        channels: &[Channel],
        summaries: &mut [ChannelSummary],
        run: &mut ImportRun,
    ) -> Result<DeliveryOutcome> {
        run.transition(RunState::Reconstructing);
        let total = channels.len();

        for (done, (channel, summary)) in channels.iter().zip(summaries.iter_mut()).enumerate() {
            if run.is_cancelled() {
                return Ok(DeliveryOutcome::Cancelled);
            }

            let target_channel = match self.open_channel(channel, run).await {
                Ok(c) => c,
                Err(Error::Cancelled) => return Ok(DeliveryOutcome::Cancelled),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    run.log(format!("Could not create channel {}: {e}", channel.name));
                    summary.failed_deliveries += channel.messages.len();
                    run.progress().on_progress(done + 1, total, "channels");
                    continue;
                }
            };

            if self.deliver_channel(channel, &target_channel, summary, run).await?
                == DeliveryOutcome::Cancelled
            {
                return Ok(DeliveryOutcome::Cancelled);
            }

            summary.completed = true;
            run.progress().on_channel_completed(&channel.name);
            run.progress().on_progress(done + 1, total, "channels");
            tracing::info!(
                channel = %channel.name,
                delivered = summary.delivered,
                failed = summary.failed_deliveries,
                "channel delivered"
            );
        }

        Ok(DeliveryOutcome::Completed)
    }

    async fn open_channel(&self, channel: &Channel, run: &ImportRun) -> Result<TargetChannel> {
        let cancel = run.cancel_token().clone();
        let opened = self
            .with_retry(&cancel, || {
                self.target
                    .ensure_channel(&channel.name, &channel.description)
            })
            .await?;

        if opened.created {
            run.log(format!("Created channel {}.", channel.name));
        } else {
            run.log(format!("Using existing channel {}.", channel.name));
        }
        Ok(opened)
    }

    async fn deliver_channel(
        &self,
        channel: &Channel,
        target: &TargetChannel,
        summary: &mut ChannelSummary,
        run: &ImportRun,
    ) -> Result<DeliveryOutcome> {
        let threads_supported = self.target.capabilities().supports_threads;
        // Parent instant -> where its replies go. `None` once the target refused a thread.
        let mut threads: HashMap<(i64, u32), Option<ReplyAnchor>> = HashMap::new();

        for msg in &channel.messages {
            if run.is_cancelled() {
                return Ok(DeliveryOutcome::Cancelled);
            }

            let anchor = match &msg.thread_parent {
                Some(parent) if threads_supported => match threads.get(&parent.key()) {
                    Some(Some(anchor)) => Some(anchor.clone()),
                    Some(None) => {
                        summary.degraded_replies += 1;
                        None
                    }
                    None => {
                        summary.degraded_replies += 1;
                        run.log(format!(
                            "Parent {parent} of a reply in {} was not delivered, sending the reply top-level.",
                            channel.name
                        ));
                        None
                    }
                },
                _ => None,
            };

            let delivered = match self.deliver_message(target, msg, anchor, run).await {
                Err(Error::ThreadUnavailable(reason)) => {
                    if let Some(parent) = &msg.thread_parent {
                        threads.insert(parent.key(), None);
                        run.log(format!(
                            "Could not open a thread for {parent} in {}: {reason}. Sending its replies top-level.",
                            channel.name
                        ));
                    }
                    summary.degraded_replies += 1;
                    self.deliver_message(target, msg, None, run).await
                }
                other => other,
            };

            match delivered {
                Ok(first_id) => {
                    summary.delivered += 1;
                    if let (Some(ts), false) = (&msg.ts, msg.is_reply()) {
                        threads.insert(
                            ts.key(),
                            Some(ReplyAnchor {
                                parent: first_id,
                                thread_name: thread_name(&msg.text),
                            }),
                        );
                    }
                }
                Err(Error::Cancelled) => return Ok(DeliveryOutcome::Cancelled),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    summary.failed_deliveries += 1;
                    run.log(format!(
                        "Skipped message {} in {}: {e}",
                        msg.ts
                            .as_ref()
                            .map(|t| t.as_str())
                            .unwrap_or("without timestamp"),
                        channel.name
                    ));
                }
            }
        }

        Ok(DeliveryOutcome::Completed)
    }

    /// Send one message, split as needed. Returns the id of its first chunk.
    ///
    /// A failed chunk abandons the rest of the message.
    async fn deliver_message(
        &self,
        target: &TargetChannel,
        msg: &CanonicalMessage,
        anchor: Option<ReplyAnchor>,
        run: &ImportRun,
    ) -> Result<TargetMessageId> {
        let content = self.renderer.render(msg);
        let cancel = run.cancel_token().clone();
        let mut first = None;

        for chunk in split_for_delivery(&content, self.message_limit) {
            let outgoing = OutgoingMessage {
                content: chunk,
                reply_to: anchor.clone(),
            };
            let id = self
                .with_retry(&cancel, || self.target.send_message(target, &outgoing))
                .await?;
            first.get_or_insert(id);
        }

        first.ok_or_else(|| Error::External("message produced no deliveries".to_string()))
    }

    async fn with_retry<T, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: impl FnMut() -> Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };

            let retryable = err.is_throttle() || matches!(err, Error::Connection(_));
            if !retryable || attempt >= self.retry.max_retries {
                return Err(err);
            }

            let wait = self.retry.wait_for(&err, attempt);
            tracing::warn!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "retrying send");
            attempt += 1;

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(wait) => {}
            }
        }
    }
}
