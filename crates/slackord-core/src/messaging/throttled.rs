use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{TargetChannel, TargetMessageId},
    messaging::{
        port::TargetPort,
        types::{OutgoingMessage, TargetCapabilities},
    },
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* target API calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between sends into one conversation.
    pub per_channel_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        // Discord allows ~50 req/s globally and 5 messages per 5s per channel.
        Self {
            global_min_interval: Duration::from_millis(25),
            per_channel_min_interval: Duration::from_millis(1000),
        }
    }
}

impl ThrottleConfig {
    /// One shared interval for everything (`requests_per_second` sends per second).
    pub fn per_second(requests_per_second: u32) -> Self {
        let interval = Duration::from_secs(1) / requests_per_second.max(1);
        Self {
            global_min_interval: interval,
            per_channel_min_interval: interval,
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// TargetPort decorator that paces outbound calls.
///
/// Pacing avoids most throttling responses; the reconstructor still retries
/// the ones that get through.
pub struct ThrottledTarget {
    inner: Arc<dyn TargetPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_channel: Mutex<HashMap<String, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledTarget {
    pub fn new(inner: Arc<dyn TargetPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_channel: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        self.cfg
    }

    async fn limiter_for_channel(&self, channel_id: &str) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_channel.lock().await;
        map.entry(channel_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_channel_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_channel(&self, channel_id: &str) {
        let global_wait = { self.global.lock().await.reserve() };
        let channel_wait = {
            let lim = self.limiter_for_channel(channel_id).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(channel_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl TargetPort for ThrottledTarget {
    fn capabilities(&self) -> TargetCapabilities {
        self.inner.capabilities()
    }

    async fn ensure_channel(&self, name: &str, description: &str) -> Result<TargetChannel> {
        self.throttle_global().await;
        self.inner.ensure_channel(name, description).await
    }

    async fn send_message(
        &self,
        channel: &TargetChannel,
        message: &OutgoingMessage,
    ) -> Result<TargetMessageId> {
        self.throttle_channel(&channel.id.0).await;
        self.inner.send_message(channel, message).await
    }
}
