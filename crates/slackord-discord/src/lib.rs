//! Discord adapter (REST, `reqwest`).
//!
//! This crate implements the `slackord-core` TargetPort over the Discord HTTP API.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

pub mod wire;

use slackord_core::{
    config::DiscordConfig,
    domain::{TargetChannel, TargetChannelId, TargetMessageId},
    errors::Error,
    messaging::{
        port::TargetPort,
        types::{OutgoingMessage, ReplyAnchor, TargetCapabilities},
    },
    Result,
};

use wire::{
    ChannelObject, CreateChannel, CreateMessage, MessageObject, StartThread,
    CHANNEL_TYPE_ANNOUNCEMENT, CHANNEL_TYPE_TEXT, THREAD_ALREADY_EXISTS,
    THREAD_AUTO_ARCHIVE_MINUTES,
};

const MESSAGE_LIMIT: usize = 2000;

pub struct DiscordTarget {
    http: reqwest::Client,
    api_base: String,
    guild_id: String,
    /// Guild text channels by name; filled from the API on first use.
    channels: Mutex<Option<HashMap<String, TargetChannel>>>,
    /// Parent message id -> thread channel id.
    threads: Mutex<HashMap<String, String>>,
}

impl DiscordTarget {
    pub fn new(cfg: &DiscordConfig) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bot {}", cfg.token))
            .map_err(|_| Error::Config("DISCORD_BOT_TOKEN contains invalid characters".to_string()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("DiscordBot (slackord, ", env!("CARGO_PKG_VERSION"), ")")),
        );

        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("discord client build failed: {e}")))?;

        Ok(Self {
            http,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            guild_id: cfg.guild_id.clone(),
            channels: Mutex::new(None),
            threads: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(wire::map_transport)?;
        Self::decode(resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(wire::map_transport)?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), body = %body, "discord request failed");
            return Err(wire::classify_status(
                status.as_u16(),
                &body,
                retry_after.as_deref(),
            ));
        }
        resp.json::<T>()
            .await
            .map_err(|e| Error::External(format!("discord json error: {e}")))
    }

    async fn list_channels(&self) -> Result<HashMap<String, TargetChannel>> {
        let listed: Vec<ChannelObject> = self
            .get(&format!("/guilds/{}/channels", self.guild_id))
            .await?;
        Ok(listed
            .into_iter()
            .filter(|c| c.kind == CHANNEL_TYPE_TEXT || c.kind == CHANNEL_TYPE_ANNOUNCEMENT)
            .filter_map(|c| {
                let name = c.name?;
                Some((
                    name.clone(),
                    TargetChannel {
                        id: TargetChannelId(c.id),
                        name,
                        created: false,
                    },
                ))
            })
            .collect())
    }

    /// Thread for replies to `anchor.parent`, opening it on first use.
    async fn thread_for(&self, channel: &TargetChannel, anchor: &ReplyAnchor) -> Result<String> {
        let parent = anchor.parent.0.clone();
        if let Some(id) = self.threads.lock().await.get(&parent) {
            return Ok(id.clone());
        }

        let body = StartThread {
            name: &anchor.thread_name,
            auto_archive_duration: THREAD_AUTO_ARCHIVE_MINUTES,
        };
        let path = format!("/channels/{}/messages/{parent}/threads", channel.id);
        let thread_id = match self.post::<_, ChannelObject>(&path, &body).await {
            Ok(thread) => thread.id,
            // A thread started from a message shares the message's id.
            Err(Error::Rejected { body, .. })
                if wire::api_error_code(&body) == Some(THREAD_ALREADY_EXISTS) =>
            {
                parent.clone()
            }
            // Missing permissions, archived parent and the like: the reply can still go top-level.
            Err(Error::Rejected { status, body }) => {
                tracing::warn!(parent = %parent, status, body = %body, "thread could not be opened");
                return Err(Error::ThreadUnavailable(format!(
                    "discord refused to open a thread ({status})"
                )));
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(parent = %parent, thread = %thread_id, "thread opened");
        self.threads.lock().await.insert(parent, thread_id.clone());
        Ok(thread_id)
    }
}

#[async_trait]
impl TargetPort for DiscordTarget {
    fn capabilities(&self) -> TargetCapabilities {
        TargetCapabilities {
            supports_threads: true,
            supports_markdown: true,
            max_message_len: MESSAGE_LIMIT,
        }
    }

    async fn ensure_channel(&self, name: &str, description: &str) -> Result<TargetChannel> {
        let name = wire::channel_name(name);
        let mut cache = self.channels.lock().await;
        if cache.is_none() {
            *cache = Some(self.list_channels().await?);
        }
        let known = cache.get_or_insert_with(HashMap::new);

        if let Some(existing) = known.get(&name) {
            return Ok(existing.clone());
        }

        let body = CreateChannel {
            name: &name,
            kind: CHANNEL_TYPE_TEXT,
            topic: wire::topic(description),
        };
        let created: ChannelObject = self
            .post(&format!("/guilds/{}/channels", self.guild_id), &body)
            .await?;
        tracing::info!(channel = %name, id = %created.id, "discord channel created");

        let channel = TargetChannel {
            id: TargetChannelId(created.id),
            name: name.clone(),
            created: true,
        };
        // Later lookups in this process reuse it rather than create a duplicate.
        known.insert(
            name,
            TargetChannel {
                created: false,
                ..channel.clone()
            },
        );
        Ok(channel)
    }

    async fn send_message(
        &self,
        channel: &TargetChannel,
        message: &OutgoingMessage,
    ) -> Result<TargetMessageId> {
        let destination = match &message.reply_to {
            Some(anchor) => self.thread_for(channel, anchor).await?,
            None => channel.id.0.clone(),
        };
        let sent: MessageObject = self
            .post(
                &format!("/channels/{destination}/messages"),
                &CreateMessage::silent(&message.content),
            )
            .await?;
        Ok(TargetMessageId(sent.id))
    }
}
