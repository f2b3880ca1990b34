//! Slack Web API client

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::rtm;
use super::SlackError;
use crate::config::ChatConfig;
use crate::transport::{BotIdentity, ChannelInfo, ChatEventStream, ChatTransport};

/// Timeout for a single Web API request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Events buffered between the RTM socket and the event loop
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Channels requested per `conversations.list` page
const CHANNEL_PAGE_SIZE: &str = "200";

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    user_id: String,
    user: String,
    #[serde(default)]
    bot_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationsListResponse {
    channels: Vec<ChannelEntry>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct RtmConnectResponse {
    pub url: String,
    #[serde(rename = "self")]
    pub self_: RtmSelf,
}

#[derive(Debug, Deserialize)]
pub(super) struct RtmSelf {
    pub id: String,
}

/// Slack client
#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    api_url: String,
    token: Secret<String>,
    reconnect_interval: Duration,
    max_reconnect_interval: Duration,
}

impl std::fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl SlackClient {
    pub fn new(config: &ChatConfig) -> Result<Self, SlackError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.secret.clone(),
            reconnect_interval: config.reconnect_interval,
            max_reconnect_interval: config.max_reconnect_interval,
        })
    }

    pub(super) fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    pub(super) fn max_reconnect_interval(&self) -> Duration {
        self.max_reconnect_interval
    }

    /// Call a Web API method with form parameters
    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: &[(&str, &str)],
    ) -> Result<T, SlackError> {
        let url = format!("{}/{}", self.api_url, method);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.token.expose_secret())
            .form(params)
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let error = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown_error");
            return Err(SlackError::from_api(method, error));
        }
        Ok(serde_json::from_value(body)?)
    }

    /// Start an RTM session
    pub(super) async fn rtm_connect(&self) -> Result<RtmConnectResponse, SlackError> {
        self.call("rtm.connect", &[]).await
    }
}

#[async_trait]
impl ChatTransport for SlackClient {
    async fn authenticate(&self) -> Result<BotIdentity, SlackError> {
        let response: AuthTestResponse = self.call("auth.test", &[]).await?;
        Ok(BotIdentity {
            user_id: response.user_id,
            user_name: response.user,
            bot_id: response.bot_id,
        })
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, SlackError> {
        let mut channels = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut params = vec![
                ("types", "public_channel,private_channel"),
                ("exclude_archived", "true"),
                ("limit", CHANNEL_PAGE_SIZE),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.as_str()));
            }

            let page: ConversationsListResponse = self.call("conversations.list", &params).await?;
            channels.extend(page.channels.into_iter().map(|c| ChannelInfo {
                id: c.id,
                name: c.name,
            }));

            match page.response_metadata {
                Some(meta) if !meta.next_cursor.is_empty() => cursor = meta.next_cursor,
                _ => break,
            }
        }

        debug!("Slack: {} channels visible", channels.len());
        Ok(channels)
    }

    async fn post_message(&self, channel_id: &str, text: &str) -> Result<(), SlackError> {
        let _: serde_json::Value = self
            .call(
                "chat.postMessage",
                &[("channel", channel_id), ("text", text), ("as_user", "true")],
            )
            .await?;
        Ok(())
    }

    async fn events(&self) -> Result<ChatEventStream, SlackError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(rtm::run(self.clone(), tx));
        Ok(rx)
    }
}
