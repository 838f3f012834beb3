//! Socket Mode bridge: receives mentions and direct messages and answers
//! them through the engine.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};
use warden_pagerduty::Engine;

use crate::slack_api_client::SlackApiClient;

const PROCESSED_EVENT_CAP: usize = 512;

#[derive(Clone)]
pub struct SlackBridgeConfig {
    /// Skips `auth.test` when set.
    pub bot_user_id: Option<String>,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SlackSocketEnvelope {
    #[serde(default)]
    pub(crate) envelope_id: Option<String>,
    #[serde(rename = "type")]
    pub(crate) envelope_type: String,
    #[serde(default)]
    pub(crate) payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlackEventKind {
    AppMention,
    DirectMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SlackChatEvent {
    pub(crate) event_id: String,
    pub(crate) kind: SlackEventKind,
    pub(crate) channel_id: String,
    pub(crate) user_id: String,
    pub(crate) text: String,
    pub(crate) ts: String,
    pub(crate) thread_ts: Option<String>,
}

impl SlackChatEvent {
    pub(crate) fn reply_thread_ts(&self) -> Option<&str> {
        match self.kind {
            SlackEventKind::AppMention => self.thread_ts.as_deref().or(Some(self.ts.as_str())),
            SlackEventKind::DirectMessage => self.thread_ts.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SlackEventCallbackEnvelope {
    #[serde(rename = "type")]
    callback_type: String,
    event_id: String,
    event: SlackEventPayload,
}

#[derive(Debug, Deserialize)]
struct SlackEventPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    channel_type: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

pub(crate) fn parse_socket_envelope(message: WsMessage) -> Result<Option<SlackSocketEnvelope>> {
    let text = match message {
        WsMessage::Text(text) => text.to_string(),
        WsMessage::Binary(bytes) => {
            String::from_utf8(bytes.to_vec()).context("invalid utf-8 slack socket payload")?
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_) => {
            return Ok(None)
        }
    };
    let envelope = serde_json::from_str::<SlackSocketEnvelope>(&text)
        .context("failed to parse slack socket envelope")?;
    Ok(Some(envelope))
}

/// Extracts a chat event addressed to the bot; everything else is `None`.
pub(crate) fn normalize_socket_envelope(
    envelope: &SlackSocketEnvelope,
    bot_user_id: &str,
) -> Result<Option<SlackChatEvent>> {
    if envelope.envelope_type != "events_api" {
        return Ok(None);
    }
    let callback = serde_json::from_value::<SlackEventCallbackEnvelope>(envelope.payload.clone())
        .context("failed to decode slack event callback payload")?;
    if callback.callback_type != "event_callback" {
        return Ok(None);
    }

    let event = callback.event;
    if event.bot_id.is_some() || event.subtype.is_some() {
        return Ok(None);
    }
    let user_id = match event.user {
        Some(user) if !user.trim().is_empty() && user != bot_user_id => user,
        _ => return Ok(None),
    };
    let channel_id = match event.channel {
        Some(channel) if !channel.trim().is_empty() => channel,
        _ => return Ok(None),
    };
    let ts = match event.ts {
        Some(ts) if !ts.trim().is_empty() => ts,
        _ => return Ok(None),
    };
    let kind = match event.event_type.as_str() {
        "app_mention" => SlackEventKind::AppMention,
        "message" if event.channel_type.as_deref() == Some("im") || channel_id.starts_with('D') => {
            SlackEventKind::DirectMessage
        }
        _ => return Ok(None),
    };

    Ok(Some(SlackChatEvent {
        event_id: callback.event_id,
        kind,
        channel_id,
        user_id,
        text: event.text.unwrap_or_default(),
        ts,
        thread_ts: event.thread_ts,
    }))
}

/// Command text with the bot's own mention removed.
pub(crate) fn normalize_message_text(event: &SlackChatEvent, bot_user_id: &str) -> String {
    let text = event.text.trim();
    if event.kind != SlackEventKind::AppMention {
        return text.to_string();
    }
    text.replace(&format!("<@{bot_user_id}>"), "")
        .trim()
        .to_string()
}

/// Bounded memory of handled event ids; Slack redelivers unacked envelopes.
#[derive(Debug, Default)]
pub(crate) struct ProcessedEvents {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl ProcessedEvents {
    /// Returns false when `event_id` was already recorded.
    pub(crate) fn record(&mut self, event_id: &str) -> bool {
        if !self.seen.insert(event_id.to_string()) {
            return false;
        }
        self.order.push_back(event_id.to_string());
        while self.order.len() > PROCESSED_EVENT_CAP {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

pub async fn run_slack_bridge(
    engine: Arc<Engine>,
    client: SlackApiClient,
    config: SlackBridgeConfig,
) -> Result<()> {
    let bot_user_id = match config.bot_user_id.as_deref().map(str::trim) {
        Some(user_id) if !user_id.is_empty() => user_id.to_string(),
        _ => client.resolve_bot_user_id().await?,
    };
    let mut bridge = SlackBridge {
        engine,
        client,
        bot_user_id,
        processed: ProcessedEvents::default(),
    };
    bridge.run(config.reconnect_delay).await
}

struct SlackBridge {
    engine: Arc<Engine>,
    client: SlackApiClient,
    bot_user_id: String,
    processed: ProcessedEvents,
}

impl SlackBridge {
    async fn run(&mut self, reconnect_delay: Duration) -> Result<()> {
        loop {
            match self.client.open_socket_connection().await {
                Ok(socket_url) => {
                    info!("slack socket connected");
                    if let Err(error) = self.run_socket_session(&socket_url).await {
                        error!(error = %error, "slack socket session failed");
                    }
                }
                Err(error) => error!(error = %error, "failed to open slack socket connection"),
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("slack bridge shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(reconnect_delay) => {}
            }
        }
    }

    async fn run_socket_session(&mut self, socket_url: &str) -> Result<()> {
        let (stream, _response) = connect_async(socket_url)
            .await
            .context("failed to connect slack socket mode websocket")?;
        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return Ok(()),
                maybe_message = source.next() => {
                    let Some(message_result) = maybe_message else {
                        return Ok(());
                    };
                    let message = message_result.context("failed reading slack websocket message")?;
                    let Some(envelope) = parse_socket_envelope(message)? else {
                        continue;
                    };
                    if let Some(envelope_id) = envelope.envelope_id.as_deref() {
                        ack_envelope(&mut sink, envelope_id).await?;
                    }
                    if envelope.envelope_type == "disconnect" {
                        info!("slack requested socket reconnect");
                        return Ok(());
                    }
                    self.handle_envelope(&envelope);
                }
            }
        }
    }

    fn handle_envelope(&mut self, envelope: &SlackSocketEnvelope) {
        let event = match normalize_socket_envelope(envelope, &self.bot_user_id) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(error) => {
                warn!(error = %error, "ignoring malformed slack event");
                return;
            }
        };
        if !self.processed.record(&event.event_id) {
            debug!(event_id = %event.event_id, "skipping duplicate slack event");
            return;
        }

        let text = normalize_message_text(&event, &self.bot_user_id);
        let engine = Arc::clone(&self.engine);
        let client = self.client.clone();
        tokio::spawn(async move {
            let Some(reply) = engine.handle_message(&event.user_id, &text).await else {
                return;
            };
            if let Err(error) = client
                .post_message(&event.channel_id, &reply, event.reply_thread_ts())
                .await
            {
                error!(channel = %event.channel_id, error = %error, "failed to post slack reply");
            }
        });
    }
}

async fn ack_envelope<S>(sink: &mut S, envelope_id: &str) -> Result<()>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let ack = json!({ "envelope_id": envelope_id }).to_string();
    sink.send(WsMessage::Text(ack.into()))
        .await
        .context("failed to send slack socket ack")
}
