//! Discord adapter: REST v10 for data, a gateway WebSocket for events.
//!
//! Deliberately thin. Everything the core needs is mapped onto plain REST
//! calls with `serde_json::Value` probing; the gateway loop only identifies,
//! heartbeats and forwards the two event kinds the bot reacts to.

use super::{
    ChannelInfo, ChannelKind, ChatTransport, GatewayEvent, GuildChannels, HistoryMessage,
    OutgoingMessage, ThreadInfo, TransportError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tokio_tungstenite::tungstenite::Message;

const API_BASE: &str = "https://discord.com/api/v10";
const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

// Gateway intents: GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const INTENTS: u64 = 1 | (1 << 9) | (1 << 15);

// Permission bits
const ADMINISTRATOR: u64 = 1 << 3;
const VIEW_CHANNEL: u64 = 1 << 10;
const READ_MESSAGE_HISTORY: u64 = 1 << 16;

// Channel types
const GUILD_TEXT: u64 = 0;
const GUILD_ANNOUNCEMENT: u64 = 5;
const GUILD_FORUM: u64 = 15;

pub struct DiscordTransport {
    bot_token: String,
    client: reqwest::Client,
    /// Filled from READY; needed for interaction-followup webhooks.
    application_id: RwLock<Option<String>>,
    /// Filled from READY; used to detect mentions of ourselves.
    bot_user_id: RwLock<Option<String>>,
    /// channel id -> guild id, learned from scans and lazily from REST.
    guild_of_channel: Mutex<HashMap<String, String>>,
}

/// A permission overwrite on a channel.
#[derive(Debug, Clone)]
struct Overwrite {
    id: String,
    is_member: bool,
    allow: u64,
    deny: u64,
}

fn parse_permission_bits(value: Option<&serde_json::Value>) -> u64 {
    value
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
}

fn parse_overwrites(channel: &serde_json::Value) -> Vec<Overwrite> {
    channel
        .get("permission_overwrites")
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|o| {
                    Some(Overwrite {
                        id: o.get("id")?.as_str()?.to_string(),
                        is_member: o.get("type").and_then(serde_json::Value::as_u64) == Some(1),
                        allow: parse_permission_bits(o.get("allow")),
                        deny: parse_permission_bits(o.get("deny")),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Discord's documented permission algorithm, reduced to what we ask:
/// can this member read the channel and its history?
fn channel_readable(
    base_permissions: u64,
    overwrites: &[Overwrite],
    everyone_role_id: &str,
    member_role_ids: &[String],
    member_id: &str,
) -> bool {
    if base_permissions & ADMINISTRATOR != 0 {
        return true;
    }

    let mut permissions = base_permissions;

    if let Some(everyone) = overwrites
        .iter()
        .find(|o| !o.is_member && o.id == everyone_role_id)
    {
        permissions &= !everyone.deny;
        permissions |= everyone.allow;
    }

    let mut role_allow = 0u64;
    let mut role_deny = 0u64;
    for overwrite in overwrites
        .iter()
        .filter(|o| !o.is_member && member_role_ids.contains(&o.id))
    {
        role_allow |= overwrite.allow;
        role_deny |= overwrite.deny;
    }
    permissions &= !role_deny;
    permissions |= role_allow;

    if let Some(member) = overwrites.iter().find(|o| o.is_member && o.id == member_id) {
        permissions &= !member.deny;
        permissions |= member.allow;
    }

    permissions & VIEW_CHANNEL != 0 && permissions & READ_MESSAGE_HISTORY != 0
}

fn parse_timestamp(value: Option<&serde_json::Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(serde_json::Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn permalink(guild_id: &str, channel_id: &str, message_id: &str) -> String {
    format!("https://discord.com/channels/{guild_id}/{channel_id}/{message_id}")
}

fn parse_history_message(value: &serde_json::Value, guild_id: &str, channel_id: &str) -> Option<HistoryMessage> {
    let id = value.get("id")?.as_str()?.to_string();
    let author = value.get("author")?;
    Some(HistoryMessage {
        permalink: permalink(guild_id, channel_id, &id),
        author_name: author
            .get("username")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        author_is_bot: author
            .get("bot")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
        content: value
            .get("content")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
            .to_string(),
        timestamp: parse_timestamp(value.get("timestamp")).unwrap_or_else(Utc::now),
        id,
    })
}

fn parse_thread(value: &serde_json::Value) -> Option<ThreadInfo> {
    let metadata = value.get("thread_metadata");
    Some(ThreadInfo {
        id: value.get("id")?.as_str()?.to_string(),
        name: value
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unnamed")
            .to_string(),
        message_count: value
            .get("message_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
        archived: metadata
            .and_then(|m| m.get("archived"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
        archived_at: parse_timestamp(metadata.and_then(|m| m.get("archive_timestamp"))),
    })
}

fn outgoing_body(message: &OutgoingMessage) -> serde_json::Value {
    serde_json::json!({
        "content": message.content.clone().unwrap_or_default(),
        "embeds": message.embeds,
        "components": message.components,
    })
}

impl DiscordTransport {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
            application_id: RwLock::new(None),
            bot_user_id: RwLock::new(None),
            guild_of_channel: Mutex::new(HashMap::new()),
        }
    }

    pub fn bot_user_id(&self) -> Option<String> {
        self.bot_user_id.read().clone()
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    async fn check(
        &self,
        context: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(TransportError::PermissionDenied);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Api {
                context,
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json(
        &self,
        context: &'static str,
        url: String,
    ) -> Result<serde_json::Value, TransportError> {
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| TransportError::Other(e.into()))?;
        let response = self.check(context, response).await?;
        response
            .json()
            .await
            .map_err(|e| TransportError::Other(e.into()))
    }

    /// Guild that owns a channel, learned during scans or fetched once.
    async fn guild_for_channel(&self, channel_id: &str) -> Result<String, TransportError> {
        if let Some(guild_id) = self.guild_of_channel.lock().get(channel_id) {
            return Ok(guild_id.clone());
        }
        let channel = self
            .get_json("channel lookup", format!("{API_BASE}/channels/{channel_id}"))
            .await?;
        let guild_id = channel
            .get("guild_id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| TransportError::Other(anyhow::anyhow!("channel has no guild")))?
            .to_string();
        self.guild_of_channel
            .lock()
            .insert(channel_id.to_string(), guild_id.clone());
        Ok(guild_id)
    }

    fn remember_guild(&self, channel_id: &str, guild_id: &str) {
        self.guild_of_channel
            .lock()
            .insert(channel_id.to_string(), guild_id.to_string());
    }

    async fn active_guild_threads(
        &self,
        guild_id: &str,
    ) -> Result<Vec<serde_json::Value>, TransportError> {
        let listing = self
            .get_json(
                "active threads",
                format!("{API_BASE}/guilds/{guild_id}/threads/active"),
            )
            .await?;
        Ok(listing
            .get("threads")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Respond to an interaction. `payload` is the full callback body
    /// (`{"type": ..., "data": ...}`).
    pub async fn respond_interaction(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .post(format!(
                "{API_BASE}/interactions/{interaction_id}/{interaction_token}/callback"
            ))
            .header("Authorization", self.auth_header())
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransportError::Other(e.into()))?;
        self.check("interaction callback", response).await?;
        Ok(())
    }

    /// Edit the original response of an acknowledged interaction. Returns the
    /// id of the edited message.
    pub async fn edit_interaction_response(
        &self,
        interaction_token: &str,
        message: &OutgoingMessage,
    ) -> Result<String, TransportError> {
        let application_id = self.application_id.read().clone().ok_or_else(|| {
            TransportError::Other(anyhow::anyhow!("gateway not ready: no application id"))
        })?;
        let response = self
            .client
            .patch(format!(
                "{API_BASE}/webhooks/{application_id}/{interaction_token}/messages/@original"
            ))
            .header("Authorization", self.auth_header())
            .json(&outgoing_body(message))
            .send()
            .await
            .map_err(|e| TransportError::Other(e.into()))?;
        let response = self.check("interaction edit", response).await?;
        let edited: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransportError::Other(e.into()))?;
        Ok(edited
            .get("id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Connect to the gateway and forward mention and component events until
    /// the receiver goes away. Reconnects with a flat backoff on any drop.
    pub async fn listen(&self, tx: tokio::sync::mpsc::Sender<GatewayEvent>) -> anyhow::Result<()> {
        loop {
            if let Err(err) = self.run_gateway_session(&tx).await {
                tracing::warn!("Discord gateway session ended: {err}");
            }
            if tx.is_closed() {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            tracing::info!("Discord: reconnecting to gateway...");
        }
    }

    async fn run_gateway_session(
        &self,
        tx: &tokio::sync::mpsc::Sender<GatewayEvent>,
    ) -> anyhow::Result<()> {
        tracing::info!("Discord: connecting to gateway...");
        let (ws_stream, _) = tokio_tungstenite::connect_async(GATEWAY_URL).await?;
        let (mut write, mut read) = ws_stream.split();

        // The hello frame carries the heartbeat cadence.
        let hello = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: serde_json::Value = serde_json::from_str(&text)?;
                    if frame.get("op").and_then(serde_json::Value::as_u64) == Some(10) {
                        break frame;
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => anyhow::bail!("gateway handshake failed: {e}"),
                None => anyhow::bail!("gateway closed during handshake"),
            }
        };
        let heartbeat_ms = hello
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(41_250);

        let identify = serde_json::json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                "intents": INTENTS,
                "properties": {"os": "linux", "browser": "chanlens", "device": "chanlens"},
            }
        });
        write.send(Message::Text(identify.to_string().into())).await?;

        let mut heartbeat = tokio::time::interval(std::time::Duration::from_millis(heartbeat_ms));
        heartbeat.tick().await; // first tick fires immediately
        let mut last_seq: Option<u64> = None;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let beat = serde_json::json!({"op": 1, "d": last_seq});
                    write.send(Message::Text(beat.to_string().into())).await?;
                }
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(t))) => t,
                        Some(Ok(Message::Close(_))) | None => anyhow::bail!("gateway closed"),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => anyhow::bail!("gateway read failed: {e}"),
                    };
                    let frame: serde_json::Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(seq) = frame.get("s").and_then(serde_json::Value::as_u64) {
                        last_seq = Some(seq);
                    }
                    match frame.get("op").and_then(serde_json::Value::as_u64) {
                        Some(0) => {
                            if self.handle_dispatch(&frame, tx).await.is_err() {
                                // Receiver dropped; shut the session down.
                                return Ok(());
                            }
                        }
                        Some(1) => {
                            let beat = serde_json::json!({"op": 1, "d": last_seq});
                            write.send(Message::Text(beat.to_string().into())).await?;
                        }
                        Some(7) | Some(9) => anyhow::bail!("gateway requested reconnect"),
                        _ => {}
                    }
                }
            }
        }
    }

    async fn handle_dispatch(
        &self,
        frame: &serde_json::Value,
        tx: &tokio::sync::mpsc::Sender<GatewayEvent>,
    ) -> Result<(), ()> {
        let kind = frame.get("t").and_then(serde_json::Value::as_str).unwrap_or("");
        let Some(data) = frame.get("d") else {
            return Ok(());
        };

        match kind {
            "READY" => {
                if let Some(app_id) = data
                    .get("application")
                    .and_then(|a| a.get("id"))
                    .and_then(serde_json::Value::as_str)
                {
                    *self.application_id.write() = Some(app_id.to_string());
                }
                if let Some(user_id) = data
                    .get("user")
                    .and_then(|u| u.get("id"))
                    .and_then(serde_json::Value::as_str)
                {
                    *self.bot_user_id.write() = Some(user_id.to_string());
                }
                tracing::info!("Discord: gateway ready");
            }
            "MESSAGE_CREATE" => {
                let Some(bot_id) = self.bot_user_id() else {
                    return Ok(());
                };
                let author_is_bot = data
                    .get("author")
                    .and_then(|a| a.get("bot"))
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if author_is_bot {
                    return Ok(());
                }
                let mentioned = data
                    .get("mentions")
                    .and_then(serde_json::Value::as_array)
                    .is_some_and(|mentions| {
                        mentions.iter().any(|m| {
                            m.get("id").and_then(serde_json::Value::as_str) == Some(bot_id.as_str())
                        })
                    });
                if !mentioned {
                    return Ok(());
                }
                let (Some(guild_id), Some(channel_id)) = (
                    data.get("guild_id").and_then(serde_json::Value::as_str),
                    data.get("channel_id").and_then(serde_json::Value::as_str),
                ) else {
                    return Ok(());
                };
                let event = GatewayEvent::Mention {
                    guild_id: guild_id.to_string(),
                    channel_id: channel_id.to_string(),
                    author_name: data
                        .get("author")
                        .and_then(|a| a.get("username"))
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    content: data
                        .get("content")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                };
                tx.send(event).await.map_err(|_| ())?;
            }
            "INTERACTION_CREATE" => {
                // Type 3: message component activation.
                if data.get("type").and_then(serde_json::Value::as_u64) != Some(3) {
                    return Ok(());
                }
                let component = data.get("data");
                let event = GatewayEvent::Component {
                    guild_id: data
                        .get("guild_id")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    channel_id: data
                        .get("channel_id")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    message_id: data
                        .get("message")
                        .and_then(|m| m.get("id"))
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    interaction_id: data
                        .get("id")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    interaction_token: data
                        .get("token")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    custom_id: component
                        .and_then(|c| c.get("custom_id"))
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    values: component
                        .and_then(|c| c.get("values"))
                        .and_then(serde_json::Value::as_array)
                        .map(|values| {
                            values
                                .iter()
                                .filter_map(serde_json::Value::as_str)
                                .map(ToString::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                };
                tx.send(event).await.map_err(|_| ())?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for DiscordTransport {
    async fn guild_channels(&self, guild_id: &str) -> Result<GuildChannels, TransportError> {
        let guild = self
            .get_json("guild", format!("{API_BASE}/guilds/{guild_id}"))
            .await?;
        let member = self
            .get_json(
                "guild member",
                format!("{API_BASE}/users/@me/guilds/{guild_id}/member"),
            )
            .await?;
        let channels = self
            .get_json(
                "guild channels",
                format!("{API_BASE}/guilds/{guild_id}/channels"),
            )
            .await?;

        let member_role_ids: Vec<String> = member
            .get("roles")
            .and_then(serde_json::Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        // Base permissions: @everyone role OR'd with the member's roles.
        // The @everyone role id equals the guild id.
        let mut base_permissions = 0u64;
        if let Some(roles) = guild.get("roles").and_then(serde_json::Value::as_array) {
            for role in roles {
                let role_id = role.get("id").and_then(serde_json::Value::as_str).unwrap_or("");
                if role_id == guild_id || member_role_ids.iter().any(|r| r == role_id) {
                    base_permissions |= parse_permission_bits(role.get("permissions"));
                }
            }
        }

        let bot_id = self.bot_user_id().unwrap_or_default();
        let mut listing = GuildChannels::default();

        if let Some(items) = channels.as_array() {
            for channel in items {
                let Some(id) = channel.get("id").and_then(serde_json::Value::as_str) else {
                    continue;
                };
                let name = channel
                    .get("name")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unnamed")
                    .to_string();
                let channel_type = channel
                    .get("type")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(u64::MAX);

                match channel_type {
                    GUILD_TEXT | GUILD_ANNOUNCEMENT => {
                        let overwrites = parse_overwrites(channel);
                        if channel_readable(
                            base_permissions,
                            &overwrites,
                            guild_id,
                            &member_role_ids,
                            &bot_id,
                        ) {
                            self.remember_guild(id, guild_id);
                            listing.text.push(ChannelInfo {
                                id: id.to_string(),
                                name,
                                kind: ChannelKind::Text,
                            });
                        }
                    }
                    GUILD_FORUM => {
                        self.remember_guild(id, guild_id);
                        listing.forums.push(ChannelInfo {
                            id: id.to_string(),
                            name,
                            kind: ChannelKind::Forum,
                        });
                    }
                    _ => {}
                }
            }
        }

        for thread_value in self.active_guild_threads(guild_id).await? {
            if let Some(thread) = parse_thread(&thread_value) {
                self.remember_guild(&thread.id, guild_id);
                listing.threads.push(thread);
            }
        }

        Ok(listing)
    }

    async fn history_page(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, TransportError> {
        let guild_id = self.guild_for_channel(channel_id).await?;
        let mut url = format!(
            "{API_BASE}/channels/{channel_id}/messages?limit={}",
            limit.min(100)
        );
        if let Some(cursor) = before {
            url.push_str(&format!("&before={cursor}"));
        }
        let page = self.get_json("message history", url).await?;
        Ok(page
            .as_array()
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| parse_history_message(m, &guild_id, channel_id))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn channel_threads(&self, channel_id: &str) -> Result<Vec<ThreadInfo>, TransportError> {
        let guild_id = self.guild_for_channel(channel_id).await?;
        let threads = self.active_guild_threads(&guild_id).await?;
        Ok(threads
            .iter()
            .filter(|t| {
                t.get("parent_id").and_then(serde_json::Value::as_str) == Some(channel_id)
            })
            .filter_map(parse_thread)
            .collect())
    }

    async fn archived_threads(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<ThreadInfo>, TransportError> {
        let listing = self
            .get_json(
                "archived threads",
                format!("{API_BASE}/channels/{channel_id}/threads/archived/public?limit={limit}"),
            )
            .await?;
        Ok(listing
            .get("threads")
            .and_then(serde_json::Value::as_array)
            .map(|threads| threads.iter().filter_map(parse_thread).collect())
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutgoingMessage,
    ) -> Result<String, TransportError> {
        let response = self
            .client
            .post(format!("{API_BASE}/channels/{channel_id}/messages"))
            .header("Authorization", self.auth_header())
            .json(&outgoing_body(message))
            .send()
            .await
            .map_err(|e| TransportError::Other(e.into()))?;
        let response = self.check("message send", response).await?;
        let created: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransportError::Other(e.into()))?;
        Ok(created
            .get("id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .patch(format!(
                "{API_BASE}/channels/{channel_id}/messages/{message_id}"
            ))
            .header("Authorization", self.auth_header())
            .json(&outgoing_body(message))
            .send()
            .await
            .map_err(|e| TransportError::Other(e.into()))?;
        self.check("message edit", response).await?;
        Ok(())
    }
}
