//! Chat-transport boundary.
//!
//! Everything the analysis core needs from the hosting chat platform is
//! expressed through [`ChatTransport`]; the Discord adapter in
//! [`discord`] is the only implementation that talks to a real network.
//! Tests implement the trait with scripted fixtures instead.

pub mod discord;

pub use discord::DiscordTransport;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Faults a transport call can surface to the core.
///
/// `PermissionDenied` is the one variant callers branch on (it becomes a
/// terminal, user-visible analysis error); everything else is carried as
/// context for a generic transport failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("missing read access")]
    PermissionDenied,
    #[error("{context} failed ({status}): {body}")]
    Api {
        context: &'static str,
        status: u16,
        body: String,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Forum,
    Thread,
}

impl ChannelKind {
    pub fn label(self) -> &'static str {
        match self {
            ChannelKind::Text => "text",
            ChannelKind::Forum => "forum",
            ChannelKind::Thread => "thread",
        }
    }
}

/// A channel as enumerated during a server scan.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
}

/// A sub-thread of a channel, active or archived.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub id: String,
    pub name: String,
    pub message_count: u64,
    pub archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
}

/// Result of enumerating a guild: readable text channels, forum containers,
/// and currently-active threads, each in the platform's listing order.
#[derive(Debug, Clone, Default)]
pub struct GuildChannels {
    pub text: Vec<ChannelInfo>,
    pub forums: Vec<ChannelInfo>,
    pub threads: Vec<ThreadInfo>,
}

/// One message as returned by a history page, newest-first.
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub id: String,
    pub author_name: String,
    pub author_is_bot: bool,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub permalink: String,
}

/// Outbound message payload: plain content plus pre-rendered embed and
/// component JSON (the presentation layer owns the rendering).
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub embeds: Vec<serde_json::Value>,
    pub components: Vec<serde_json::Value>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn embed(embed: serde_json::Value) -> Self {
        Self {
            embeds: vec![embed],
            ..Self::default()
        }
    }

    pub fn with_components(mut self, components: Vec<serde_json::Value>) -> Self {
        self.components = components;
        self
    }
}

/// Events the gateway pushes at the bot runtime.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// A human mentioned the bot in a guild channel.
    Mention {
        guild_id: String,
        channel_id: String,
        author_name: String,
        content: String,
    },
    /// A component (button or select) on one of our messages was activated.
    Component {
        guild_id: String,
        channel_id: String,
        message_id: String,
        interaction_id: String,
        interaction_token: String,
        custom_id: String,
        values: Vec<String>,
    },
}

/// Operations the core consumes from the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Enumerate readable text channels, forums and active threads of a guild.
    async fn guild_channels(&self, guild_id: &str) -> Result<GuildChannels, TransportError>;

    /// Fetch one page of a channel's history, newest first. `before` is an
    /// exclusive message-id cursor; `limit` is capped by the platform.
    async fn history_page(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, TransportError>;

    /// Currently-active (non-archived) threads of a channel.
    async fn channel_threads(&self, channel_id: &str) -> Result<Vec<ThreadInfo>, TransportError>;

    /// Recently-archived public threads of a channel, newest-archived first.
    async fn archived_threads(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<ThreadInfo>, TransportError>;

    /// Send a message; returns the platform message id.
    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutgoingMessage,
    ) -> Result<String, TransportError>;

    /// Edit a previously-sent message in place.
    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_error_is_terse() {
        let err = TransportError::PermissionDenied;
        assert_eq!(err.to_string(), "missing read access");
    }

    #[test]
    fn api_error_carries_status_and_body() {
        let err = TransportError::Api {
            context: "message history",
            status: 429,
            body: "rate limited".into(),
        };
        let text = err.to_string();
        assert!(text.contains("message history"));
        assert!(text.contains("429"));
        assert!(text.contains("rate limited"));
    }

    #[test]
    fn kind_labels() {
        assert_eq!(ChannelKind::Text.label(), "text");
        assert_eq!(ChannelKind::Forum.label(), "forum");
        assert_eq!(ChannelKind::Thread.label(), "thread");
    }

    #[test]
    fn outgoing_text_has_no_embeds() {
        let msg = OutgoingMessage::text("hello");
        assert_eq!(msg.content.as_deref(), Some("hello"));
        assert!(msg.embeds.is_empty());
        assert!(msg.components.is_empty());
    }

    #[test]
    fn outgoing_embed_with_components() {
        let msg = OutgoingMessage::embed(serde_json::json!({"title": "t"}))
            .with_components(vec![serde_json::json!({"type": 1})]);
        assert!(msg.content.is_none());
        assert_eq!(msg.embeds.len(), 1);
        assert_eq!(msg.components.len(), 1);
    }
}
