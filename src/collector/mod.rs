//! History collection.
//!
//! Walks a channel's history newest-first through the transport's paged API,
//! counts every message it scans, keeps the content-bearing ones (humans, plus
//! bots that wrote something long enough to matter), and hands back the kept
//! slice in chronological order. Collection is the only part of an analysis
//! run that touches the transport per-message, so it also owns the advisory
//! progress side-channel.

use crate::transport::{ChatTransport, TransportError};
use crate::util::truncate_chars;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub const DEFAULT_MAX_MESSAGES: usize = 2000;
/// Hard per-message content cap, in characters.
pub const CONTENT_CAP: usize = 500;
/// Bot messages shorter than this are treated as noise (status spam, dice
/// rolls) and dropped.
const LONG_BOT_MESSAGE: usize = 100;
/// Transport page size. Discord caps history pages at 100.
const PAGE_SIZE: usize = 100;
const PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("missing permission to read message history")]
    Permission,
    #[error("history fetch failed: {0}")]
    Transport(String),
}

impl From<TransportError> for CollectError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::PermissionDenied => CollectError::Permission,
            other => CollectError::Transport(other.to_string()),
        }
    }
}

/// A kept message. Content is non-empty and at most [`CONTENT_CAP`] chars.
#[derive(Debug, Clone)]
pub struct CollectedMessage {
    pub id: String,
    pub author: String,
    pub author_is_bot: bool,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub permalink: String,
}

/// Advisory progress notification, emitted every [`PROGRESS_EVERY`] scanned
/// messages. Dropped silently when the receiver lags.
#[derive(Debug, Clone, Copy)]
pub struct CollectProgress {
    pub scanned: u64,
    pub kept: usize,
}

#[derive(Debug)]
pub struct Collection {
    /// Kept messages in chronological (oldest-first) order.
    pub messages: Vec<CollectedMessage>,
    /// Every message traversed, kept or not.
    pub total_scanned: u64,
}

fn keep(author_is_bot: bool, content: &str) -> bool {
    !content.is_empty() && (!author_is_bot || content.chars().count() > LONG_BOT_MESSAGE)
}

/// Collect up to `max_messages` of a channel's history.
pub async fn collect(
    transport: &dyn ChatTransport,
    channel_id: &str,
    max_messages: usize,
    progress: Option<&tokio::sync::mpsc::Sender<CollectProgress>>,
) -> Result<Collection, CollectError> {
    let mut kept: Vec<CollectedMessage> = Vec::new();
    let mut total_scanned: u64 = 0;
    let mut before: Option<String> = None;

    loop {
        let remaining = max_messages.saturating_sub(total_scanned as usize);
        if remaining == 0 {
            break;
        }
        let page_limit = remaining.min(PAGE_SIZE);
        let page = transport
            .history_page(channel_id, before.as_deref(), page_limit)
            .await?;
        if page.is_empty() {
            break;
        }

        let page_len = page.len();
        // `take` guards against a transport that over-fills a page; the scan
        // bound is exact either way.
        for message in page.into_iter().take(page_limit) {
            total_scanned += 1;
            if keep(message.author_is_bot, &message.content) {
                kept.push(CollectedMessage {
                    id: message.id.clone(),
                    author: message.author_name,
                    author_is_bot: message.author_is_bot,
                    content: truncate_chars(&message.content, CONTENT_CAP),
                    timestamp: message.timestamp,
                    permalink: message.permalink,
                });
            }
            before = Some(message.id);

            if total_scanned % PROGRESS_EVERY == 0 {
                if let Some(tx) = progress {
                    let _ = tx.try_send(CollectProgress {
                        scanned: total_scanned,
                        kept: kept.len(),
                    });
                }
            }
        }

        // A short page means the channel's history is exhausted.
        if page_len < page_limit {
            break;
        }
    }

    kept.reverse();
    Ok(Collection {
        messages: kept,
        total_scanned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{GuildChannels, HistoryMessage, OutgoingMessage, ThreadInfo};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    fn msg(id: u64, author: &str, bot: bool, content: &str) -> HistoryMessage {
        HistoryMessage {
            id: id.to_string(),
            author_name: author.into(),
            author_is_bot: bot,
            content: content.into(),
            timestamp: Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
            permalink: format!("https://discord.com/channels/g/c/{id}"),
        }
    }

    /// Serves pre-cut pages in order, ignoring the cursor.
    struct PagedTransport {
        pages: Mutex<Vec<Vec<HistoryMessage>>>,
        fail_with: Option<fn() -> TransportError>,
    }

    impl PagedTransport {
        fn new(pages: Vec<Vec<HistoryMessage>>) -> Self {
            Self {
                pages: Mutex::new(pages),
                fail_with: None,
            }
        }
    }

    #[async_trait]
    impl ChatTransport for PagedTransport {
        async fn guild_channels(&self, _guild_id: &str) -> Result<GuildChannels, TransportError> {
            unreachable!("not used by the collector")
        }

        async fn history_page(
            &self,
            _channel_id: &str,
            _before: Option<&str>,
            _limit: usize,
        ) -> Result<Vec<HistoryMessage>, TransportError> {
            if let Some(make_err) = self.fail_with {
                return Err(make_err());
            }
            let mut pages = self.pages.lock();
            if pages.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(pages.remove(0))
            }
        }

        async fn channel_threads(
            &self,
            _channel_id: &str,
        ) -> Result<Vec<ThreadInfo>, TransportError> {
            Ok(Vec::new())
        }

        async fn archived_threads(
            &self,
            _channel_id: &str,
            _limit: usize,
        ) -> Result<Vec<ThreadInfo>, TransportError> {
            Ok(Vec::new())
        }

        async fn send_message(
            &self,
            _channel_id: &str,
            _message: &OutgoingMessage,
        ) -> Result<String, TransportError> {
            unreachable!("not used by the collector")
        }

        async fn edit_message(
            &self,
            _channel_id: &str,
            _message_id: &str,
            _message: &OutgoingMessage,
        ) -> Result<(), TransportError> {
            unreachable!("not used by the collector")
        }
    }

    #[tokio::test]
    async fn drops_empty_and_short_bot_messages() {
        let transport = PagedTransport::new(vec![vec![
            msg(3, "alice", false, "hello there"),
            msg(2, "dicebot", true, "rolled a 6"),
            msg(1, "bob", false, ""),
        ]]);
        let out = collect(&transport, "c1", 2000, None).await.unwrap();
        assert_eq!(out.total_scanned, 3);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].author, "alice");
    }

    #[tokio::test]
    async fn keeps_long_bot_messages() {
        let long = "x".repeat(150);
        let transport = PagedTransport::new(vec![vec![msg(1, "lorebot", true, &long)]]);
        let out = collect(&transport, "c1", 2000, None).await.unwrap();
        assert_eq!(out.messages.len(), 1);
        assert!(out.messages[0].author_is_bot);
    }

    #[tokio::test]
    async fn bot_message_at_threshold_is_dropped() {
        let exactly_100 = "y".repeat(100);
        let transport = PagedTransport::new(vec![vec![msg(1, "bot", true, &exactly_100)]]);
        let out = collect(&transport, "c1", 2000, None).await.unwrap();
        assert!(out.messages.is_empty());
        assert_eq!(out.total_scanned, 1);
    }

    #[tokio::test]
    async fn content_is_capped_at_500_chars() {
        let long = "z".repeat(800);
        let transport = PagedTransport::new(vec![vec![msg(1, "alice", false, &long)]]);
        let out = collect(&transport, "c1", 2000, None).await.unwrap();
        assert_eq!(out.messages[0].content.chars().count(), CONTENT_CAP);
    }

    #[tokio::test]
    async fn output_is_chronological() {
        // Transport returns newest-first; collection must reverse.
        let transport = PagedTransport::new(vec![vec![
            msg(30, "a", false, "third"),
            msg(20, "b", false, "second"),
            msg(10, "c", false, "first"),
        ]]);
        let out = collect(&transport, "c1", 2000, None).await.unwrap();
        let contents: Vec<&str> = out.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert!(out
            .messages
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn respects_max_messages_across_pages() {
        let page1: Vec<HistoryMessage> = (100..200)
            .rev()
            .map(|i| msg(i, "a", false, "text"))
            .collect();
        let page2: Vec<HistoryMessage> = (0..100).rev().map(|i| msg(i, "a", false, "text")).collect();
        let transport = PagedTransport::new(vec![page1, page2]);
        let out = collect(&transport, "c1", 150, None).await.unwrap();
        assert_eq!(out.total_scanned, 150);
        assert_eq!(out.messages.len(), 150);
    }

    #[tokio::test]
    async fn permission_denied_maps_to_permission_error() {
        let transport = PagedTransport {
            pages: Mutex::new(Vec::new()),
            fail_with: Some(|| TransportError::PermissionDenied),
        };
        let err = collect(&transport, "c1", 2000, None).await.unwrap_err();
        assert!(matches!(err, CollectError::Permission));
    }

    #[tokio::test]
    async fn transport_fault_preserves_reason() {
        let transport = PagedTransport {
            pages: Mutex::new(Vec::new()),
            fail_with: Some(|| TransportError::Api {
                context: "message history",
                status: 500,
                body: "server exploded".into(),
            }),
        };
        let err = collect(&transport, "c1", 2000, None).await.unwrap_err();
        match err {
            CollectError::Transport(reason) => assert!(reason.contains("server exploded")),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn progress_is_emitted_every_hundred_scanned() {
        let page: Vec<HistoryMessage> = (0..100).rev().map(|i| msg(i, "a", false, "m")).collect();
        let transport = PagedTransport::new(vec![
            page.clone(),
            page.iter()
                .map(|m| HistoryMessage {
                    id: format!("1{}", m.id),
                    ..m.clone()
                })
                .collect(),
        ]);
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let out = collect(&transport, "c1", 2000, Some(&tx)).await.unwrap();
        drop(tx);
        assert_eq!(out.total_scanned, 200);

        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update.scanned);
        }
        assert_eq!(updates, vec![100, 200]);
    }

    #[tokio::test]
    async fn progress_backpressure_does_not_change_output() {
        let page: Vec<HistoryMessage> = (0..100).rev().map(|i| msg(i, "a", false, "m")).collect();
        let transport = PagedTransport::new(vec![page]);
        // Zero-capacity receiver that is never drained: try_send always fails.
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        tx.try_send(CollectProgress { scanned: 0, kept: 0 }).unwrap();
        let out = collect(&transport, "c1", 2000, Some(&tx)).await.unwrap();
        assert_eq!(out.total_scanned, 100);
        assert_eq!(out.messages.len(), 100);
    }
}
