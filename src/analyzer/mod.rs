//! Analysis aggregation.
//!
//! The [`Analyzer`] owns the full pipeline for one channel: cache check,
//! history collection, sequential batch summarization, merging, ranking,
//! related-content detection and cache storage. Batches run strictly in
//! order; only the first batch seeds the report-level summary, purpose and
//! themes.

pub mod cache;
pub mod report;

pub use cache::{Clock, ManualClock, ReportCache, SystemClock};
pub use report::{rank_events, AnalysisReport, EVENT_CAP};

use crate::collector::{self, CollectError, CollectProgress, CollectedMessage};
use crate::related;
use crate::summarizer::{BatchSummarizer, EventCandidate};
use crate::transport::ChatTransport;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Messages per language-model batch.
pub const BATCH_SIZE: usize = 50;

/// Terminal analysis failures. Everything here reaches the user as a readable
/// message; per-batch summarization faults never do (they degrade in place).
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("I don't have permission to read #{channel}.")]
    Permission { channel: String },
    #[error("Reading #{channel} failed: {reason}")]
    Collection { channel: String, reason: String },
    #[error("No analyzable messages found in #{channel} ({scanned} messages scanned).")]
    EmptyChannel { channel: String, scanned: u64 },
}

/// Advisory phase notifications for status-message updates.
#[derive(Debug, Clone, Copy)]
pub enum AnalysisProgress {
    Collecting { scanned: u64, kept: usize },
    Summarizing { batch: usize, total: usize },
}

/// The channel under analysis. Threads selected from a report's drill-in
/// control come through here too, so this is deliberately lighter than a
/// directory record.
#[derive(Debug, Clone)]
pub struct ChannelRef {
    pub id: String,
    pub name: String,
}

pub struct Analyzer {
    transport: Arc<dyn ChatTransport>,
    summarizer: BatchSummarizer,
    cache: ReportCache,
    clock: Arc<dyn Clock>,
    max_messages: usize,
}

impl Analyzer {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        summarizer: BatchSummarizer,
        cache_ttl_minutes: i64,
        max_messages: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            summarizer,
            cache: ReportCache::new(cache_ttl_minutes, clock.clone()),
            clock,
            max_messages,
        }
    }

    /// Analyze a channel, reusing a cached report when it is still fresh.
    pub async fn analyze(
        &self,
        channel: &ChannelRef,
        progress: Option<mpsc::Sender<AnalysisProgress>>,
    ) -> Result<AnalysisReport, AnalysisError> {
        if let Some(report) = self.cache.fresh(&channel.id) {
            tracing::debug!("cache hit for #{}", channel.name);
            return Ok(report);
        }

        tracing::info!("analyzing #{}", channel.name);

        let collect_progress = progress.as_ref().map(|outer| {
            let outer = outer.clone();
            let (tx, mut rx) = mpsc::channel::<CollectProgress>(32);
            tokio::spawn(async move {
                while let Some(update) = rx.recv().await {
                    let _ = outer.try_send(AnalysisProgress::Collecting {
                        scanned: update.scanned,
                        kept: update.kept,
                    });
                }
            });
            tx
        });

        let collection = collector::collect(
            self.transport.as_ref(),
            &channel.id,
            self.max_messages,
            collect_progress.as_ref(),
        )
        .await
        .map_err(|err| match err {
            CollectError::Permission => AnalysisError::Permission {
                channel: channel.name.clone(),
            },
            CollectError::Transport(reason) => AnalysisError::Collection {
                channel: channel.name.clone(),
                reason,
            },
        })?;

        if collection.messages.is_empty() {
            return Err(AnalysisError::EmptyChannel {
                channel: channel.name.clone(),
                scanned: collection.total_scanned,
            });
        }

        let batches: Vec<&[CollectedMessage]> = collection.messages.chunks(BATCH_SIZE).collect();
        let batch_count = batches.len();

        let mut events: Vec<EventCandidate> = Vec::new();
        let mut summary = String::new();
        let mut purpose = None;
        let mut themes: Vec<String> = Vec::new();
        let mut world_elements: Vec<String> = Vec::new();
        let mut seen_elements: HashSet<String> = HashSet::new();

        for (index, batch) in batches.into_iter().enumerate() {
            if let Some(tx) = &progress {
                let _ = tx.try_send(AnalysisProgress::Summarizing {
                    batch: index + 1,
                    total: batch_count,
                });
            }

            let findings = self
                .summarizer
                .summarize_batch(batch, &channel.name, index + 1, batch_count)
                .await;

            events.extend(attach_provenance(findings.events, batch));

            for element in findings.world_elements {
                if seen_elements.insert(element.clone()) {
                    world_elements.push(element);
                }
            }

            // Only the first batch sees the channel's opening and gets asked
            // for the channel-level fields.
            if index == 0 {
                summary = findings.summary;
                purpose = findings.purpose;
                themes = dedup_preserving_order(findings.themes);
            }
        }

        let related = related::detect(self.transport.as_ref(), &channel.id, self.clock.now()).await;

        let unique_authors = collection
            .messages
            .iter()
            .map(|m| m.author.as_str())
            .collect::<HashSet<&str>>()
            .len();

        let report = AnalysisReport {
            channel_id: channel.id.clone(),
            channel_name: channel.name.clone(),
            total_scanned: collection.total_scanned,
            analyzed_count: collection.messages.len(),
            unique_authors,
            summary,
            purpose,
            themes,
            world_elements,
            event_count: events.len(),
            events: rank_events(events, EVENT_CAP),
            related,
            analyzed_at: self.clock.now(),
            oldest_link: collection.messages.first().map(|m| m.permalink.clone()),
            newest_link: collection.messages.last().map(|m| m.permalink.clone()),
        };

        self.cache.store(report.clone());
        tracing::info!(
            "analysis of #{} done: {} messages, {} events",
            channel.name,
            report.analyzed_count,
            report.event_count
        );
        Ok(report)
    }

    /// Drop a channel's cached report so the next analysis recomputes.
    pub fn invalidate(&self, channel_id: &str) {
        self.cache.invalidate(channel_id);
    }
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Attach provenance to batch events: the first message (in batch order)
/// whose author name contains any participant name as a substring donates its
/// permalink and timestamp. Unmatched events keep no provenance.
///
/// Known limitation: when one user's name is a substring of another's, an
/// event can be attributed to the wrong author's message.
fn attach_provenance(
    events: Vec<EventCandidate>,
    batch: &[CollectedMessage],
) -> Vec<EventCandidate> {
    events
        .into_iter()
        .map(|mut event| {
            let hit = batch.iter().find(|message| {
                event
                    .participants
                    .iter()
                    .any(|participant| message.author.contains(participant.as_str()))
            });
            if let Some(message) = hit {
                event.permalink = Some(message.permalink.clone());
                event.timestamp = Some(message.timestamp);
            }
            event
        })
        .collect()
}
