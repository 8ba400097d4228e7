//! The aggregate analysis report.

use crate::related::RelatedContent;
use crate::summarizer::{ChannelPurpose, EventCandidate, Importance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reports carry at most this many events, ranked high-importance first.
pub const EVENT_CAP: usize = 15;

/// One full analysis of a channel. Built once per run, replaced as a whole in
/// the cache, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub channel_id: String,
    pub channel_name: String,
    /// Every message traversed during collection, kept or not.
    pub total_scanned: u64,
    /// Messages that survived filtering and fed the batches.
    pub analyzed_count: usize,
    pub unique_authors: usize,
    pub summary: String,
    pub purpose: Option<ChannelPurpose>,
    pub themes: Vec<String>,
    pub world_elements: Vec<String>,
    /// Events detected across all batches, before the cap.
    pub event_count: usize,
    /// Ranked and capped event list, length <= [`EVENT_CAP`].
    pub events: Vec<EventCandidate>,
    pub related: RelatedContent,
    pub analyzed_at: DateTime<Utc>,
    pub oldest_link: Option<String>,
    pub newest_link: Option<String>,
}

/// Rank events high-importance first and cap the list. The sort is stable, so
/// within a tier the original batch order is preserved.
pub fn rank_events(mut events: Vec<EventCandidate>, cap: usize) -> Vec<EventCandidate> {
    events.sort_by_key(|e| e.importance != Importance::High);
    events.truncate(cap);
    events
}
