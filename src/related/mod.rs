//! Related-content detection.
//!
//! Lists a channel's live sub-threads plus the ones archived within the last
//! month. Strictly best-effort: any transport fault shrinks the result, it
//! never fails an analysis.

use crate::transport::ChatTransport;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Archived threads older than this are no longer "related".
pub const ARCHIVE_WINDOW_DAYS: i64 = 30;
/// How many archived threads to inspect per channel.
const ARCHIVED_SCAN_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedThread {
    pub id: String,
    pub name: String,
    pub message_count: u64,
    pub archived: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelatedContent {
    pub threads: Vec<RelatedThread>,
}

impl RelatedContent {
    pub fn total(&self) -> usize {
        self.threads.len()
    }
}

/// Detect sub-threads related to a channel as of `now`.
pub async fn detect(
    transport: &dyn ChatTransport,
    channel_id: &str,
    now: DateTime<Utc>,
) -> RelatedContent {
    let mut related = RelatedContent::default();

    let active = match transport.channel_threads(channel_id).await {
        Ok(threads) => threads,
        Err(err) => {
            // Plenty of channel kinds have no thread listing at all.
            tracing::debug!("thread listing unavailable for {channel_id}: {err}");
            return related;
        }
    };
    for thread in active.into_iter().filter(|t| !t.archived) {
        related.threads.push(RelatedThread {
            id: thread.id,
            name: thread.name,
            message_count: thread.message_count,
            archived: false,
        });
    }

    match transport.archived_threads(channel_id, ARCHIVED_SCAN_LIMIT).await {
        Ok(archived) => {
            let cutoff = now - Duration::days(ARCHIVE_WINDOW_DAYS);
            for thread in archived {
                let recent = thread.archived_at.is_some_and(|at| at > cutoff);
                if recent {
                    related.threads.push(RelatedThread {
                        id: thread.id,
                        name: format!("{} (archived)", thread.name),
                        message_count: thread.message_count,
                        archived: true,
                    });
                }
            }
        }
        Err(err) => {
            // Active threads already gathered still count.
            tracing::debug!("archived-thread listing failed for {channel_id}: {err}");
        }
    }

    related
}
