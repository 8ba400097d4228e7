//! End-to-end aggregation tests.
//!
//! Exercises the full analyze pipeline through the public API with a scripted
//! transport and provider: batching, first-batch seeding, entity union,
//! provenance, ranking, cache freshness and the terminal error paths. No
//! network, no sleeps; the clock is manual.

use async_trait::async_trait;
use chanlens::analyzer::{AnalysisError, Analyzer, ChannelRef, ManualClock};
use chanlens::providers::{CompletionProvider, GenerationParams};
use chanlens::summarizer::{BatchSummarizer, Importance};
use chanlens::transport::{
    ChatTransport, GuildChannels, HistoryMessage, OutgoingMessage, ThreadInfo, TransportError,
};
use chrono::{Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};

// ─────────────────────────────────────────────────────────────────────────────
// Mock infrastructure
// ─────────────────────────────────────────────────────────────────────────────

/// Transport with a fixed newest-first history and scripted thread listings.
struct ScriptedTransport {
    /// Newest-first, as the platform returns it.
    history: Vec<HistoryMessage>,
    threads: Vec<ThreadInfo>,
    fail_history: Option<fn() -> TransportError>,
}

impl ScriptedTransport {
    fn with_history(history: Vec<HistoryMessage>) -> Self {
        Self {
            history,
            threads: Vec::new(),
            fail_history: None,
        }
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn guild_channels(&self, _guild_id: &str) -> Result<GuildChannels, TransportError> {
        Ok(GuildChannels::default())
    }

    async fn history_page(
        &self,
        _channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, TransportError> {
        if let Some(make_err) = self.fail_history {
            return Err(make_err());
        }
        let start = match before {
            None => 0,
            Some(cursor) => self
                .history
                .iter()
                .position(|m| m.id == cursor)
                .map_or(self.history.len(), |i| i + 1),
        };
        Ok(self
            .history
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn channel_threads(&self, _channel_id: &str) -> Result<Vec<ThreadInfo>, TransportError> {
        Ok(self.threads.clone())
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
        Ok("m1".into())
    }

    async fn edit_message(
        &self,
        _channel_id: &str,
        _message_id: &str,
        _message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Provider that returns scripted responses in FIFO order and records every
/// prompt it was asked.
struct ScriptedProvider {
    responses: Mutex<Vec<String>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<&str>) -> (Self, Arc<Mutex<Vec<String>>>) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                responses: Mutex::new(responses.iter().map(ToString::to_string).collect()),
                prompts: prompts.clone(),
            },
            prompts,
        )
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, prompt: &str, _params: &GenerationParams) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            anyhow::bail!("script exhausted")
        }
        Ok(responses.remove(0))
    }
}

fn message(id: u64, author: &str, content: &str) -> HistoryMessage {
    HistoryMessage {
        id: id.to_string(),
        author_name: author.into(),
        author_is_bot: false,
        content: content.into(),
        timestamp: Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
        permalink: format!("https://discord.com/channels/g1/c1/{id}"),
    }
}

/// Newest-first history of `count` human messages.
fn history(count: u64) -> Vec<HistoryMessage> {
    (1..=count)
        .rev()
        .map(|i| message(i, &format!("user{}", i % 7), "something happened here"))
        .collect()
}

fn params() -> GenerationParams {
    GenerationParams {
        model: "gpt-4o-mini".into(),
        max_tokens: 800,
        temperature: 0.5,
    }
}

fn build_analyzer(
    transport: ScriptedTransport,
    provider: ScriptedProvider,
) -> (Analyzer, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.timestamp_opt(1_700_100_000, 0).unwrap(),
    ));
    let summarizer = BatchSummarizer::new(Arc::new(provider), params(), 20);
    let analyzer = Analyzer::new(Arc::new(transport), summarizer, 30, 2000, clock.clone());
    (analyzer, clock)
}

fn channel() -> ChannelRef {
    ChannelRef {
        id: "c1".into(),
        name: "harbor".into(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Batching and first-batch seeding
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn hundred_twenty_messages_run_three_batches_and_first_batch_seeds_report() {
    let (provider, prompts) = ScriptedProvider::new(vec![
        r#"{"summary": "the harbor roleplay hub", "themes": ["smuggling", "smuggling"],
            "channel_purpose": "roleplay", "world_elements": [], "events": []}"#,
        r#"{"summary": "something else entirely", "channel_purpose": "social", "events": []}"#,
        r#"{"summary": "third opinion", "channel_purpose": "battle", "events": []}"#,
    ]);
    let (analyzer, _clock) = build_analyzer(ScriptedTransport::with_history(history(120)), provider);

    let report = analyzer.analyze(&channel(), None).await.unwrap();

    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 3, "120 messages at batch size 50 = 3 calls");
    assert!(prompts[0].contains("part 1/3"));
    assert!(prompts[2].contains("part 3/3"));

    // Later batches never overwrite the first batch's channel-level fields.
    assert_eq!(report.summary, "the harbor roleplay hub");
    assert_eq!(
        report.purpose,
        Some(chanlens::summarizer::ChannelPurpose::Roleplay)
    );
    assert_eq!(report.themes, vec!["smuggling"], "themes are deduplicated");
    assert_eq!(report.analyzed_count, 120);
    assert_eq!(report.total_scanned, 120);
}

#[tokio::test]
async fn entity_sets_union_across_batches() {
    let (provider, _prompts) = ScriptedProvider::new(vec![
        r#"{"summary": "s", "world_elements": ["Puerto Bendito"], "events": []}"#,
        r#"{"summary": "", "world_elements": ["Puerto Bendito", "Runa"], "events": []}"#,
        r#"{"summary": "", "world_elements": [], "events": []}"#,
    ]);
    let (analyzer, _clock) = build_analyzer(ScriptedTransport::with_history(history(120)), provider);

    let report = analyzer.analyze(&channel(), None).await.unwrap();
    assert_eq!(report.world_elements, vec!["Puerto Bendito", "Runa"]);
    assert_eq!(report.world_elements.len(), 2);
}

#[tokio::test]
async fn oldest_and_newest_links_bracket_the_history() {
    let (provider, _prompts) =
        ScriptedProvider::new(vec![r#"{"summary": "s", "events": []}"#]);
    let (analyzer, _clock) = build_analyzer(ScriptedTransport::with_history(history(10)), provider);

    let report = analyzer.analyze(&channel(), None).await.unwrap();
    assert_eq!(
        report.oldest_link.as_deref(),
        Some("https://discord.com/channels/g1/c1/1")
    );
    assert_eq!(
        report.newest_link.as_deref(),
        Some("https://discord.com/channels/g1/c1/10")
    );
    assert_eq!(report.unique_authors, 7);
}

// ─────────────────────────────────────────────────────────────────────────────
// Events: provenance, ranking, cap
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn events_gain_provenance_from_participant_author_match() {
    let transport = ScriptedTransport::with_history(vec![
        message(3, "charlie", "later message"),
        message(2, "alice", "the duel starts"),
        message(1, "bob", "first message"),
    ]);
    let (provider, _prompts) = ScriptedProvider::new(vec![
        r#"{"summary": "s", "events": [
            {"type": "conflict", "description": "duel at the docks",
             "participants": ["alice"], "importance": "high"},
            {"type": "other", "description": "unattributed rumor",
             "participants": ["nobody-here"], "importance": "low"}
        ]}"#,
    ]);
    let (analyzer, _clock) = build_analyzer(transport, provider);

    let report = analyzer.analyze(&channel(), None).await.unwrap();
    assert_eq!(report.events.len(), 2);
    assert_eq!(
        report.events[0].permalink.as_deref(),
        Some("https://discord.com/channels/g1/c1/2")
    );
    assert!(report.events[1].permalink.is_none());
}

#[tokio::test]
async fn event_list_is_ranked_high_first_and_capped_at_fifteen() {
    // One batch returning 20 events: 18 medium, then 2 high at the tail.
    let mut events = Vec::new();
    for i in 0..18 {
        events.push(format!(
            r#"{{"type": "other", "description": "medium {i}", "participants": [], "importance": "medium"}}"#
        ));
    }
    events.push(r#"{"type": "conflict", "description": "big one", "participants": [], "importance": "high"}"#.to_string());
    events.push(r#"{"type": "conflict", "description": "bigger one", "participants": [], "importance": "high"}"#.to_string());
    let response = format!(r#"{{"summary": "s", "events": [{}]}}"#, events.join(","));

    let (provider, _prompts) = ScriptedProvider::new(vec![response.as_str()]);
    let (analyzer, _clock) = build_analyzer(ScriptedTransport::with_history(history(10)), provider);

    let report = analyzer.analyze(&channel(), None).await.unwrap();
    assert_eq!(report.event_count, 20);
    assert_eq!(report.events.len(), 15);
    assert_eq!(report.events[0].description, "big one");
    assert_eq!(report.events[1].description, "bigger one");
    assert_eq!(report.events[0].importance, Importance::High);
    assert!(report.events[2..]
        .iter()
        .all(|e| e.importance != Importance::High));
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache policy
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cache_reuses_fresh_reports_and_recomputes_stale_ones() {
    let (provider, prompts) = ScriptedProvider::new(vec![
        r#"{"summary": "first run", "events": []}"#,
        r#"{"summary": "second run", "events": []}"#,
    ]);
    let (analyzer, clock) = build_analyzer(ScriptedTransport::with_history(history(10)), provider);

    let first = analyzer.analyze(&channel(), None).await.unwrap();
    clock.advance(Duration::minutes(29));
    let second = analyzer.analyze(&channel(), None).await.unwrap();
    assert_eq!(first.analyzed_at, second.analyzed_at, "fresh report reused");
    assert_eq!(second.summary, "first run");
    assert_eq!(prompts.lock().unwrap().len(), 1, "no second model call");

    clock.advance(Duration::minutes(2));
    let third = analyzer.analyze(&channel(), None).await.unwrap();
    assert_ne!(first.analyzed_at, third.analyzed_at, "stale report recomputed");
    assert_eq!(third.summary, "second run");
}

#[tokio::test]
async fn invalidate_forces_recompute_regardless_of_age() {
    let (provider, prompts) = ScriptedProvider::new(vec![
        r#"{"summary": "first run", "events": []}"#,
        r#"{"summary": "second run", "events": []}"#,
    ]);
    let (analyzer, _clock) = build_analyzer(ScriptedTransport::with_history(history(10)), provider);

    let first = analyzer.analyze(&channel(), None).await.unwrap();
    analyzer.invalidate(&first.channel_id);
    let second = analyzer.analyze(&channel(), None).await.unwrap();
    assert_eq!(second.summary, "second run");
    assert_eq!(prompts.lock().unwrap().len(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Terminal errors
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_channel_error_carries_scanned_count() {
    // Nothing qualifies: every message is a short bot notice.
    let history: Vec<HistoryMessage> = (1..=25)
        .rev()
        .map(|i| {
            let mut m = message(i, "statusbot", "ok");
            m.author_is_bot = true;
            m
        })
        .collect();
    let (provider, prompts) = ScriptedProvider::new(vec![]);
    let (analyzer, _clock) = build_analyzer(ScriptedTransport::with_history(history), provider);

    let err = analyzer.analyze(&channel(), None).await.unwrap_err();
    match &err {
        AnalysisError::EmptyChannel { scanned, .. } => assert_eq!(*scanned, 25),
        other => panic!("expected EmptyChannel, got {other:?}"),
    }
    assert!(err.to_string().contains("25 messages scanned"));
    assert!(prompts.lock().unwrap().is_empty(), "no model calls made");
}

#[tokio::test]
async fn permission_denied_surfaces_as_readable_error() {
    let transport = ScriptedTransport {
        history: Vec::new(),
        threads: Vec::new(),
        fail_history: Some(|| TransportError::PermissionDenied),
    };
    let (provider, _prompts) = ScriptedProvider::new(vec![]);
    let (analyzer, _clock) = build_analyzer(transport, provider);

    let err = analyzer.analyze(&channel(), None).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Permission { .. }));
    assert!(err.to_string().contains("permission"));
    assert!(err.to_string().contains("harbor"));
}

#[tokio::test]
async fn transport_fault_keeps_underlying_reason() {
    let transport = ScriptedTransport {
        history: Vec::new(),
        threads: Vec::new(),
        fail_history: Some(|| TransportError::Api {
            context: "message history",
            status: 502,
            body: "bad gateway".into(),
        }),
    };
    let (provider, _prompts) = ScriptedProvider::new(vec![]);
    let (analyzer, _clock) = build_analyzer(transport, provider);

    let err = analyzer.analyze(&channel(), None).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Collection { .. }));
    assert!(err.to_string().contains("bad gateway"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Degradation inside a run
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn bad_batches_degrade_without_aborting_the_run() {
    // Batch 1 parses, batch 2 is garbage, batch 3 parses. The run completes
    // and keeps the good batches' events plus the fallback artifact.
    let (provider, _prompts) = ScriptedProvider::new(vec![
        r#"{"summary": "seeded", "events": [
            {"type": "roleplay", "description": "opening scene", "participants": [], "importance": "high"}
        ]}"#,
        "model had a bad day",
        r#"{"summary": "", "events": [
            {"type": "roleplay", "description": "closing scene", "participants": [], "importance": "low"}
        ]}"#,
    ]);
    let (analyzer, _clock) = build_analyzer(ScriptedTransport::with_history(history(120)), provider);

    let report = analyzer.analyze(&channel(), None).await.unwrap();
    assert_eq!(report.summary, "seeded");
    assert_eq!(report.event_count, 3);
    let descriptions: Vec<&str> = report.events.iter().map(|e| e.description.as_str()).collect();
    assert!(descriptions.contains(&"opening scene"));
    assert!(descriptions.contains(&"closing scene"));
    assert!(descriptions.contains(&"General channel activity"));
}

#[tokio::test]
async fn related_threads_land_on_the_report() {
    let mut transport = ScriptedTransport::with_history(history(10));
    transport.threads = vec![ThreadInfo {
        id: "t1".into(),
        name: "market day".into(),
        message_count: 12,
        archived: false,
        archived_at: None,
    }];
    let (provider, _prompts) =
        ScriptedProvider::new(vec![r#"{"summary": "s", "events": []}"#]);
    let (analyzer, _clock) = build_analyzer(transport, provider);

    let report = analyzer.analyze(&channel(), None).await.unwrap();
    assert_eq!(report.related.total(), 1);
    assert_eq!(report.related.threads[0].name, "market day");
}
