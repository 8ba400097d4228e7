//! Batch summarization.
//!
//! One batch of chronological messages goes out to the language-model service
//! with a structured-extraction prompt; one [`PartialFindings`] comes back, no
//! matter what the service did. Timeouts, transport faults and non-JSON output
//! all degrade into safe partial results here so one bad batch can never abort
//! an analysis run.

use crate::collector::CollectedMessage;
use crate::providers::{CompletionProvider, GenerationParams};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// At most this many messages of a batch are rendered into the prompt.
const PROMPT_MESSAGE_CAP: usize = 40;
/// Fallback events name at most this many participants.
const FALLBACK_PARTICIPANT_CAP: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    Medium,
    Low,
}

impl Importance {
    /// Lenient parse of the model's importance tag. Anything unrecognized is
    /// treated as low so junk values never outrank real findings.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "high" => Importance::High,
            "medium" => Importance::Medium,
            _ => Importance::Low,
        }
    }
}

/// Channel-purpose classification, a fixed vocabulary plus `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPurpose {
    Roleplay,
    Information,
    Social,
    Rules,
    Market,
    Battle,
    Other,
}

impl ChannelPurpose {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "roleplay" => ChannelPurpose::Roleplay,
            "information" => ChannelPurpose::Information,
            "social" => ChannelPurpose::Social,
            "rules" => ChannelPurpose::Rules,
            "market" => ChannelPurpose::Market,
            "battle" => ChannelPurpose::Battle,
            _ => ChannelPurpose::Other,
        }
    }
}

impl fmt::Display for ChannelPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelPurpose::Roleplay => "roleplay",
            ChannelPurpose::Information => "information",
            ChannelPurpose::Social => "social",
            ChannelPurpose::Rules => "rules",
            ChannelPurpose::Market => "market",
            ChannelPurpose::Battle => "battle",
            ChannelPurpose::Other => "other",
        };
        f.write_str(label)
    }
}

/// A discrete occurrence the model detected in one batch. Provenance fields
/// are attached later by the aggregator, never by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCandidate {
    pub kind: String,
    pub description: String,
    pub participants: Vec<String>,
    pub importance: Importance,
    #[serde(default)]
    pub lore_elements: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub quote: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

/// Structured extraction from a single batch.
///
/// Summary and purpose only carry meaning on the first batch of a run; entity
/// sets are unioned across batches by the aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialFindings {
    pub summary: String,
    pub themes: Vec<String>,
    pub purpose: Option<ChannelPurpose>,
    pub world_elements: Vec<String>,
    pub events: Vec<EventCandidate>,
}

/// Why one batch request produced no usable findings. Every variant is
/// recovered locally into a degraded [`PartialFindings`].
#[derive(Debug, Error)]
pub enum SummarizationFault {
    #[error("model call timed out")]
    Timeout,
    #[error("model returned non-JSON output: {0}")]
    Malformed(String),
    #[error("model call failed: {0}")]
    Service(String),
}

/// Per-batch language-model caller. The only component that talks to the
/// completion service.
pub struct BatchSummarizer {
    provider: Arc<dyn CompletionProvider>,
    params: GenerationParams,
    overall_timeout: std::time::Duration,
}

impl BatchSummarizer {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        params: GenerationParams,
        overall_timeout_secs: u64,
    ) -> Self {
        Self {
            provider,
            params,
            overall_timeout: std::time::Duration::from_secs(overall_timeout_secs),
        }
    }

    /// Summarize one batch. Never fails: faults degrade into placeholder
    /// findings so the batch loop keeps moving.
    pub async fn summarize_batch(
        &self,
        batch: &[CollectedMessage],
        channel_name: &str,
        batch_index: usize,
        batch_count: usize,
    ) -> PartialFindings {
        match self
            .request_findings(batch, channel_name, batch_index, batch_count)
            .await
        {
            Ok(findings) => findings,
            Err(SummarizationFault::Timeout) => {
                tracing::warn!("summarization timed out for #{channel_name} batch {batch_index}/{batch_count}");
                timeout_findings(channel_name)
            }
            Err(SummarizationFault::Malformed(raw)) => {
                tracing::warn!(
                    "unparseable model output for #{channel_name} batch {batch_index}/{batch_count}: {}",
                    crate::util::truncate_with_ellipsis(&raw, 120)
                );
                fallback_findings(channel_name, batch)
            }
            Err(SummarizationFault::Service(reason)) => {
                tracing::warn!("model call failed for #{channel_name} batch {batch_index}/{batch_count}: {reason}");
                PartialFindings::default()
            }
        }
    }

    async fn request_findings(
        &self,
        batch: &[CollectedMessage],
        channel_name: &str,
        batch_index: usize,
        batch_count: usize,
    ) -> Result<PartialFindings, SummarizationFault> {
        let prompt = build_prompt(batch, channel_name, batch_index, batch_count);

        let raw = tokio::time::timeout(self.overall_timeout, self.provider.complete(&prompt, &self.params))
            .await
            .map_err(|_| SummarizationFault::Timeout)?
            .map_err(|err| SummarizationFault::Service(err.to_string()))?;

        parse_findings(&raw).ok_or(SummarizationFault::Malformed(raw))
    }
}

/// Messages rendered into the prompt: non-bot authors preferred, but a batch
/// that is all bots is kept whole rather than sent empty.
fn prompt_messages(batch: &[CollectedMessage]) -> Vec<&CollectedMessage> {
    let humans: Vec<&CollectedMessage> = batch.iter().filter(|m| !m.author_is_bot).collect();
    let pool = if humans.is_empty() {
        batch.iter().collect()
    } else {
        humans
    };
    pool.into_iter().take(PROMPT_MESSAGE_CAP).collect()
}

pub fn build_prompt(
    batch: &[CollectedMessage],
    channel_name: &str,
    batch_index: usize,
    batch_count: usize,
) -> String {
    let rendered: Vec<String> = prompt_messages(batch)
        .iter()
        .map(|m| format!("[{}]: {}", m.author, m.content))
        .collect();

    format!(
        r#"Analyze these messages from the channel #{channel_name} (part {batch_index}/{batch_count}).

CONTEXT: This is a roleplay/gaming community server. Channels can be:
- Places in the world (cities, harbors, hospitals)
- Information channels (rules, guides, lore)
- Social channels (general chat, memes)
- Character or faction channels

MESSAGES:
{messages}

INSTRUCTIONS:
1. If this is part 1, identify the channel's EXACT purpose:
   - A PLACE: which place, and what typically happens there?
   - INFORMATION: about what? (runes, marks, rules, guides)
   - SOCIAL: what kind of interactions?
   - ROLEPLAY: which story or situation is unfolding?

2. Look for SPECIFIC world elements:
   - Place names, special objects (runes, marks, artifacts)
   - Characters or creatures mentioned
   - Game systems (levels, abilities)

3. EVENTS - be specific, not generic, and keep descriptions under 60 characters:
   - Not "general conversation" but "debate over the slavery runes"
   - Not "roleplay" but "battle between X and Y at the harbor"

Reply with JSON only:
{{
    "summary": "SPECIFIC description: what this channel IS and what it is used FOR",
    "themes": ["specific server/world topic"],
    "channel_purpose": "roleplay/information/social/rules/market/battle/other",
    "world_elements": ["places/objects/systems mentioned"],
    "events": [
        {{
            "type": "roleplay/information/conflict/transaction/encounter/other",
            "description": "specific description with world context",
            "participants": ["user1", "user2"],
            "importance": "high/medium/low",
            "lore_elements": ["specific elements mentioned"],
            "location": "where it happens, if mentioned",
            "quote": "one important exact phrase"
        }}
    ]
}}"#,
        channel_name = channel_name,
        batch_index = batch_index,
        batch_count = batch_count,
        messages = rendered.join("\n"),
    )
}

/// Best-effort extraction of a JSON object from the raw model reply. Models
/// routinely wrap the object in prose or code fences.
fn extract_json_object(raw: &str) -> Option<serde_json::Value> {
    let direct: Option<serde_json::Value> = serde_json::from_str(raw.trim()).ok();
    if let Some(value) = direct.filter(serde_json::Value::is_object) {
        return Some(value);
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(&raw[start..=end])
        .ok()
        .filter(serde_json::Value::is_object)
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(ToString::to_string)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn optional_string(value: Option<&serde_json::Value>) -> Option<String> {
    value
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Parse the model reply into findings. Missing or mistyped keys degrade to
/// empty fields; only the absence of any JSON object counts as malformed.
pub fn parse_findings(raw: &str) -> Option<PartialFindings> {
    let value = extract_json_object(raw)?;

    let events = value
        .get("events")
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| EventCandidate {
                    kind: optional_string(item.get("type")).unwrap_or_else(|| "other".to_string()),
                    description: optional_string(item.get("description")).unwrap_or_default(),
                    participants: string_list(item.get("participants")),
                    importance: Importance::parse(
                        item.get("importance").and_then(serde_json::Value::as_str).unwrap_or(""),
                    ),
                    lore_elements: string_list(item.get("lore_elements")),
                    location: optional_string(item.get("location")),
                    quote: optional_string(item.get("quote")),
                    permalink: None,
                    timestamp: None,
                })
                .collect()
        })
        .unwrap_or_default();

    Some(PartialFindings {
        summary: optional_string(value.get("summary")).unwrap_or_default(),
        themes: string_list(value.get("themes")),
        purpose: optional_string(value.get("channel_purpose"))
            .map(|p| ChannelPurpose::parse(&p)),
        world_elements: string_list(value.get("world_elements")),
        events,
    })
}

/// Degraded findings for a timed-out batch: tagged with a `timeout` theme and
/// exactly one low-importance informational event.
fn timeout_findings(channel_name: &str) -> PartialFindings {
    PartialFindings {
        summary: format!("Partial analysis of {channel_name}"),
        themes: vec!["timeout".to_string()],
        purpose: None,
        world_elements: Vec::new(),
        events: vec![EventCandidate {
            kind: "information".to_string(),
            description: "Analysis interrupted by timeout".to_string(),
            participants: Vec::new(),
            importance: Importance::Low,
            lore_elements: Vec::new(),
            location: None,
            quote: None,
            permalink: None,
            timestamp: None,
        }],
    }
}

/// Degraded findings for unusable model output: one medium event naming the
/// batch's human participants, so every batch still contributes something
/// event-shaped.
fn fallback_findings(channel_name: &str, batch: &[CollectedMessage]) -> PartialFindings {
    let mut participants: Vec<String> = Vec::new();
    for message in batch.iter().filter(|m| !m.author_is_bot) {
        if !participants.contains(&message.author) {
            participants.push(message.author.clone());
            if participants.len() == FALLBACK_PARTICIPANT_CAP {
                break;
            }
        }
    }

    PartialFindings {
        summary: format!("Activity in {channel_name}"),
        themes: Vec::new(),
        purpose: None,
        world_elements: Vec::new(),
        events: vec![EventCandidate {
            kind: "activity".to_string(),
            description: "General channel activity".to_string(),
            participants,
            importance: Importance::Medium,
            lore_elements: Vec::new(),
            location: None,
            quote: None,
            permalink: None,
            timestamp: None,
        }],
    }
}
