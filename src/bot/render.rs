//! Embed and component rendering.
//!
//! Pure functions from reports and catalogs to Discord JSON payloads. Field
//! values are length-budgeted the way Discord requires (1024-char fields,
//! 25-option selects) so rendering can never fail a request.

use super::interactions::{EVENTS_PER_PAGE, MORE_EVENTS, REFRESH, THREAD_SELECT};
use crate::analyzer::AnalysisReport;
use crate::directory::CatalogSnapshot;
use crate::summarizer::{ChannelPurpose, EventCandidate};
use crate::transport::ChannelKind;
use crate::util::truncate_with_ellipsis;
use serde_json::{json, Value};

const COLOR_OK: u32 = 0x00ff00;
const COLOR_ERROR: u32 = 0xff0000;
/// Events listed on the main report embed.
const REPORT_EVENT_LIMIT: usize = 10;
/// Soft budget for the events field, under Discord's 1024-char field cap.
const EVENT_FIELD_BUDGET: usize = 900;
const CHANNELS_PER_LIST_EMBED: usize = 20;
const SELECT_OPTION_LIMIT: usize = 25;

fn purpose_heading(purpose: ChannelPurpose) -> &'static str {
    match purpose {
        ChannelPurpose::Roleplay => "🎭 Roleplay channel",
        ChannelPurpose::Information => "📚 Information channel",
        ChannelPurpose::Social => "💬 Social channel",
        ChannelPurpose::Rules => "📜 Rules channel",
        ChannelPurpose::Market => "⚖️ Market channel",
        ChannelPurpose::Battle => "⚔️ Battle channel",
        ChannelPurpose::Other => "📌 Channel",
    }
}

fn event_line(index: usize, event: &EventCandidate, description_cap: usize) -> String {
    let description = truncate_with_ellipsis(&event.description, description_cap);
    let kind = event.kind.as_str();
    let mut line = match &event.permalink {
        Some(url) => format!("**{index}. {kind}**: [{description}]({url})"),
        None => format!("**{index}. {kind}**: {description}"),
    };
    if !event.participants.is_empty() {
        let participants = event
            .participants
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        line.push_str(&format!("\n👥 *{participants}*"));
    }
    line
}

/// The main report embed.
pub fn report_embed(report: &AnalysisReport, is_thread: bool) -> Value {
    let title = if is_thread {
        format!("🧵 Thread analysis: {}", report.channel_name)
    } else {
        format!("📊 Analysis of #{}", report.channel_name)
    };

    let mut description = if report.summary.is_empty() {
        "Channel with mixed activity".to_string()
    } else {
        report.summary.clone()
    };
    if let Some(purpose) = report.purpose {
        description = format!("**{}**\n{description}", purpose_heading(purpose));
    }
    description = truncate_with_ellipsis(&description, 2040);

    let mut stats = format!(
        "• **Messages scanned**: {}\n• **Messages analyzed**: {}\n• **Unique authors**: {}\n• **Events detected**: {}",
        report.total_scanned, report.analyzed_count, report.unique_authors, report.event_count
    );
    let active_threads = report.related.threads.iter().filter(|t| !t.archived).count();
    if active_threads > 0 {
        stats.push_str(&format!("\n• **Active threads**: {active_threads}"));
    }

    let mut fields = vec![json!({"name": "📈 Statistics", "value": stats, "inline": true})];

    if let (Some(oldest), Some(newest)) = (&report.oldest_link, &report.newest_link) {
        fields.push(json!({
            "name": "🔗 Quick links",
            "value": format!("• [First message]({oldest})\n• [Latest message]({newest})"),
            "inline": true,
        }));
    }

    let mut topical = Vec::new();
    if !report.themes.is_empty() {
        let themes = report.themes.iter().take(5).cloned().collect::<Vec<_>>().join(", ");
        topical.push(format!("**Themes:** {}", truncate_with_ellipsis(&themes, 200)));
    }
    if !report.world_elements.is_empty() {
        let elements = report
            .world_elements
            .iter()
            .take(7)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        topical.push(format!(
            "**World elements:** {}",
            truncate_with_ellipsis(&elements, 200)
        ));
    }
    if !topical.is_empty() {
        fields.push(json!({
            "name": "📌 Channel content",
            "value": truncate_with_ellipsis(&topical.join("\n"), 1020),
            "inline": false,
        }));
    }

    if !report.events.is_empty() {
        let mut lines = Vec::new();
        let mut used = 0usize;
        for (i, event) in report.events.iter().take(REPORT_EVENT_LIMIT).enumerate() {
            let line = event_line(i + 1, event, 50);
            if used + line.len() + 20 >= EVENT_FIELD_BUDGET {
                let remaining = report.event_count - i;
                if remaining > 0 {
                    lines.push(format!("*...and {remaining} more events*"));
                }
                break;
            }
            used += line.len() + 20;
            lines.push(line);
        }
        fields.push(json!({
            "name": "🎯 Notable events",
            "value": truncate_with_ellipsis(&lines.join("\n\n"), 1020),
            "inline": false,
        }));
    }

    json!({
        "title": title,
        "description": description,
        "color": COLOR_OK,
        "fields": fields,
        "footer": {
            "text": format!(
                "Analyzed {} • cached for 30 min",
                report.analyzed_at.format("%Y-%m-%d %H:%M")
            )
        },
    })
}

/// One page of events past the ones shown inline. Pages count from zero;
/// page 1 is the first "more events" click. `None` when the page is empty.
pub fn events_page_embed(report: &AnalysisReport, page: usize) -> Option<Value> {
    let start = page * EVENTS_PER_PAGE;
    let events: Vec<&EventCandidate> =
        report.events.iter().skip(start).take(EVENTS_PER_PAGE).collect();
    if events.is_empty() {
        return None;
    }
    let end = start + events.len();

    let lines: Vec<String> = events
        .iter()
        .enumerate()
        .map(|(offset, event)| event_line(start + offset + 1, event, 80))
        .collect();

    let mut embed = json!({
        "title": format!(
            "📊 More events from #{} (page {})",
            report.channel_name,
            page + 1
        ),
        "description": lines.join("\n\n"),
        "color": COLOR_OK,
    });
    if end < report.events.len() {
        embed["footer"] = json!({
            "text": format!("Showing {}-{} of {} events", start + 1, end, report.events.len())
        });
    }
    Some(embed)
}

/// Numbered channel list, split into embeds of twenty.
pub fn channel_list_embeds(snapshot: &CatalogSnapshot) -> Vec<Value> {
    let records = snapshot.records();
    if records.is_empty() {
        return vec![json!({
            "title": "📋 Channel list",
            "description": "No readable channels mapped on this server.",
            "color": COLOR_ERROR,
        })];
    }
    let total = records.len();
    let embed_count = total.div_ceil(CHANNELS_PER_LIST_EMBED);

    records
        .chunks(CHANNELS_PER_LIST_EMBED)
        .enumerate()
        .map(|(page, chunk)| {
            let lines: Vec<String> = chunk
                .iter()
                .map(|record| {
                    let icon = match record.kind {
                        ChannelKind::Text => "💬",
                        ChannelKind::Forum => "📂",
                        ChannelKind::Thread => "🧵",
                    };
                    format!("{icon} **{}.** {}", record.number, record.name)
                })
                .collect();

            let mut fields = vec![json!({
                "name": format!(
                    "Channels {}-{}",
                    page * CHANNELS_PER_LIST_EMBED + 1,
                    page * CHANNELS_PER_LIST_EMBED + chunk.len()
                ),
                "value": lines.join("\n"),
                "inline": false,
            })];
            if page == 0 {
                fields.push(json!({
                    "name": "💡 How to use",
                    "value": "• `@ChanLens analyze channel 5` (by number)\n• `@ChanLens analyze general` (by name)",
                    "inline": false,
                }));
            }

            json!({
                "title": format!("📋 Channel list ({}/{})", page + 1, embed_count),
                "description": format!("**Total: {total} channels** - use the number or name to analyze"),
                "color": COLOR_OK,
                "fields": fields,
            })
        })
        .collect()
}

/// Not-found embed with suggestions, or the first catalog entries when
/// nothing is close.
pub fn not_found_embed(query: &str, snapshot: &CatalogSnapshot) -> Value {
    let suggestions = snapshot.suggest(query, 10);
    let (name, entries): (&str, Vec<String>) = if suggestions.is_empty() {
        (
            "📋 Some available channels:",
            snapshot
                .records()
                .iter()
                .take(10)
                .map(|r| format!("**{}.** {}", r.number, r.name))
                .collect(),
        )
    } else {
        (
            "📋 Did you mean?",
            suggestions
                .iter()
                .map(|r| format!("**{}.** {}", r.number, r.name))
                .collect(),
        )
    };

    json!({
        "title": "❌ Channel not found",
        "description": format!("I couldn't find a channel called **'{query}'**"),
        "color": COLOR_ERROR,
        "fields": [
            {"name": name, "value": entries.join("\n"), "inline": false},
            {
                "name": "💡 Use the number or the full name:",
                "value": "`@ChanLens analyze channel 1` or `@ChanLens analyze dark forest`",
                "inline": false,
            }
        ],
    })
}

pub fn help_embed() -> Value {
    json!({
        "title": "🔍 ChanLens - channel analysis",
        "description": "I analyze channels and surface what matters, using a language model.",
        "color": COLOR_OK,
        "fields": [
            {
                "name": "📌 Commands",
                "value": "• `@ChanLens analyze channel [number/name]`\n• `@ChanLens list channels`\n• `@ChanLens help`",
                "inline": false,
            },
            {
                "name": "🎯 What I can do",
                "value": "• Detect notable events with direct message links\n• Identify each channel's main themes and purpose\n• Summarize activity and count active authors\n• Find related threads worth a look",
                "inline": false,
            },
            {
                "name": "✨ Interactive results",
                "value": "• Pick a related thread to analyze it in place\n• Page through extra events\n• Refresh an analysis on demand",
                "inline": false,
            },
            {
                "name": "⚡ Tips",
                "value": "• Channels resolve by **number** or **name**\n• Reports stay cached for 30 minutes\n• Up to 2000 messages scanned per channel",
                "inline": false,
            }
        ],
        "footer": {"text": "💡 Mention me and tell me which channel to analyze"},
    })
}

/// Interactive components for a report message: a thread dropdown when the
/// channel has related threads, a paging button when events overflow the
/// inline list, and always a refresh button.
pub fn report_components(report: &AnalysisReport) -> Vec<Value> {
    let mut rows = Vec::new();

    if !report.related.threads.is_empty() {
        let options: Vec<Value> = report
            .related
            .threads
            .iter()
            .take(SELECT_OPTION_LIMIT)
            .map(|thread| {
                json!({
                    "label": truncate_with_ellipsis(&thread.name, 96),
                    "value": thread.id,
                    "description": format!("{} messages", thread.message_count),
                    "emoji": {"name": "🧵"},
                })
            })
            .collect();
        rows.push(json!({
            "type": 1,
            "components": [{
                "type": 3,
                "custom_id": THREAD_SELECT,
                "placeholder": "📎 Analyze a related thread...",
                "options": options,
            }],
        }));
    }

    let mut buttons = Vec::new();
    if report.event_count > EVENTS_PER_PAGE {
        buttons.push(json!({
            "type": 2,
            "style": 1,
            "custom_id": MORE_EVENTS,
            "label": "More events",
            "emoji": {"name": "📊"},
        }));
    }
    buttons.push(json!({
        "type": 2,
        "style": 2,
        "custom_id": REFRESH,
        "label": "Refresh analysis",
        "emoji": {"name": "🔄"},
    }));
    rows.push(json!({"type": 1, "components": buttons}));

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::related::{RelatedContent, RelatedThread};
    use crate::summarizer::Importance;
    use crate::transport::{ChannelInfo, GuildChannels};
    use chrono::{TimeZone, Utc};

    fn event(description: &str, permalink: Option<&str>) -> EventCandidate {
        EventCandidate {
            kind: "roleplay".into(),
            description: description.into(),
            participants: vec!["alice".into(), "bob".into()],
            importance: Importance::Medium,
            lore_elements: Vec::new(),
            location: None,
            quote: None,
            permalink: permalink.map(ToString::to_string),
            timestamp: None,
        }
    }

    fn report(event_count: usize, threads: usize) -> AnalysisReport {
        AnalysisReport {
            channel_id: "c1".into(),
            channel_name: "harbor".into(),
            total_scanned: 500,
            analyzed_count: 320,
            unique_authors: 12,
            summary: "roleplay around the docks".into(),
            purpose: Some(ChannelPurpose::Roleplay),
            themes: vec!["smuggling".into()],
            world_elements: vec!["Blessed Harbor".into()],
            event_count,
            events: (0..event_count.min(15))
                .map(|i| event(&format!("event {i}"), None))
                .collect(),
            related: RelatedContent {
                threads: (0..threads)
                    .map(|i| RelatedThread {
                        id: format!("t{i}"),
                        name: format!("thread {i}"),
                        message_count: i as u64,
                        archived: false,
                    })
                    .collect(),
            },
            analyzed_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            oldest_link: Some("https://discord.com/channels/g/c/1".into()),
            newest_link: Some("https://discord.com/channels/g/c/9".into()),
        }
    }

    #[test]
    fn report_embed_carries_stats_and_purpose() {
        let embed = report_embed(&report(3, 0), false);
        assert_eq!(embed["title"], "📊 Analysis of #harbor");
        let description = embed["description"].as_str().unwrap();
        assert!(description.contains("Roleplay channel"));
        let stats = embed["fields"][0]["value"].as_str().unwrap();
        assert!(stats.contains("500"));
        assert!(stats.contains("320"));
        assert!(stats.contains("12"));
    }

    #[test]
    fn thread_report_uses_thread_title() {
        let embed = report_embed(&report(0, 0), true);
        assert_eq!(embed["title"], "🧵 Thread analysis: harbor");
    }

    #[test]
    fn event_line_links_when_permalink_present() {
        let with_link = event_line(1, &event("a duel", Some("https://x")), 50);
        assert!(with_link.contains("[a duel](https://x)"));
        let without = event_line(1, &event("a duel", None), 50);
        assert!(!without.contains("]("));
        assert!(without.contains("alice, bob"));
    }

    #[test]
    fn events_page_slices_by_five() {
        let r = report(15, 0);
        let page1 = events_page_embed(&r, 1).unwrap();
        let description = page1["description"].as_str().unwrap();
        assert!(description.contains("**6. "));
        assert!(description.contains("**10. "));
        assert!(!description.contains("**11. "));
        assert!(page1["footer"]["text"].as_str().unwrap().contains("6-10 of 15"));
    }

    #[test]
    fn events_page_past_the_end_is_none() {
        let r = report(7, 0);
        assert!(events_page_embed(&r, 2).is_none());
    }

    #[test]
    fn last_page_has_no_footer() {
        let r = report(15, 0);
        let page2 = events_page_embed(&r, 2).unwrap();
        assert!(page2.get("footer").is_none());
    }

    #[test]
    fn components_all_three_when_threads_and_many_events() {
        let rows = report_components(&report(10, 2));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["components"][0]["custom_id"], THREAD_SELECT);
        let buttons = rows[1]["components"].as_array().unwrap();
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[0]["custom_id"], MORE_EVENTS);
        assert_eq!(buttons[1]["custom_id"], REFRESH);
    }

    #[test]
    fn components_refresh_only_for_small_reports() {
        let rows = report_components(&report(2, 0));
        assert_eq!(rows.len(), 1);
        let buttons = rows[0]["components"].as_array().unwrap();
        assert_eq!(buttons.len(), 1);
        assert_eq!(buttons[0]["custom_id"], REFRESH);
    }

    #[test]
    fn thread_options_are_capped_at_twenty_five() {
        let rows = report_components(&report(0, 40));
        let options = rows[0]["components"][0]["options"].as_array().unwrap();
        assert_eq!(options.len(), 25);
    }

    #[test]
    fn channel_list_paginates_by_twenty() {
        let listing = GuildChannels {
            text: (0..45)
                .map(|i| ChannelInfo {
                    id: format!("c{i}"),
                    name: format!("channel-{i}"),
                    kind: crate::transport::ChannelKind::Text,
                })
                .collect(),
            forums: Vec::new(),
            threads: Vec::new(),
        };
        let snapshot = CatalogSnapshot::build(&listing);
        let embeds = channel_list_embeds(&snapshot);
        assert_eq!(embeds.len(), 3);
        assert!(embeds[0]["title"].as_str().unwrap().contains("(1/3)"));
        // Usage hint only on the first embed.
        assert_eq!(embeds[0]["fields"].as_array().unwrap().len(), 2);
        assert_eq!(embeds[1]["fields"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn not_found_embed_prefers_suggestions() {
        let listing = GuildChannels {
            text: vec![
                ChannelInfo {
                    id: "c1".into(),
                    name: "harbor-market".into(),
                    kind: crate::transport::ChannelKind::Text,
                },
                ChannelInfo {
                    id: "c2".into(),
                    name: "general".into(),
                    kind: crate::transport::ChannelKind::Text,
                },
            ],
            forums: Vec::new(),
            threads: Vec::new(),
        };
        let snapshot = CatalogSnapshot::build(&listing);
        let embed = not_found_embed("harbor docks", &snapshot);
        assert_eq!(embed["fields"][0]["name"], "📋 Did you mean?");
        assert!(embed["fields"][0]["value"]
            .as_str()
            .unwrap()
            .contains("harbor-market"));

        let fallback = not_found_embed("xyzzy", &snapshot);
        assert_eq!(fallback["fields"][0]["name"], "📋 Some available channels:");
    }
}
