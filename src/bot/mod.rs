//! Bot runtime: gateway events in, analysis results out.
//!
//! The runtime consumes mention and component events from the Discord
//! gateway, routes free-text mentions by keyword into analyze / list / help,
//! and drives the interactive controls on report messages. All actual
//! analysis work happens in the core; this module only resolves, analyzes,
//! invalidates and renders.

pub mod interactions;
pub mod render;

use crate::analyzer::{AnalysisProgress, Analyzer, ChannelRef};
use crate::directory::DirectoryStore;
use crate::transport::{ChatTransport, DiscordTransport, GatewayEvent, OutgoingMessage};
use interactions::{ViewLookup, ViewRegistry, MORE_EVENTS, REFRESH, THREAD_SELECT};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tokio::sync::mpsc;

static USER_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@!?\d+>").expect("static pattern"));
static CHANNEL_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<#(\d+)>").expect("static pattern"));

const ANALYZE_KEYWORDS: &[&str] = &["analyze", "analyse", "check", "look", "review", "scan", "channel"];
const LIST_KEYWORDS: &[&str] = &["channels", "list", "show", "all"];
/// Words deleted from a mention before what remains becomes the channel query.
const QUERY_STOPWORDS: &[&str] = &[
    "analyze", "analyse", "check", "look", "review", "scan", "channel", "the", "a", "an", "at",
    "please", "of",
];

const EXPIRED_NOTICE: &str = "These controls have expired. Mention me to run a fresh analysis.";

// Interaction callback types
const CHANNEL_MESSAGE: u64 = 4;
const DEFERRED_UPDATE: u64 = 6;
const EPHEMERAL: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Analyze,
    List,
    Help,
}

fn words(content: &str) -> Vec<String> {
    content
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Keyword routing for a mention, analyze keywords first.
pub fn classify(content: &str) -> Intent {
    let words = words(content);
    if words.iter().any(|w| ANALYZE_KEYWORDS.contains(&w.as_str())) {
        Intent::Analyze
    } else if words.iter().any(|w| LIST_KEYWORDS.contains(&w.as_str())) {
        Intent::List
    } else {
        Intent::Help
    }
}

/// Remove mention tags so only the user's words remain.
pub fn strip_mention_tags(content: &str) -> String {
    USER_MENTION.replace_all(content, " ").trim().to_string()
}

/// An explicit `<#channel>` reference, if the message carries one.
pub fn channel_mention(content: &str) -> Option<String> {
    CHANNEL_MENTION
        .captures(content)
        .map(|captures| captures[1].to_string())
}

/// Strip the command stopwords; what survives is the channel query.
pub fn extract_query(content: &str) -> String {
    let cleaned = CHANNEL_MENTION
        .replace_all(&strip_mention_tags(content), " ")
        .to_lowercase();
    cleaned
        .split_whitespace()
        .filter(|word| {
            let bare: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
            !QUERY_STOPWORDS.contains(&bare.as_str())
        })
        .collect::<Vec<&str>>()
        .join(" ")
        .trim()
        .to_string()
}

#[derive(Clone)]
pub struct BotRuntime {
    transport: Arc<DiscordTransport>,
    core: Arc<dyn ChatTransport>,
    directory: Arc<DirectoryStore>,
    analyzer: Arc<Analyzer>,
    views: Arc<ViewRegistry>,
}

impl BotRuntime {
    pub fn new(
        transport: Arc<DiscordTransport>,
        directory: Arc<DirectoryStore>,
        analyzer: Arc<Analyzer>,
        views: Arc<ViewRegistry>,
    ) -> Self {
        let core: Arc<dyn ChatTransport> = transport.clone();
        Self {
            transport,
            core,
            directory,
            analyzer,
            views,
        }
    }

    /// Run until the gateway listener stops feeding events. Each event is
    /// handled on its own task, so two channels can be analyzed at once.
    pub async fn run(&self) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<GatewayEvent>(64);
        let gateway = self.transport.clone();
        let listener = tokio::spawn(async move { gateway.listen(tx).await });

        while let Some(event) = rx.recv().await {
            let runtime = self.clone();
            tokio::spawn(async move {
                if let Err(err) = runtime.dispatch(event).await {
                    tracing::warn!("event handling failed: {err:#}");
                }
            });
        }

        listener.abort();
        Ok(())
    }

    async fn dispatch(&self, event: GatewayEvent) -> anyhow::Result<()> {
        match event {
            GatewayEvent::Mention {
                guild_id,
                channel_id,
                author_name,
                content,
            } => {
                tracing::info!("mention from {author_name}: {content:?}");
                self.on_mention(&guild_id, &channel_id, &content).await
            }
            component @ GatewayEvent::Component { .. } => self.on_component(component).await,
        }
    }

    async fn on_mention(
        &self,
        guild_id: &str,
        origin_channel: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        if !self.directory.is_mapped(guild_id) {
            let status_id = self
                .core
                .send_message(
                    origin_channel,
                    &OutgoingMessage::text("🚀 **Waking up**... mapping the server's channels..."),
                )
                .await?;
            let snapshot = self.directory.map_server(self.core.as_ref(), guild_id).await?;
            self.core
                .edit_message(
                    origin_channel,
                    &status_id,
                    &OutgoingMessage::text(format!(
                        "✅ Mapping complete: {} channels identified",
                        snapshot.len()
                    )),
                )
                .await?;
        }

        let content = strip_mention_tags(content);
        match classify(&content) {
            Intent::Analyze => self.cmd_analyze(guild_id, origin_channel, &content).await,
            Intent::List => self.cmd_list(guild_id, origin_channel).await,
            Intent::Help => {
                self.core
                    .send_message(origin_channel, &OutgoingMessage::embed(render::help_embed()))
                    .await?;
                Ok(())
            }
        }
    }

    async fn cmd_analyze(
        &self,
        guild_id: &str,
        origin_channel: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        let Some(snapshot) = self.directory.snapshot(guild_id) else {
            anyhow::bail!("guild {guild_id} vanished from the directory");
        };

        // An explicit channel mention beats free-text resolution.
        let record = match channel_mention(content) {
            Some(channel_id) => snapshot.by_id(&channel_id),
            None => {
                let query = extract_query(content);
                if query.is_empty() {
                    self.core
                        .send_message(
                            origin_channel,
                            &OutgoingMessage::text(
                                "❓ Which channel should I analyze?\n\n**Examples:**\n• `@ChanLens analyze channel 1`\n• `@ChanLens analyze general`\n• `@ChanLens look at memes`",
                            ),
                        )
                        .await?;
                    return Ok(());
                }
                match snapshot.resolve(&query) {
                    Some(record) => Some(record),
                    None => {
                        self.core
                            .send_message(
                                origin_channel,
                                &OutgoingMessage::embed(render::not_found_embed(
                                    &query, &snapshot,
                                )),
                            )
                            .await?;
                        return Ok(());
                    }
                }
            }
        };

        let Some(record) = record else {
            self.core
                .send_message(
                    origin_channel,
                    &OutgoingMessage::text("❌ I can't see that channel."),
                )
                .await?;
            return Ok(());
        };

        let target = ChannelRef {
            id: record.id.clone(),
            name: record.name.clone(),
        };
        self.run_report(guild_id, origin_channel, target).await
    }

    /// Send a status message, stream progress into it, then replace it with
    /// the finished report (or a readable failure).
    async fn run_report(
        &self,
        guild_id: &str,
        origin_channel: &str,
        target: ChannelRef,
    ) -> anyhow::Result<()> {
        let status_id = self
            .core
            .send_message(
                origin_channel,
                &OutgoingMessage::text(format!("🔍 **Starting analysis** of #{}...", target.name)),
            )
            .await?;

        let (progress_tx, mut progress_rx) = mpsc::channel::<AnalysisProgress>(32);
        let editor_transport = self.core.clone();
        let editor_channel = origin_channel.to_string();
        let editor_status = status_id.clone();
        let editor_name = target.name.clone();
        let editor = tokio::spawn(async move {
            while let Some(update) = progress_rx.recv().await {
                let text = match update {
                    AnalysisProgress::Collecting { scanned, kept } => format!(
                        "📊 **Collecting messages** from #{editor_name}...\n📈 {scanned} messages scanned\n💬 {kept} kept for analysis"
                    ),
                    AnalysisProgress::Summarizing { batch, total } => format!(
                        "🤖 **Analyzing with AI** - part {batch}/{total}...\n🔍 Detecting events and world elements"
                    ),
                };
                let _ = editor_transport
                    .edit_message(&editor_channel, &editor_status, &OutgoingMessage::text(text))
                    .await;
            }
        });

        let result = self.analyzer.analyze(&target, Some(progress_tx)).await;
        editor.await.ok();

        match result {
            Ok(report) => {
                let message = OutgoingMessage::embed(render::report_embed(&report, false))
                    .with_components(render::report_components(&report));
                self.core
                    .edit_message(origin_channel, &status_id, &message)
                    .await?;
                self.views.register(&status_id, guild_id, report);
            }
            Err(err) => {
                self.core
                    .edit_message(
                        origin_channel,
                        &status_id,
                        &OutgoingMessage::text(format!("❌ {err}")),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn cmd_list(&self, guild_id: &str, origin_channel: &str) -> anyhow::Result<()> {
        let Some(snapshot) = self.directory.snapshot(guild_id) else {
            anyhow::bail!("guild {guild_id} vanished from the directory");
        };
        let embeds = render::channel_list_embeds(&snapshot);
        let count = embeds.len();
        for (index, embed) in embeds.into_iter().enumerate() {
            self.core
                .send_message(origin_channel, &OutgoingMessage::embed(embed))
                .await?;
            // Spread multi-embed listings out a little for the rate limiter.
            if index + 1 < count {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
        }
        Ok(())
    }

    async fn on_component(&self, event: GatewayEvent) -> anyhow::Result<()> {
        let GatewayEvent::Component {
            guild_id,
            channel_id,
            message_id,
            interaction_id,
            interaction_token,
            custom_id,
            values,
        } = event
        else {
            return Ok(());
        };

        let state = match self.views.lookup(&message_id) {
            ViewLookup::Active(state) => state,
            ViewLookup::Expired | ViewLookup::Unknown => {
                return self
                    .respond_text(&interaction_id, &interaction_token, EXPIRED_NOTICE, true)
                    .await;
            }
        };

        match custom_id.as_str() {
            REFRESH => {
                self.transport
                    .respond_interaction(
                        &interaction_id,
                        &interaction_token,
                        serde_json::json!({"type": DEFERRED_UPDATE}),
                    )
                    .await?;

                self.analyzer.invalidate(&state.report.channel_id);
                let target = ChannelRef {
                    id: state.report.channel_id.clone(),
                    name: state.report.channel_name.clone(),
                };
                match self.analyzer.analyze(&target, None).await {
                    Ok(report) => {
                        let message = OutgoingMessage::embed(render::report_embed(&report, false))
                            .with_components(render::report_components(&report));
                        self.core
                            .edit_message(&channel_id, &message_id, &message)
                            .await?;
                        self.views.register(&message_id, &guild_id, report);
                    }
                    Err(err) => {
                        self.core
                            .send_message(
                                &channel_id,
                                &OutgoingMessage::text(format!("❌ {err}")),
                            )
                            .await?;
                    }
                }
                Ok(())
            }
            MORE_EVENTS => {
                let Some(page) = self.views.advance_page(&message_id) else {
                    return self
                        .respond_text(&interaction_id, &interaction_token, EXPIRED_NOTICE, true)
                        .await;
                };
                match render::events_page_embed(&state.report, page) {
                    Some(embed) => {
                        self.transport
                            .respond_interaction(
                                &interaction_id,
                                &interaction_token,
                                serde_json::json!({
                                    "type": CHANNEL_MESSAGE,
                                    "data": {"embeds": [embed]},
                                }),
                            )
                            .await?;
                        Ok(())
                    }
                    None => {
                        self.respond_text(
                            &interaction_id,
                            &interaction_token,
                            "No more events to show.",
                            true,
                        )
                        .await
                    }
                }
            }
            THREAD_SELECT => {
                let Some(thread_id) = values.first() else {
                    return Ok(());
                };
                let thread_name = state
                    .report
                    .related
                    .threads
                    .iter()
                    .find(|t| &t.id == thread_id)
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| "thread".to_string());

                self.respond_text(
                    &interaction_id,
                    &interaction_token,
                    &format!("🔍 **Analyzing thread** {thread_name}..."),
                    false,
                )
                .await?;

                let target = ChannelRef {
                    id: thread_id.clone(),
                    name: thread_name,
                };
                match self.analyzer.analyze(&target, None).await {
                    Ok(report) => {
                        let message = OutgoingMessage::embed(render::report_embed(&report, true))
                            .with_components(render::report_components(&report));
                        let result_id = self
                            .transport
                            .edit_interaction_response(&interaction_token, &message)
                            .await?;
                        if !result_id.is_empty() {
                            self.views.register(&result_id, &guild_id, report);
                        }
                    }
                    Err(err) => {
                        self.transport
                            .edit_interaction_response(
                                &interaction_token,
                                &OutgoingMessage::text(format!("❌ {err}")),
                            )
                            .await?;
                    }
                }
                Ok(())
            }
            other => {
                tracing::debug!("ignoring unknown component: {other}");
                self.respond_text(&interaction_id, &interaction_token, EXPIRED_NOTICE, true)
                    .await
            }
        }
    }

    async fn respond_text(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        text: &str,
        ephemeral: bool,
    ) -> anyhow::Result<()> {
        let mut data = serde_json::json!({"content": text});
        if ephemeral {
            data["flags"] = serde_json::json!(EPHEMERAL);
        }
        self.transport
            .respond_interaction(
                interaction_id,
                interaction_token,
                serde_json::json!({"type": CHANNEL_MESSAGE, "data": data}),
            )
            .await?;
        Ok(())
    }
}
