#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]

use anyhow::{bail, Result};
use chanlens::analyzer::{Analyzer, SystemClock};
use chanlens::bot::interactions::ViewRegistry;
use chanlens::bot::BotRuntime;
use chanlens::config::Config;
use chanlens::directory::DirectoryStore;
use chanlens::providers::{create_provider, GenerationParams};
use chanlens::summarizer::BatchSummarizer;
use chanlens::transport::{ChatTransport, DiscordTransport};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// `ChanLens` - channel cartography and LLM-backed history analysis.
#[derive(Parser, Debug)]
#[command(name = "chanlens", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to Discord and serve analysis requests (default)
    Run,
    /// Show the config file location and effective settings
    Config,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chanlens=info"));
    fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load_or_init()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Config => {
            println!("Config file: {}", config.config_path.display());
            println!(
                "Provider:    {} ({})",
                config.provider.as_deref().unwrap_or("openai"),
                config.model.as_deref().unwrap_or("gpt-4o-mini"),
            );
            println!(
                "Discord:     {}",
                if config.discord.bot_token.is_empty() {
                    "not configured (set DISCORD_TOKEN)"
                } else {
                    "configured"
                }
            );
            Ok(())
        }
        Commands::Run => run(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    if config.discord.bot_token.is_empty() {
        bail!(
            "No Discord bot token. Set DISCORD_TOKEN or edit {}.",
            config.config_path.display()
        );
    }
    if config.api_key.is_none() {
        bail!(
            "No language-model API key. Set OPENAI_API_KEY or edit {}.",
            config.config_path.display()
        );
    }

    let provider = create_provider(
        config.provider.as_deref().unwrap_or("openai"),
        config.api_key.as_deref(),
        config.analysis.request_timeout_secs,
    )?;
    let summarizer = BatchSummarizer::new(
        Arc::from(provider),
        GenerationParams {
            model: config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
            max_tokens: config.analysis.max_tokens,
            temperature: config.analysis.temperature,
        },
        config.analysis.summarize_timeout_secs,
    );

    let clock = Arc::new(SystemClock);
    let transport = Arc::new(DiscordTransport::new(config.discord.bot_token.clone()));
    let core: Arc<dyn ChatTransport> = transport.clone();
    let analyzer = Arc::new(Analyzer::new(
        core,
        summarizer,
        config.analysis.cache_ttl_minutes,
        config.analysis.max_messages,
        clock.clone(),
    ));
    let directory = Arc::new(DirectoryStore::new());
    let views = Arc::new(ViewRegistry::new(
        config.analysis.view_timeout_secs,
        clock,
    ));

    let runtime = BotRuntime::new(transport, directory, analyzer, views);

    info!("chanlens starting");
    tokio::select! {
        result = runtime.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}
