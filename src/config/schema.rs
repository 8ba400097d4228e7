use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Language-model API key. Env `OPENAI_API_KEY` / `CHANLENS_API_KEY`
    /// override the file.
    pub api_key: Option<String>,
    /// Provider name for the factory (openai, openrouter, groq, ...).
    pub provider: Option<String>,
    /// Model identifier passed through to the provider.
    pub model: Option<String>,

    #[serde(default)]
    pub discord: DiscordConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token. Env `DISCORD_TOKEN` overrides the file.
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// History traversal bound per analysis run.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Cached reports are reused for this long.
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: i64,
    /// Timeout handed to the HTTP client of the model provider.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Outer per-batch deadline, wrapped around the whole model call.
    #[serde(default = "default_summarize_timeout_secs")]
    pub summarize_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Interactive controls on a report stop responding after this long.
    #[serde(default = "default_view_timeout_secs")]
    pub view_timeout_secs: i64,
}

fn default_max_messages() -> usize {
    2000
}

fn default_cache_ttl_minutes() -> i64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_summarize_timeout_secs() -> u64 {
    20
}

fn default_max_tokens() -> u32 {
    800
}

fn default_temperature() -> f64 {
    0.5
}

fn default_view_timeout_secs() -> i64 {
    300
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            cache_ttl_minutes: default_cache_ttl_minutes(),
            request_timeout_secs: default_request_timeout_secs(),
            summarize_timeout_secs: default_summarize_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            view_timeout_secs: default_view_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            api_key: None,
            provider: Some("openai".to_string()),
            model: Some("gpt-4o-mini".to_string()),
            discord: DiscordConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let dir = home.join(".chanlens");
        if !dir.exists() {
            fs::create_dir_all(&dir).context("Failed to create .chanlens directory")?;
        }
        Self::load_or_init_at(&dir.join("config.toml"))
    }

    /// Load from an explicit path, writing defaults there when absent.
    pub fn load_or_init_at(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let contents =
                fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            let config = Config::default();
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render default config")?;
            fs::write(config_path, rendered).context("Failed to write default config")?;
            config
        };
        config.config_path = config_path.to_path_buf();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) =
            std::env::var("CHANLENS_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"))
        {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
        if let Ok(provider) = std::env::var("CHANLENS_PROVIDER") {
            if !provider.is_empty() {
                self.provider = Some(provider);
            }
        }
        if let Ok(model) = std::env::var("CHANLENS_MODEL") {
            if !model.is_empty() {
                self.model = Some(model);
            }
        }
        if let Ok(token) = std::env::var("DISCORD_TOKEN") {
            if !token.is_empty() {
                self.discord.bot_token = token;
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let rendered = toml::to_string_pretty(self).context("Failed to render config")?;
        fs::write(&self.config_path, rendered).context("Failed to write config file")?;
        Ok(())
    }
}
