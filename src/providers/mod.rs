pub mod openai;
pub mod traits;

pub use traits::{CompletionProvider, GenerationParams};

use openai::OpenAiProvider;

/// Shared helper: turn a non-success HTTP response into a readable error.
pub(crate) async fn api_error(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    anyhow::anyhow!("{provider} API error ({status}): {body}")
}

/// Factory: create the right provider from config.
pub fn create_provider(
    name: &str,
    api_key: Option<&str>,
    timeout_secs: u64,
) -> anyhow::Result<Box<dyn CompletionProvider>> {
    match name {
        "openai" => Ok(Box::new(OpenAiProvider::new(api_key, timeout_secs))),

        // ── OpenAI-compatible endpoints ──────────────────────
        "openrouter" => Ok(Box::new(OpenAiProvider::with_base_url(
            "OpenRouter",
            "https://openrouter.ai/api/v1",
            api_key,
            timeout_secs,
        ))),
        "groq" => Ok(Box::new(OpenAiProvider::with_base_url(
            "Groq",
            "https://api.groq.com/openai/v1",
            api_key,
            timeout_secs,
        ))),
        "deepseek" => Ok(Box::new(OpenAiProvider::with_base_url(
            "DeepSeek",
            "https://api.deepseek.com/v1",
            api_key,
            timeout_secs,
        ))),
        "mistral" => Ok(Box::new(OpenAiProvider::with_base_url(
            "Mistral",
            "https://api.mistral.ai/v1",
            api_key,
            timeout_secs,
        ))),
        "ollama" => Ok(Box::new(OpenAiProvider::with_base_url(
            "Ollama",
            "http://localhost:11434/v1",
            api_key.filter(|k| !k.is_empty()).or(Some("ollama")),
            timeout_secs,
        ))),

        other => anyhow::bail!(
            "Unknown provider '{other}'. Supported: openai, openrouter, groq, deepseek, mistral, ollama."
        ),
    }
}
