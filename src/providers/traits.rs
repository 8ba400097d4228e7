use async_trait::async_trait;

/// Generation parameters for a single completion request.
///
/// The summarizer keeps output bounded and randomness low; the exact values
/// come from config.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// One-shot text completion against a language-model service.
///
/// The service is treated as unreliable: calls may time out or return text
/// that ignores the requested structure. Callers own both failure modes.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> anyhow::Result<String>;
}
