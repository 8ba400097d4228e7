use crate::providers::traits::{CompletionProvider, GenerationParams};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// OpenAI chat-completions provider. Also serves every OpenAI-compatible
/// endpoint via [`OpenAiProvider::with_base_url`].
pub struct OpenAiProvider {
    display_name: String,
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(api_key: Option<&str>, timeout_secs: u64) -> Self {
        Self::with_base_url("OpenAI", "https://api.openai.com/v1", api_key, timeout_secs)
    }

    /// Create a provider against a custom OpenAI-compatible base URL.
    pub fn with_base_url(
        display_name: &str,
        base_url: &str,
        api_key: Option<&str>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            display_name: display_name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(ToString::to_string),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> anyhow::Result<String> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "{} API key not set. Set OPENAI_API_KEY or edit config.toml.",
                self.display_name
            )
        })?;

        let request = ChatRequest {
            model: params.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(super::api_error(&self.display_name, response).await);
        }

        let chat_response: ChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| anyhow::anyhow!("No response from {}", self.display_name))
    }
}
