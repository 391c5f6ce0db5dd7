use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::GenerationError;
use crate::llm::{execute_with_retry, Generation, RetryConfig, TextGenerator, Usage};

pub const DEFAULT_HOST: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a Value>,
    options: ModelOptions,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ModelOptions {
    temperature: f32,
    num_ctx: usize,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Chat client for a local or remote Ollama server.
pub struct OllamaClient {
    base_url: String,
    model: String,
    model_id: String,
    temperature: f32,
    context_window: usize,
    retry: RetryConfig,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn with_config(base_url: String, model: String) -> Self {
        OllamaClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            model_id: model.clone(),
            model,
            temperature: 0.0,
            context_window: 8192,
            retry: RetryConfig::default(),
            client: reqwest::Client::new(),
        }
    }

    /// Token usage is recorded under `id` instead of the provider model name.
    pub fn with_model_id(mut self, id: impl Into<String>) -> Self {
        self.model_id = id.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_context_window(mut self, context_window: usize) -> Self {
        self.context_window = context_window;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn get_model(&self) -> &str {
        &self.model
    }

    async fn chat_once(&self, prompt: &str, schema: Option<&Value>) -> Result<Generation, GenerationError> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages: vec![Message { role: "user", content: prompt }],
            stream: false,
            format: schema,
            options: ModelOptions {
                temperature: self.temperature,
                num_ctx: self.context_window,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status: status.as_u16(), body });
        }

        let response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedJson(e.to_string()))?;

        let usage = Usage::new(
            response.prompt_eval_count.unwrap_or_default(),
            response.eval_count.unwrap_or_default(),
        );
        debug!(
            model = %self.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "ollama chat completed"
        );

        Ok(Generation { text: response.message.content, usage })
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, prompt: &str, schema: Option<&Value>) -> Result<Generation, GenerationError> {
        execute_with_retry(&self.retry, || self.chat_once(prompt, schema)).await
    }
}
