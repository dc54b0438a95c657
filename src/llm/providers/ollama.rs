use crate::config::LlmConfig;
use crate::llm::providers::{Message, chat_messages};
use crate::llm::{CompletionBackend, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct OllamaRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct OllamaChatReply {
    message: Message,
    #[serde(default)]
    done: bool,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/api/chat".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CompletionBackend for OllamaProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        debug!("Asking Ollama model {} at {}", self.model, self.api_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            messages: chat_messages(system, user),
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Ollama responded with {}: {}", status, body);
            return Err(LlmError::from_status(status, body));
        }

        let body = response.text().await.map_err(LlmError::from_reqwest)?;
        let reply: OllamaChatReply = serde_json::from_str(&body).map_err(|e| {
            error!("Unreadable Ollama reply ({}): {}", e, body);
            LlmError::ResponseError(format!("Failed to parse Ollama response: {}", e))
        })?;

        if !reply.done {
            warn!("Ollama reply for {} was not marked done", self.model);
        }
        Ok(reply.message.content)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
