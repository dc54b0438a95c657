use crate::config::LlmConfig;
use crate::llm::providers::{Message, chat_messages};
use crate::llm::{CompletionBackend, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq)]
enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Azure OpenAI `api-key: <key>`
    ApiKeyHeader,
}

/// Chat-completions backend for OpenAI and Azure OpenAI deployments.
pub struct RemoteLlmProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    auth: AuthStyle,
    model: String,
    temperature: f32,
    max_tokens: usize,
    label: &'static str,
}

#[derive(Serialize)]
struct PromptRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Deserialize)]
struct PromptResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl RemoteLlmProvider {
    pub fn openai(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| OPENAI_CHAT_URL.to_string());
        Self::build(config, api_url, AuthStyle::Bearer, "openai")
    }

    /// `api_url` must be the full deployment URL, including `api-version`.
    pub fn azure(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config.api_url.clone().ok_or_else(|| {
            LlmError::ConfigError("API URL is required for the azure backend".to_string())
        })?;
        Self::build(config, api_url, AuthStyle::ApiKeyHeader, "azure")
    }

    fn build(
        config: &LlmConfig,
        api_url: String,
        auth: AuthStyle,
        label: &'static str,
    ) -> Result<Self, LlmError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            LlmError::ConfigError(format!("API key is required for the {} backend", label))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            api_key,
            auth,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            label,
        })
    }
}

#[async_trait]
impl CompletionBackend for RemoteLlmProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let request = PromptRequest {
            model: self.model.clone(),
            messages: chat_messages(system, user),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!("Sending chat completion to {} with model {}", self.api_url, self.model);

        let builder = self.client.post(&self.api_url).json(&request);
        let builder = match self.auth {
            AuthStyle::Bearer => builder.header("Authorization", format!("Bearer {}", self.api_key)),
            AuthStyle::ApiKeyHeader => builder.header("api-key", &self.api_key),
        };

        let response = builder.send().await.map_err(LlmError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("{} API responded with status code: {}", self.label, status);
            return Err(LlmError::from_status(status, body));
        }

        let prompt_response: PromptResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(e.to_string())
            } else {
                LlmError::ResponseError(e.to_string())
            }
        })?;

        prompt_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::ResponseError("No choices in response".to_string()))
    }

    fn name(&self) -> &str {
        self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionClient, RetryPolicy};
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct Backend {
        hits: Arc<AtomicUsize>,
        fail_first: usize,
    }

    async fn chat(
        State(backend): State<Backend>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> Response {
        let bearer = headers.get("authorization").and_then(|v| v.to_str().ok());
        let api_key = headers.get("api-key").and_then(|v| v.to_str().ok());
        if bearer != Some("Bearer test-key") && api_key != Some("test-key") {
            return (StatusCode::UNAUTHORIZED, "invalid key").into_response();
        }

        let hit = backend.hits.fetch_add(1, Ordering::SeqCst);
        if hit < backend.fail_first {
            return (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response();
        }

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "how many runs?");

        Json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "```sql\nSELECT COUNT(DISTINCT RunId) FROM PerformanceMetrics\n```" } }]
        }))
        .into_response()
    }

    async fn serve(fail_first: usize) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/v1/chat/completions", post(chat))
            .with_state(Backend {
                hits: hits.clone(),
                fail_first,
            });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/v1/chat/completions", addr), hits)
    }

    fn config(url: &str, key: &str) -> LlmConfig {
        let mut config = crate::config::AppConfig::default().llm;
        config.api_url = Some(url.to_string());
        config.api_key = Some(key.to_string());
        config.timeout_secs = 5;
        config
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn service_unavailable_is_retried_until_success() {
        let (url, hits) = serve(1).await;
        let provider = RemoteLlmProvider::openai(&config(&url, "test-key")).unwrap();
        let client = CompletionClient::new(Box::new(provider), quick_retry());

        let text = client.complete("You write SQL.", "how many runs?").await.unwrap();

        assert!(text.contains("COUNT(DISTINCT RunId)"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bad_key_is_an_auth_error_without_retry() {
        let (url, hits) = serve(0).await;
        let provider = RemoteLlmProvider::openai(&config(&url, "wrong")).unwrap();
        let client = CompletionClient::new(Box::new(provider), quick_retry());

        let err = client.complete("You write SQL.", "how many runs?").await.unwrap_err();

        assert!(matches!(err, LlmError::AuthError(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn azure_sends_the_api_key_header() {
        let (url, _) = serve(0).await;
        let provider = RemoteLlmProvider::azure(&config(&url, "test-key")).unwrap();

        let text = provider.complete("You write SQL.", "how many runs?").await.unwrap();

        assert!(text.starts_with("```sql"));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider =
            RemoteLlmProvider::openai(&config(&format!("http://{}/v1/chat/completions", addr), "k"))
                .unwrap();

        let err = provider.complete("s", "u").await.unwrap_err();

        assert!(err.is_transport());
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let mut config = crate::config::AppConfig::default().llm;
        config.api_key = None;

        assert!(matches!(
            RemoteLlmProvider::openai(&config),
            Err(LlmError::ConfigError(_))
        ));
        assert!(matches!(
            RemoteLlmProvider::azure(&config),
            Err(LlmError::ConfigError(_))
        ));
    }
}
