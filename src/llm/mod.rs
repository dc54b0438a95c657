pub mod extract;
pub mod prompt;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum LlmError {
    ConnectionError(String),
    Timeout(String),
    AuthError(String),
    StatusError { status: u16, body: String },
    ResponseError(String),
    ConfigError(String),
}

impl LlmError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(err.to_string())
        } else {
            LlmError::ConnectionError(err.to_string())
        }
    }

    pub(crate) fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                LlmError::AuthError(format!("backend refused credentials ({})", status))
            }
            _ => LlmError::StatusError {
                status: status.as_u16(),
                body,
            },
        }
    }

    /// The backend could not be reached or would not serve the request.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LlmError::ConnectionError(_)
                | LlmError::Timeout(_)
                | LlmError::AuthError(_)
                | LlmError::StatusError { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::ConnectionError(_) | LlmError::Timeout(_) => true,
            LlmError::StatusError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::Timeout(msg) => write!(f, "LLM request timed out: {}", msg),
            LlmError::AuthError(msg) => write!(f, "LLM authentication error: {}", msg),
            LlmError::StatusError { status, body } => {
                write!(f, "LLM API responded with status code {}: {}", status, body)
            }
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// A hosted model that turns an instruction plus a user message into text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff: base, 2×base, 4×base, … capped at 32×base.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

/// Wraps a backend with bounded retry on transient failures.
pub struct CompletionClient {
    backend: Box<dyn CompletionBackend>,
    retry: RetryPolicy,
}

impl CompletionClient {
    pub fn new(backend: Box<dyn CompletionBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let backend: Box<dyn CompletionBackend> = match config.backend.as_str() {
            "openai" | "remote" => Box::new(providers::remote::RemoteLlmProvider::openai(config)?),
            "azure" => Box::new(providers::remote::RemoteLlmProvider::azure(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        let retry = RetryPolicy {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        };

        Ok(Self::new(backend, retry))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }

            match self.backend.complete(system, user).await {
                Ok(text) => {
                    if attempt > 0 {
                        info!("{} answered after {} retries", self.backend.name(), attempt);
                    }
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} request failed ({}), retry {}/{}",
                        self.backend.name(),
                        e,
                        attempt,
                        self.retry.max_retries
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays canned answers in order and counts calls.
    pub struct ScriptedBackend {
        answers: Mutex<VecDeque<Result<String, LlmError>>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedBackend {
        pub fn new(answers: Vec<Result<String, LlmError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn answering(text: &str) -> Self {
            Self::new(vec![Ok(text.to_string())])
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::ResponseError("script exhausted".to_string())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    struct Shared(Arc<ScriptedBackend>);

    #[async_trait]
    impl CompletionBackend for Shared {
        async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
            self.0.complete(system, user).await
        }

        fn name(&self) -> &str {
            "shared"
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(LlmError::Timeout("slow".to_string())),
            Err(LlmError::StatusError { status: 503, body: String::new() }),
            Ok("```sql\nSELECT 1\n```".to_string()),
        ]));
        let client = CompletionClient::new(Box::new(Shared(backend.clone())), fast_retry(3));

        let text = client.complete("system", "question").await.unwrap();

        assert_eq!(text, "```sql\nSELECT 1\n```");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(LlmError::AuthError("bad key".to_string())),
            Ok("unused".to_string()),
        ]));
        let client = CompletionClient::new(Box::new(Shared(backend.clone())), fast_retry(3));

        let err = client.complete("system", "question").await.unwrap_err();

        assert!(matches!(err, LlmError::AuthError(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_stop_at_the_budget() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(LlmError::StatusError { status: 429, body: String::new() }),
            Err(LlmError::StatusError { status: 429, body: String::new() }),
            Err(LlmError::StatusError { status: 429, body: String::new() }),
        ]));
        let client = CompletionClient::new(Box::new(Shared(backend.clone())), fast_retry(1));

        let err = client.complete("system", "question").await.unwrap_err();

        assert!(matches!(err, LlmError::StatusError { status: 429, .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(9), Duration::from_millis(3200));
    }

    #[test]
    fn status_classification() {
        assert!(LlmError::from_status(StatusCode::UNAUTHORIZED, String::new()).is_transport());
        assert!(!LlmError::from_status(StatusCode::UNAUTHORIZED, String::new()).is_retryable());
        assert!(LlmError::from_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(!LlmError::from_status(StatusCode::BAD_REQUEST, String::new()).is_retryable());
        assert!(!LlmError::ResponseError("no choices".to_string()).is_transport());
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let mut config = crate::config::AppConfig::default().llm;
        config.backend = "carrier-pigeon".to_string();

        let err = CompletionClient::from_config(&config).err().unwrap();

        assert!(matches!(err, LlmError::ConfigError(_)));
    }
}
