/*!
 * Generation Module
 * Text-generation backends behind a common trait, tried in order with
 * fallback. The service is constructed once at startup and injected into the
 * router as shared state.
 */
pub mod local;
pub mod remote;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

pub use local::LocalModelBackend;
pub use remote::HostedApiBackend;

/// Default per-attempt timeout for a single backend invocation.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Errors from the generation backends
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("generation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("generation backend returned status {0}")]
    BadStatus(u16),

    #[error("generation backend returned a malformed response")]
    MalformedResponse,

    #[error("generation backend returned empty output")]
    Empty,

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("no generation backends configured")]
    NoBackends,
}

/// Parameters for one blog draft request. The word count is carried in the
/// prompt as a hint; backends cap output length independently, so it is
/// advisory rather than a guarantee.
#[derive(Debug, Clone)]
pub struct BlogPrompt {
    pub title: String,
    pub audience: String,
    pub word_count: u32,
}

impl BlogPrompt {
    pub fn render(&self) -> String {
        format!(
            "Write a {}-word blog for {} about {}.",
            self.word_count, self.audience, self.title
        )
    }
}

/// A text-generation capability (local model server, hosted API, ...)
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &str;

    /// Produce text for the given prompt
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

/// Ordered chain of generation backends.
///
/// Backends are tried in order; the first success wins and exhaustion yields
/// the last error. Invocations are serialized behind a mutex because the
/// primary capability is not assumed safe for concurrent use, and each
/// attempt runs under a timeout so a wedged backend cannot hang the caller.
pub struct GenerationService {
    backends: Vec<Box<dyn TextGenerator>>,
    invoke_lock: Mutex<()>,
    timeout: Duration,
}

impl GenerationService {
    pub fn new(backends: Vec<Box<dyn TextGenerator>>, timeout: Duration) -> Self {
        Self {
            backends,
            invoke_lock: Mutex::new(()),
            timeout,
        }
    }

    /// Build the backend chain from environment configuration: the local
    /// model server is always first; the hosted API is appended as a
    /// fallback only when an API key is configured.
    pub fn from_env() -> Self {
        let mut backends: Vec<Box<dyn TextGenerator>> = vec![Box::new(LocalModelBackend::from_env())];

        if let Some(hosted) = HostedApiBackend::from_env() {
            backends.push(Box::new(hosted));
        }

        let timeout = std::env::var("GENERATION_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self::new(backends, Duration::from_secs(timeout))
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Generate a blog draft, falling back through the configured backends.
    pub async fn generate(&self, prompt: &BlogPrompt) -> Result<String, GenerateError> {
        if self.backends.is_empty() {
            return Err(GenerateError::NoBackends);
        }

        let rendered = prompt.render();

        // One invocation at a time across the whole process
        let _guard = self.invoke_lock.lock().await;

        let mut last_error = GenerateError::NoBackends;
        for backend in &self.backends {
            tracing::debug!(backend = backend.name(), "invoking generation backend");

            let attempt = tokio::time::timeout(self.timeout, backend.generate(&rendered)).await;
            let result = match attempt {
                Ok(r) => r,
                Err(_) => Err(GenerateError::Timeout(self.timeout)),
            };

            match result {
                Ok(text) if !text.trim().is_empty() => {
                    tracing::info!(
                        backend = backend.name(),
                        chars = text.len(),
                        "generation succeeded"
                    );
                    return Ok(text);
                }
                Ok(_) => {
                    tracing::warn!(backend = backend.name(), "backend returned empty output");
                    last_error = GenerateError::Empty;
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "backend failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
