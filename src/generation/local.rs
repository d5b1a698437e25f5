/*!
 * Local model backend
 * Client for an Ollama-compatible model server running alongside the app.
 *
 * Sampling options are fixed and capped well below any requested word count
 * (512 new tokens, temperature 0.7, 1024-token context), so the word count in
 * the prompt is a hint the model may undershoot, not a length guarantee.
 */
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{GenerateError, TextGenerator};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_MODEL: &str = "llama2";

/// Output length cap, applied regardless of the requested word count
const MAX_NEW_TOKENS: u32 = 512;
const TEMPERATURE: f32 = 0.7;
const CONTEXT_LENGTH: u32 = 1024;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
    num_ctx: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Primary generation backend: a local model server.
///
/// The model list is probed once per process on first use and the result
/// cached; a failed probe is returned to the caller as `ModelUnavailable`
/// (never a panic) and retried on the next call.
pub struct LocalModelBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    loaded: OnceCell<()>,
}

impl LocalModelBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            model: model.into(),
            loaded: OnceCell::new(),
        }
    }

    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("LOCAL_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(base_url, model)
    }

    /// Verify the configured model exists on the server. Runs at most once
    /// per process on success; failures are not cached so a server that
    /// comes up later starts working without a restart.
    async fn ensure_loaded(&self) -> Result<(), GenerateError> {
        self.loaded
            .get_or_try_init(|| async {
                let url = format!("{}/api/tags", self.base_url);
                let response = self.client.get(&url).send().await?;

                if !response.status().is_success() {
                    return Err(GenerateError::BadStatus(response.status().as_u16()));
                }

                let tags: TagsResponse = response
                    .json()
                    .await
                    .map_err(|_| GenerateError::MalformedResponse)?;

                let available = tags.models.iter().any(|m| {
                    m.name == self.model || m.name.split(':').next() == Some(self.model.as_str())
                });

                if available {
                    tracing::info!(model = %self.model, "local model verified and cached");
                    Ok(())
                } else {
                    Err(GenerateError::ModelUnavailable(format!(
                        "model '{}' not found on local server",
                        self.model
                    )))
                }
            })
            .await
            .map(|_| ())
    }
}

#[async_trait::async_trait]
impl TextGenerator for LocalModelBackend {
    fn name(&self) -> &str {
        "local-model"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        self.ensure_loaded().await?;

        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: MAX_NEW_TOKENS,
                temperature: TEMPERATURE,
                num_ctx: CONTEXT_LENGTH,
            },
        };

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(GenerateError::BadStatus(response.status().as_u16()));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|_| GenerateError::MalformedResponse)?;

        if parsed.response.trim().is_empty() {
            return Err(GenerateError::Empty);
        }

        Ok(parsed.response)
    }
}
