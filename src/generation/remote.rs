/*!
 * Hosted inference API backend
 * Fallback path: forwards the prompt to a hosted text-generation API
 * (Hugging Face inference style) with a bearer key from the environment.
 */
use serde::Deserialize;
use std::time::Duration;

use super::{GenerateError, TextGenerator};

const DEFAULT_API_URL: &str = "https://api-inference.huggingface.co/models/gpt2";

#[derive(Debug, Deserialize)]
struct Completion {
    generated_text: String,
}

/// Fallback generation backend calling a hosted inference API.
///
/// Request body is `{"inputs": prompt}`; the response is a JSON list whose
/// first element carries `generated_text`.
pub struct HostedApiBackend {
    client: reqwest::Client,
    url: String,
    api_token: String,
}

impl HostedApiBackend {
    pub fn new(url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            url: url.into(),
            api_token: api_token.into(),
        }
    }

    /// Only constructed when an API token is configured; without one the
    /// fallback is simply absent from the chain.
    pub fn from_env() -> Option<Self> {
        let api_token = std::env::var("HF_API_TOKEN").ok()?;
        let url = std::env::var("HF_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Some(Self::new(url, api_token))
    }
}

#[async_trait::async_trait]
impl TextGenerator for HostedApiBackend {
    fn name(&self) -> &str {
        "hosted-api"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({ "inputs": prompt }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenerateError::BadStatus(response.status().as_u16()));
        }

        let completions: Vec<Completion> = response
            .json()
            .await
            .map_err(|_| GenerateError::MalformedResponse)?;

        let text = completions
            .into_iter()
            .next()
            .map(|c| c.generated_text)
            .ok_or(GenerateError::MalformedResponse)?;

        if text.trim().is_empty() {
            return Err(GenerateError::Empty);
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_generate_extracts_first_completion() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/models/gpt2"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_json(serde_json::json!({"inputs": "Write a blog"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"generated_text": "First draft"},
                {"generated_text": "Second draft"}
            ])))
            .mount(&server)
            .await;

        let backend = HostedApiBackend::new(format!("{}/models/gpt2", server.uri()), "test-key");
        let text = backend.generate("Write a blog").await.unwrap();
        assert_eq!(text, "First draft");
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/models/gpt2"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let backend = HostedApiBackend::new(format!("{}/models/gpt2", server.uri()), "test-key");
        let err = backend.generate("Write a blog").await.unwrap_err();
        assert!(matches!(err, GenerateError::BadStatus(503)));
    }

    #[tokio::test]
    async fn test_empty_completion_list_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/models/gpt2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let backend = HostedApiBackend::new(format!("{}/models/gpt2", server.uri()), "test-key");
        let err = backend.generate("Write a blog").await.unwrap_err();
        assert!(matches!(err, GenerateError::MalformedResponse));
    }
}
