//! OpenAI-compatible API client implementation (works with OpenAI, Ollama, etc.)

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    build_http_client, check_error_response, log_response_success, AiClient, AiClientMetadata,
};
use crate::message::error::AiError;

/// Default Ollama endpoint.
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Default OpenAI endpoint.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// OpenAI API request message
#[derive(Serialize, Debug)]
struct Message {
    role: String,
    content: String,
}

/// OpenAI API request body
#[derive(Serialize, Debug)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

/// OpenAI API response choice
#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

/// OpenAI API response message
#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: Option<String>,
}

/// OpenAI API response
#[derive(Deserialize, Debug)]
struct OpenAiResponse {
    choices: Vec<Choice>,
    model: Option<String>,
}

/// OpenAI-compatible API client (works with OpenAI, Ollama, etc.)
pub struct OpenAiAiClient {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication (optional for Ollama)
    api_key: Option<String>,
    /// Model identifier
    model: String,
    /// Base URL for the API (e.g., "https://api.openai.com" or "http://localhost:11434")
    base_url: String,
    /// Maximum tokens for responses
    max_tokens: u32,
    /// Temperature for response generation
    temperature: Option<f32>,
}

impl OpenAiAiClient {
    /// Create a new OpenAI-compatible API client
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: String,
        max_tokens: u32,
        temperature: Option<f32>,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            model,
            base_url,
            max_tokens,
            temperature,
        })
    }

    /// Create a new client for Ollama with sensible defaults
    pub fn new_ollama(
        model: String,
        base_url: Option<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        Self::new(
            model,
            None, // No API key needed for Ollama
            base_url.unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            max_tokens,
            Some(0.3),
            timeout,
        )
    }

    /// Create a new client for OpenAI with sensible defaults
    pub fn new_openai(
        model: String,
        api_key: String,
        base_url: Option<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        Self::new(
            model,
            Some(api_key),
            base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            max_tokens,
            Some(0.3),
            timeout,
        )
    }

    /// Build the full API URL
    fn get_api_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{base}/v1/chat/completions");
        debug!(base_url = %self.base_url, full_url = %url, "Constructed OpenAI-compatible API URL");
        url
    }

    /// Determine if this is likely an Ollama instance
    fn is_ollama(&self) -> bool {
        self.base_url.contains("localhost")
            || self.base_url.contains("127.0.0.1")
            || self.api_key.is_none()
    }

    /// Reasoning models take `max_completion_tokens` and only the default temperature
    fn uses_completion_tokens(&self) -> bool {
        self.model.starts_with("gpt-5") || self.model.starts_with("o1")
    }
}

impl AiClient for OpenAiAiClient {
    fn send_request<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, AiError>> + Send + 'a>> {
        Box::pin(async move {
            let mut messages = Vec::with_capacity(2);
            if !system_prompt.is_empty() {
                messages.push(Message {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                });
            }
            messages.push(Message {
                role: "user".to_string(),
                content: user_prompt.to_string(),
            });

            let request = if self.uses_completion_tokens() {
                OpenAiRequest {
                    model: self.model.clone(),
                    messages,
                    max_tokens: None,
                    max_completion_tokens: Some(self.max_tokens),
                    temperature: None,
                    stream: false,
                }
            } else {
                OpenAiRequest {
                    model: self.model.clone(),
                    messages,
                    max_tokens: Some(self.max_tokens),
                    max_completion_tokens: None,
                    temperature: self.temperature,
                    stream: false,
                }
            };

            let api_url = self.get_api_url();
            info!(url = %api_url, model = %self.model, "Sending request to OpenAI-compatible API");

            let mut req_builder = self
                .client
                .post(&api_url)
                .header("Content-Type", "application/json")
                .json(&request);

            if let Some(ref api_key) = self.api_key {
                req_builder = req_builder.header("Authorization", format!("Bearer {api_key}"));
            }

            let response = req_builder
                .send()
                .await
                .map_err(|e| AiError::from_reqwest(&e))?;
            let response = check_error_response(response).await?;

            let openai_response: OpenAiResponse = response
                .json()
                .await
                .map_err(|e| AiError::InvalidResponseFormat(e.to_string()))?;

            debug!(
                choice_count = openai_response.choices.len(),
                model = ?openai_response.model,
                "Received OpenAI-compatible API response"
            );

            let text = openai_response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| {
                    AiError::InvalidResponseFormat("No choices in response".to_string())
                })?;

            log_response_success(&self.get_metadata().provider, &text);
            Ok(text)
        })
    }

    fn get_metadata(&self) -> AiClientMetadata {
        let provider = if self.is_ollama() { "Ollama" } else { "OpenAI" };
        AiClientMetadata {
            provider: provider.to_string(),
            model: self.model.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn new_ollama_defaults() {
        let client = OpenAiAiClient::new_ollama("llama3".to_string(), None, 256, TIMEOUT).unwrap();
        assert_eq!(client.base_url, OLLAMA_BASE_URL);
        assert!(client.api_key.is_none());
        assert!(client.is_ollama());
        assert_eq!(client.get_metadata().provider, "Ollama");
    }

    #[test]
    fn api_url_ignores_trailing_slash() {
        let client = OpenAiAiClient::new(
            "m".to_string(),
            None,
            "http://localhost:11434/".to_string(),
            256,
            None,
            TIMEOUT,
        )
        .unwrap();
        assert_eq!(client.get_api_url(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn openai_with_key_is_not_ollama() {
        let client = OpenAiAiClient::new_openai(
            "gpt-4o-mini".to_string(),
            "sk-test".to_string(),
            None,
            256,
            TIMEOUT,
        )
        .unwrap();
        assert!(!client.is_ollama());
        assert_eq!(client.get_metadata().provider, "OpenAI");
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "gpt-4o-mini", "max_tokens": 256})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "choices": [{"message": {"role": "assistant", "content": "feat: add parser"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiAiClient::new_openai(
            "gpt-4o-mini".to_string(),
            "sk-test".to_string(),
            Some(server.uri()),
            256,
            TIMEOUT,
        )
        .unwrap();

        let text = client.send_request("system", "diff").await.unwrap();
        assert_eq!(text, "feat: add parser");
    }

    #[tokio::test]
    async fn server_error_is_reported_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client =
            OpenAiAiClient::new_ollama("llama3".to_string(), Some(server.uri()), 256, TIMEOUT)
                .unwrap();

        let err = client.send_request("", "diff").await.unwrap_err();
        assert_eq!(
            err,
            AiError::ApiRequestFailed {
                status: 503,
                body: "overloaded".to_string()
            }
        );
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn empty_choices_are_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let client =
            OpenAiAiClient::new_ollama("llama3".to_string(), Some(server.uri()), 256, TIMEOUT)
                .unwrap();

        let err = client.send_request("", "diff").await.unwrap_err();
        assert!(matches!(err, AiError::InvalidResponseFormat(_)));
    }
}
