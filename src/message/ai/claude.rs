//! Anthropic Messages API client implementation.

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

/// Default Anthropic endpoint.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Claude API request message.
#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Claude API request body.
#[derive(Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

/// Claude API response content.
#[derive(Deserialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

/// Claude API response.
#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<Content>,
}

/// Claude API client implementation.
pub struct ClaudeAiClient {
    /// HTTP client for API requests.
    client: Client,
    /// API key for authentication.
    api_key: String,
    /// Model identifier.
    model: String,
    /// API root, overridable for proxies.
    base_url: String,
    /// Maximum tokens for responses.
    max_tokens: u32,
}

impl ClaudeAiClient {
    /// Creates a new Claude AI client.
    pub fn new(
        model: String,
        api_key: String,
        base_url: Option<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
            max_tokens,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

impl AiClient for ClaudeAiClient {
    fn send_request<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, AiError>> + Send + 'a>> {
        Box::pin(async move {
            let request = ClaudeRequest {
                model: self.model.clone(),
                max_tokens: self.max_tokens,
                system: system_prompt.to_string(),
                messages: vec![Message {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                }],
            };

            let url = self.messages_url();
            info!(url = %url, model = %self.model, max_tokens = self.max_tokens, "Sending request to Claude API");

            let response = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .json(&request)
                .send()
                .await
                .map_err(|e| AiError::from_reqwest(&e))?;
            let response = check_error_response(response).await?;

            let claude_response: ClaudeResponse = response
                .json()
                .await
                .map_err(|e| AiError::InvalidResponseFormat(e.to_string()))?;

            debug!(
                content_count = claude_response.content.len(),
                "Received Claude API response"
            );

            let text = claude_response
                .content
                .into_iter()
                .find(|c| c.content_type == "text")
                .map(|c| c.text)
                .ok_or_else(|| {
                    AiError::InvalidResponseFormat("No text content in response".to_string())
                })?;

            log_response_success("Claude", &text);
            Ok(text)
        })
    }

    fn get_metadata(&self) -> AiClientMetadata {
        AiClientMetadata {
            provider: "Anthropic".to_string(),
            model: self.model.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: String) -> ClaudeAiClient {
        ClaudeAiClient::new(
            "claude-haiku".to_string(),
            "key-123".to_string(),
            Some(base_url),
            512,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn extracts_text_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "key-123"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "fix(io): close file handles"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client(server.uri()).send_request("sys", "diff").await.unwrap();
        assert_eq!(text, "fix(io): close file handles");
    }

    #[tokio::test]
    async fn unauthorized_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client(server.uri()).send_request("sys", "diff").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
