//! Text-generation client trait and the HTTP helpers its implementations share.

pub mod claude;
pub mod openai;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;

use super::error::AiError;

/// Default bound on a single completion request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Metadata about an AI client implementation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AiClientMetadata {
    /// Service provider name.
    pub provider: String,
    /// Model identifier.
    pub model: String,
}

/// Builds an HTTP client with the given request timeout.
pub(crate) fn build_http_client(timeout: Duration) -> Result<Client, AiError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AiError::ClientBuild(e.to_string()))
}

/// Turns a non-success HTTP response into [`AiError::ApiRequestFailed`].
pub(crate) async fn check_error_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, AiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_else(|e| {
        tracing::debug!("Failed to read error response body: {e}");
        String::new()
    });
    Err(AiError::ApiRequestFailed {
        status: status.as_u16(),
        body,
    })
}

/// Logs successful text extraction from an AI API response.
pub(crate) fn log_response_success(provider: &str, text: &str) {
    tracing::debug!(
        response_len = text.len(),
        "Successfully extracted text content from {} API response",
        provider
    );
    tracing::trace!(response_content = %text, "{} API response content", provider);
}

/// Trait for AI service clients.
pub trait AiClient: Send + Sync {
    /// Sends a request to the AI service and returns the raw response text.
    fn send_request<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, AiError>> + Send + 'a>>;

    /// Returns metadata about the AI client implementation.
    fn get_metadata(&self) -> AiClientMetadata;
}
