//! Errors from text generation, ticket escalation and message validation.

use thiserror::Error;

/// Failure talking to a text-generation backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AiError {
    /// No API key was found for the configured provider.
    #[error("API key not found. Set one of: {0}")]
    ApiKeyNotFound(String),

    /// The request did not complete in time.
    #[error("Request timed out")]
    Timeout,

    /// The backend could not be reached.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The backend answered with an error status.
    #[error("API request failed: HTTP {status}: {body}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The backend answered with something that is not a usable completion.
    #[error("Invalid response format: {0}")]
    InvalidResponseFormat(String),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl AiError {
    /// Returns true for failures worth retrying: timeouts, network errors,
    /// server errors, rate limiting and malformed responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::NetworkError(_) | Self::InvalidResponseFormat(_) => true,
            Self::ApiRequestFailed { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            Self::ApiKeyNotFound(_) | Self::ClientBuild(_) => false,
        }
    }

    pub(crate) fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::NetworkError(e.to_string())
        }
    }
}

/// Failure talking to the escalation ticket system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketError {
    /// Required settings such as the API key or team are missing.
    #[error("Ticket system not configured: {0}")]
    NotConfigured(String),

    /// The ticket system could not be reached.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The ticket system rejected the request.
    #[error("Ticket API error: {0}")]
    Api(String),

    /// The ticket system answered with an unexpected payload.
    #[error("Invalid ticket API response: {0}")]
    InvalidResponse(String),
}

/// A candidate commit message failed the structural check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Nothing left after trimming.
    #[error("Commit message is empty")]
    Empty,

    /// The summary line exceeds the length bound.
    #[error("First line is {length} characters, limit is {limit}")]
    FirstLineTooLong {
        /// Characters in the first line.
        length: usize,
        /// Allowed maximum.
        limit: usize,
    },
}

/// No commit message could be produced for a diff.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The model failed and no escalation path is configured.
    #[error("Commit message generation failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Model calls made.
        attempts: u32,
        /// Last failure observed.
        last_error: String,
    },

    /// The escalation ticket could not be created.
    #[error("Escalation failed: {0}")]
    EscalationFailed(#[from] TicketError),

    /// Nobody answered the ticket within the polling window.
    #[error("No reply on ticket {ticket_id} within the polling window")]
    EscalationTimedOut {
        /// Ticket that was polled.
        ticket_id: String,
    },

    /// The stop signal was raised while waiting.
    #[error("Commit message generation cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        for status in [500, 502, 503, 429, 408] {
            let error = AiError::ApiRequestFailed {
                status,
                body: String::new(),
            };
            assert!(error.is_transient(), "HTTP {status} should be transient");
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        for status in [400, 401, 403, 404] {
            let error = AiError::ApiRequestFailed {
                status,
                body: String::new(),
            };
            assert!(!error.is_transient(), "HTTP {status} should be permanent");
        }
        assert!(!AiError::ApiKeyNotFound("OPENAI_API_KEY".to_string()).is_transient());
    }

    #[test]
    fn transport_failures_are_transient() {
        assert!(AiError::Timeout.is_transient());
        assert!(AiError::NetworkError("refused".to_string()).is_transient());
        assert!(AiError::InvalidResponseFormat("no choices".to_string()).is_transient());
    }
}
