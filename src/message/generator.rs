//! Commit message generation with retry, backoff and ticket escalation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::ai::{AiClient, DEFAULT_REQUEST_TIMEOUT};
use super::error::{AiError, GenerationError};
use super::prompts::{generate_commit_prompt, COMMIT_SYSTEM_PROMPT};
use super::ticket::{TicketRequest, TicketStatus, TicketSystem};
use super::validate::validate_message;
use crate::utils::shutdown::{cancelled, is_cancelled};

/// Retry limits for calls to the text-generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Model calls made before giving up on transient failures.
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each further failure.
    pub initial_backoff: Duration,
    /// Upper bound on a single delay.
    pub max_backoff: Duration,
    /// Bound on a single model call.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// How an escalation ticket is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    /// Wait between polls.
    pub poll_interval: Duration,
    /// Give up after this long; `None` polls until cancelled.
    pub max_poll_duration: Option<Duration>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_poll_duration: Some(Duration::from_secs(60 * 60)),
        }
    }
}

/// Where an accepted message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSource {
    /// The text-generation backend.
    Model {
        /// Calls made, including the successful one.
        attempts: u32,
    },
    /// A reply on an escalation ticket.
    Ticket {
        /// Ticket the reply was read from.
        ticket_id: String,
    },
}

/// A commit message that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMessage {
    /// The message.
    pub text: String,
    /// Its origin.
    pub source: MessageSource,
}

enum ModelOutcome {
    Accepted(GeneratedMessage),
    GaveUp { attempts: u32, last_error: String },
}

/// Produces commit messages for staged diffs.
pub struct MessageGenerator {
    client: Arc<dyn AiClient>,
    tickets: Option<Arc<dyn TicketSystem>>,
    retry: RetryPolicy,
    escalation: EscalationPolicy,
}

impl MessageGenerator {
    /// Creates a generator without an escalation path.
    pub fn new(client: Arc<dyn AiClient>, retry: RetryPolicy) -> Self {
        Self {
            client,
            tickets: None,
            retry,
            escalation: EscalationPolicy::default(),
        }
    }

    /// Escalates to `tickets` when the model cannot produce a message.
    #[must_use]
    pub fn with_escalation(
        mut self,
        tickets: Arc<dyn TicketSystem>,
        escalation: EscalationPolicy,
    ) -> Self {
        self.tickets = Some(tickets);
        self.escalation = escalation;
        self
    }

    /// Returns a validated commit message for `diff`.
    ///
    /// Transient model failures are retried with exponential backoff up to
    /// the attempt ceiling; an invalid message is retried once. After that
    /// the request is escalated to the ticket system, if one is configured,
    /// and the ticket is polled until it yields a message. Raising the stop
    /// signal ends either loop with [`GenerationError::Cancelled`].
    pub async fn generate(
        &self,
        diff: &str,
        style_guide: &str,
        paths: &[String],
        mut cancel: watch::Receiver<bool>,
    ) -> Result<GeneratedMessage, GenerationError> {
        match self
            .ask_model(diff, style_guide, paths, &mut cancel)
            .await?
        {
            ModelOutcome::Accepted(message) => Ok(message),
            ModelOutcome::GaveUp {
                attempts,
                last_error,
            } => {
                self.escalate(diff, paths, attempts, last_error, &mut cancel)
                    .await
            }
        }
    }

    async fn ask_model(
        &self,
        diff: &str,
        style_guide: &str,
        paths: &[String],
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<ModelOutcome, GenerationError> {
        let user_prompt = generate_commit_prompt(diff, style_guide, paths);
        let metadata = self.client.get_metadata();
        let mut attempts = 0;
        let mut invalid_retried = false;

        loop {
            if is_cancelled(cancel) {
                return Err(GenerationError::Cancelled);
            }
            attempts += 1;
            debug!(
                attempt = attempts,
                provider = %metadata.provider,
                model = %metadata.model,
                "Requesting commit message"
            );

            let request = timeout(
                self.retry.request_timeout,
                self.client.send_request(COMMIT_SYSTEM_PROMPT, &user_prompt),
            );
            let result = tokio::select! {
                result = request => result.unwrap_or(Err(AiError::Timeout)),
                () = cancelled(cancel) => return Err(GenerationError::Cancelled),
            };

            let error = match result {
                Ok(raw) => match validate_message(&raw) {
                    Ok(text) => {
                        info!(attempt = attempts, "Generated commit message");
                        return Ok(ModelOutcome::Accepted(GeneratedMessage {
                            text,
                            source: MessageSource::Model { attempts },
                        }));
                    }
                    Err(e) if !invalid_retried => {
                        warn!(attempt = attempts, "Model returned an invalid commit message, retrying: {e}");
                        invalid_retried = true;
                        continue;
                    }
                    Err(e) => {
                        warn!(attempt = attempts, "Model returned an invalid commit message again: {e}");
                        return Ok(ModelOutcome::GaveUp {
                            attempts,
                            last_error: e.to_string(),
                        });
                    }
                },
                Err(e) => e,
            };

            if !error.is_transient() || attempts >= self.retry.max_attempts {
                warn!(
                    attempt = attempts,
                    transient = error.is_transient(),
                    "Giving up on text generation: {error}"
                );
                return Ok(ModelOutcome::GaveUp {
                    attempts,
                    last_error: error.to_string(),
                });
            }

            let delay = self.retry.backoff(attempts);
            warn!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Text generation failed, backing off: {error}"
            );
            tokio::select! {
                () = sleep(delay) => {}
                () = cancelled(cancel) => return Err(GenerationError::Cancelled),
            }
        }
    }

    async fn escalate(
        &self,
        diff: &str,
        paths: &[String],
        attempts: u32,
        last_error: String,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<GeneratedMessage, GenerationError> {
        let Some(tickets) = &self.tickets else {
            return Err(GenerationError::Exhausted {
                attempts,
                last_error,
            });
        };

        let request = TicketRequest::for_commit(diff, paths);
        let ticket_id = tokio::select! {
            created = tickets.create_ticket(&request) => created?,
            () = cancelled(cancel) => return Err(GenerationError::Cancelled),
        };
        info!(ticket_id = %ticket_id, attempts, "Escalated commit message request to ticket");

        let started = Instant::now();
        let mut polls: u32 = 0;
        loop {
            polls += 1;
            let status = tokio::select! {
                status = tickets.poll_ticket(&ticket_id) => status,
                () = cancelled(cancel) => return Err(GenerationError::Cancelled),
            };

            match status {
                Ok(TicketStatus::Resolved(reply)) => match validate_message(&reply) {
                    Ok(text) => {
                        info!(ticket_id = %ticket_id, polls, "Received commit message from ticket");
                        return Ok(GeneratedMessage {
                            text,
                            source: MessageSource::Ticket { ticket_id },
                        });
                    }
                    Err(e) => warn!(ticket_id = %ticket_id, "Ignoring invalid ticket reply: {e}"),
                },
                Ok(TicketStatus::Pending) => debug!(ticket_id = %ticket_id, polls, "Ticket still pending"),
                Err(e) => warn!(ticket_id = %ticket_id, polls, "Polling ticket failed: {e}"),
            }

            if let Some(max) = self.escalation.max_poll_duration {
                if started.elapsed() >= max {
                    warn!(ticket_id = %ticket_id, polls, "Gave up waiting for ticket reply");
                    return Err(GenerationError::EscalationTimedOut { ticket_id });
                }
            }

            tokio::select! {
                () = sleep(self.escalation.poll_interval) => {}
                () = cancelled(cancel) => return Err(GenerationError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::message::error::TicketError;
    use crate::message::test_utils::{ConfigurableMockAiClient, ScriptedTicketSystem};
    use std::future::Future;
    use std::pin::Pin;

    const DIFF: &str = "+fn parse() {}\n";

    fn paths() -> Vec<String> {
        vec!["src/parse.rs".to_string()]
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn escalation() -> EscalationPolicy {
        EscalationPolicy {
            poll_interval: Duration::from_secs(30),
            max_poll_duration: None,
        }
    }

    fn unavailable() -> Result<String, AiError> {
        Err(AiError::ApiRequestFailed {
            status: 503,
            body: "unavailable".to_string(),
        })
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = retry();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(10), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success() {
        let client = ConfigurableMockAiClient::new(vec![unavailable(), Ok("feat: add parser".to_string())]);
        let prompts = client.prompt_handle();
        let generator = MessageGenerator::new(Arc::new(client), retry());

        let message = generator.generate(DIFF, "", &paths(), no_cancel()).await.unwrap();

        assert_eq!(message.text, "feat: add parser");
        assert_eq!(message.source, MessageSource::Model { attempts: 2 });
        assert_eq!(prompts.request_count(), 2);
        let (system, user) = &prompts.prompts()[0];
        assert_eq!(system, COMMIT_SYSTEM_PROMPT);
        assert!(user.contains(DIFF));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_without_ticket_system() {
        let client = ConfigurableMockAiClient::new(vec![unavailable(), unavailable(), unavailable()]);
        let prompts = client.prompt_handle();
        let generator = MessageGenerator::new(Arc::new(client), retry());

        let err = generator.generate(DIFF, "", &paths(), no_cancel()).await.unwrap_err();

        assert!(matches!(err, GenerationError::Exhausted { attempts: 3, .. }));
        assert_eq!(prompts.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let client = ConfigurableMockAiClient::new(vec![Err(AiError::ApiRequestFailed {
            status: 401,
            body: "bad key".to_string(),
        })]);
        let prompts = client.prompt_handle();
        let generator = MessageGenerator::new(Arc::new(client), retry());

        let err = generator.generate(DIFF, "", &paths(), no_cancel()).await.unwrap_err();

        assert!(matches!(err, GenerationError::Exhausted { attempts: 1, .. }));
        assert_eq!(prompts.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_message_is_retried_once_then_escalated() {
        let long = "x".repeat(150);
        let client = ConfigurableMockAiClient::new(vec![Ok(long.clone()), Ok(long)]);
        let prompts = client.prompt_handle();
        let tickets = Arc::new(ScriptedTicketSystem::new(
            "T-1",
            vec![Ok(TicketStatus::Resolved("docs: explain parser".to_string()))],
        ));
        let generator = MessageGenerator::new(Arc::new(client), retry())
            .with_escalation(tickets.clone(), escalation());

        let message = generator.generate(DIFF, "", &paths(), no_cancel()).await.unwrap();

        assert_eq!(prompts.request_count(), 2);
        assert_eq!(message.text, "docs: explain parser");
        assert_eq!(tickets.created().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_escalate_and_use_ticket_reply() {
        let client = ConfigurableMockAiClient::new(vec![unavailable(), unavailable(), unavailable()]);
        let tickets = Arc::new(ScriptedTicketSystem::new(
            "T-7",
            vec![
                Ok(TicketStatus::Pending),
                Ok(TicketStatus::Resolved("fix(parser): handle empty input".to_string())),
            ],
        ));
        let generator = MessageGenerator::new(Arc::new(client), retry())
            .with_escalation(tickets.clone(), escalation());

        let message = generator.generate(DIFF, "", &paths(), no_cancel()).await.unwrap();

        assert_eq!(message.text, "fix(parser): handle empty input");
        assert_eq!(
            message.source,
            MessageSource::Ticket {
                ticket_id: "T-7".to_string()
            }
        );
        assert_eq!(tickets.poll_count(), 2);
        let created = tickets.created();
        assert_eq!(created.len(), 1);
        assert!(created[0].description.contains(DIFF));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_do_not_stop_polling() {
        let client = ConfigurableMockAiClient::new(vec![]);
        let tickets = Arc::new(ScriptedTicketSystem::new(
            "T-2",
            vec![
                Err(TicketError::NetworkError("reset".to_string())),
                Ok(TicketStatus::Resolved("chore: bump deps".to_string())),
            ],
        ));
        let generator = MessageGenerator::new(
            Arc::new(client),
            RetryPolicy {
                max_attempts: 1,
                ..retry()
            },
        )
        .with_escalation(tickets.clone(), escalation());

        let message = generator.generate(DIFF, "", &paths(), no_cancel()).await.unwrap();
        assert_eq!(message.text, "chore: bump deps");
        assert_eq!(tickets.poll_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticket_creation_failure_is_reported() {
        let client = ConfigurableMockAiClient::new(vec![]);
        let generator = MessageGenerator::new(
            Arc::new(client),
            RetryPolicy {
                max_attempts: 1,
                ..retry()
            },
        )
        .with_escalation(Arc::new(ScriptedTicketSystem::unreachable()), escalation());

        let err = generator.generate(DIFF, "", &paths(), no_cancel()).await.unwrap_err();
        assert!(matches!(err, GenerationError::EscalationFailed(TicketError::NetworkError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_gives_up_after_max_duration() {
        let client = ConfigurableMockAiClient::new(vec![]);
        let tickets = Arc::new(ScriptedTicketSystem::new("T-3", vec![]));
        let generator = MessageGenerator::new(
            Arc::new(client),
            RetryPolicy {
                max_attempts: 1,
                ..retry()
            },
        )
        .with_escalation(
            tickets.clone(),
            EscalationPolicy {
                poll_interval: Duration::from_secs(30),
                max_poll_duration: Some(Duration::from_secs(90)),
            },
        );

        let err = generator.generate(DIFF, "", &paths(), no_cancel()).await.unwrap_err();
        assert_eq!(
            err,
            GenerationError::EscalationTimedOut {
                ticket_id: "T-3".to_string()
            }
        );
        assert_eq!(tickets.poll_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let client = ConfigurableMockAiClient::new(vec![]);
        let tickets = Arc::new(ScriptedTicketSystem::new("T-4", vec![]));
        let generator = MessageGenerator::new(
            Arc::new(client),
            RetryPolicy {
                max_attempts: 1,
                ..retry()
            },
        )
        .with_escalation(tickets.clone(), escalation());
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            sleep(Duration::from_secs(75)).await;
            tx.send(true).unwrap();
        });

        let err = generator.generate(DIFF, "", &paths(), rx).await.unwrap_err();
        stopper.await.unwrap();

        assert_eq!(err, GenerationError::Cancelled);
        assert_eq!(tickets.poll_count(), 3);
    }

    /// Never answers, so only the request timeout can end the call.
    struct HangingClient;

    impl AiClient for HangingClient {
        fn send_request<'a>(
            &'a self,
            _system_prompt: &'a str,
            _user_prompt: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<String, AiError>> + Send + 'a>> {
            Box::pin(std::future::pending())
        }

        fn get_metadata(&self) -> crate::message::ai::AiClientMetadata {
            crate::message::ai::AiClientMetadata {
                provider: "Hanging".to_string(),
                model: "none".to_string(),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_counts_as_transient_failure() {
        let generator = MessageGenerator::new(Arc::new(HangingClient), retry());

        let err = generator.generate(DIFF, "", &paths(), no_cancel()).await.unwrap_err();

        match err {
            GenerationError::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, AiError::Timeout.to_string());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
