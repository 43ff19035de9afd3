//! Shared test doubles for the `message` module.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::message::ai::{AiClient, AiClientMetadata};
use crate::message::error::{AiError, TicketError};
use crate::message::ticket::{TicketRequest, TicketStatus, TicketSystem};

/// Mock AI client with a pre-programmed queue of responses.
///
/// Responses are returned in FIFO order. When the queue is exhausted,
/// subsequent calls fail with a network error. Every call records the
/// `(system_prompt, user_prompt)` pair.
pub(crate) struct ConfigurableMockAiClient {
    responses: Arc<Mutex<VecDeque<Result<String, AiError>>>>,
    recorded_prompts: Arc<Mutex<Vec<(String, String)>>>,
}

impl ConfigurableMockAiClient {
    /// Creates a new mock client that will return the given responses in order.
    pub(crate) fn new(responses: Vec<Result<String, AiError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            recorded_prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns a handle for inspecting which prompts were sent after the
    /// client has been moved into a generator.
    pub(crate) fn prompt_handle(&self) -> PromptRecordHandle {
        PromptRecordHandle {
            recorded_prompts: self.recorded_prompts.clone(),
        }
    }
}

/// Shared handle to a mock client's recorded prompts.
pub(crate) struct PromptRecordHandle {
    recorded_prompts: Arc<Mutex<Vec<(String, String)>>>,
}

impl PromptRecordHandle {
    /// Returns all recorded `(system_prompt, user_prompt)` pairs.
    pub(crate) fn prompts(&self) -> Vec<(String, String)> {
        self.recorded_prompts.lock().unwrap().clone()
    }

    /// Returns the number of AI requests that were made.
    pub(crate) fn request_count(&self) -> usize {
        self.recorded_prompts.lock().unwrap().len()
    }
}

impl AiClient for ConfigurableMockAiClient {
    fn send_request<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, AiError>> + Send + 'a>> {
        let responses = self.responses.clone();
        let recorded = self.recorded_prompts.clone();
        let sys = system_prompt.to_string();
        let usr = user_prompt.to_string();
        Box::pin(async move {
            recorded.lock().unwrap().push((sys, usr));
            responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AiError::NetworkError("no more mock responses".to_string())))
        })
    }

    fn get_metadata(&self) -> AiClientMetadata {
        AiClientMetadata {
            provider: "Mock".to_string(),
            model: "mock-model".to_string(),
        }
    }
}

/// Ticket system answering polls from a script.
///
/// Each poll pops the next scripted status; an empty script means pending.
pub(crate) struct ScriptedTicketSystem {
    create_result: Result<String, TicketError>,
    polls: Mutex<VecDeque<Result<TicketStatus, TicketError>>>,
    created: Mutex<Vec<TicketRequest>>,
    poll_count: Mutex<usize>,
}

impl ScriptedTicketSystem {
    /// Creates tickets with `ticket_id` and answers polls from `polls`.
    pub(crate) fn new(ticket_id: &str, polls: Vec<Result<TicketStatus, TicketError>>) -> Self {
        Self {
            create_result: Ok(ticket_id.to_string()),
            polls: Mutex::new(VecDeque::from(polls)),
            created: Mutex::new(Vec::new()),
            poll_count: Mutex::new(0),
        }
    }

    /// A ticket system whose ticket creation always fails.
    pub(crate) fn unreachable() -> Self {
        Self {
            create_result: Err(TicketError::NetworkError("connection refused".to_string())),
            polls: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
            poll_count: Mutex::new(0),
        }
    }

    /// Tickets created so far.
    pub(crate) fn created(&self) -> Vec<TicketRequest> {
        self.created.lock().unwrap().clone()
    }

    /// Number of polls made so far.
    pub(crate) fn poll_count(&self) -> usize {
        *self.poll_count.lock().unwrap()
    }
}

impl TicketSystem for ScriptedTicketSystem {
    fn create_ticket<'a>(
        &'a self,
        request: &'a TicketRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, TicketError>> + Send + 'a>> {
        Box::pin(async move {
            self.created.lock().unwrap().push(request.clone());
            self.create_result.clone()
        })
    }

    fn poll_ticket<'a>(
        &'a self,
        _ticket_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TicketStatus, TicketError>> + Send + 'a>> {
        Box::pin(async move {
            *self.poll_count.lock().unwrap() += 1;
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(TicketStatus::Pending))
        })
    }
}
