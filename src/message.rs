//! Commit message generation: model clients, validation and ticket escalation.

pub mod ai;
pub mod error;
pub mod generator;
pub mod prompts;
pub mod ticket;
pub mod validate;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod test_utils;

pub use ai::{AiClient, AiClientMetadata};
pub use error::{AiError, GenerationError, TicketError, ValidationError};
pub use generator::{
    EscalationPolicy, GeneratedMessage, MessageGenerator, MessageSource, RetryPolicy,
};
pub use ticket::{TicketRequest, TicketStatus, TicketSystem};
pub use validate::validate_message;
