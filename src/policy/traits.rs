//! Collaborator contracts. The core consumes these; the embedding chat
//! client implements them.

use super::goal::{Goal, GoalMarker};
use super::tier::{Mode, Tier};
use crate::storage::Message;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use thiserror::Error;

/// Error surfaced by the LLM transport.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// One element of the transport's output stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A chunk of generated text.
    Chunk(String),
    /// Generation finished cleanly.
    End,
}

/// Options forwarded with every transport call.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Cap on generated tokens.
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.3,
        }
    }
}

pub type TransportStream =
    Pin<Box<dyn Stream<Item = Result<StreamEvent, TransportError>> + Send>>;

/// Streaming LLM transport. Used only by the summarization service.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn stream(
        &self,
        model_id: &str,
        messages: Vec<Message>,
        options: TransportOptions,
    ) -> Result<TransportStream, TransportError>;
}

/// The overarching prompt assembler. Called on start, tier change, mode
/// change, and config change; never called during prompt emission.
pub trait PromptAssembler: Send + Sync {
    /// Build the system prompt for the given tier and mode. Goals, skills,
    /// and sanity checks are the assembler's own collaborators.
    fn build_system_prompt(&self, tier: Tier, mode: Mode) -> Message;

    /// Token cost of the most recently built system prompt.
    fn system_prompt_tokens(&self) -> u32;
}

/// Black-box token cost estimation.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> u32;
}

/// Provider profile store: pre-computed context sizes per model.
pub trait ProviderProfiles: Send + Sync {
    /// The pre-computed effective size (~85% of the requested profile)
    /// available for prompt contents.
    fn effective_limit(&self, model_id: &str, requested_size: u32) -> u32;

    /// The model's raw context window.
    fn context_limit(&self, model_id: &str) -> u32;
}

/// Goal manager integration. The core reads the active goal for
/// summarization prompts and hands back parsed markers.
pub trait GoalManager: Send + Sync {
    fn active_goal(&self) -> Option<Goal>;

    /// Apply markers extracted from a summary. Failures are the manager's
    /// to report; the core logs and moves on.
    fn apply_markers(&self, goal_id: &str, markers: &[GoalMarker]);
}

/// Source of the current operational mode.
pub trait ModeProvider: Send + Sync {
    fn current_mode(&self) -> Mode;
}
