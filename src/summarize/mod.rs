//! Summarization service: drives the LLM transport with level-specific,
//! mode-aware, goal-aware prompts and returns the summary plus any goal
//! markers found in it.

mod markers;
mod prompts;

pub use markers::parse_goal_markers;

use crate::error::SummarizationFailure;
use crate::policy::{
    Goal, GoalMarker, LlmTransport, Mode, StreamEvent, TransportOptions,
};
use crate::storage::{CompressionLevel, Message};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One summarizer invocation.
pub struct SummarizeRequest<'a> {
    pub messages: &'a [Message],
    pub level: CompressionLevel,
    pub mode: Mode,
    pub goal: Option<&'a Goal>,
    pub model_id: &'a str,
    /// Set when the input is two existing summaries being merged.
    pub merge: bool,
}

/// Summary text plus the goal markers parsed out of it.
#[derive(Debug, Clone)]
pub struct SummaryOutput {
    pub text: String,
    pub markers: Vec<GoalMarker>,
}

pub struct SummarizationService {
    transport: Arc<dyn LlmTransport>,
    timeout: Duration,
}

impl SummarizationService {
    pub fn new(transport: Arc<dyn LlmTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Call the LLM and accumulate the streamed summary.
    ///
    /// The timeout applies to each wait for the next stream event; a silent
    /// provider is treated as a timeout rather than blocking the writer
    /// forever. Cancellation aborts the call and surfaces as a transport
    /// failure — the caller's context is untouched either way.
    pub async fn summarize(
        &self,
        request: SummarizeRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<SummaryOutput, SummarizationFailure> {
        let instruction = prompts::build_instruction(
            request.level,
            request.mode,
            request.goal,
            request.merge,
        );
        let conversation = prompts::render_conversation(request.messages);

        tracing::debug!(
            level = request.level.as_u8(),
            mode = request.mode.as_str(),
            merge = request.merge,
            messages = request.messages.len(),
            "summarizer call"
        );

        let prompt = vec![Message::system(instruction), Message::user(conversation)];
        let mut stream = self
            .transport
            .stream(request.model_id, prompt, TransportOptions::default())
            .await
            .map_err(|e| SummarizationFailure::Transport(e.to_string()))?;

        let mut summary = String::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("summarization cancelled");
                    return Err(SummarizationFailure::Transport("cancelled".into()));
                }
                next = tokio::time::timeout(self.timeout, stream.next()) => next,
            };

            let event = match next {
                Ok(Some(Ok(event))) => event,
                Ok(Some(Err(e))) => {
                    return Err(SummarizationFailure::Transport(e.to_string()));
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    tracing::warn!(
                        timeout_secs = self.timeout.as_secs(),
                        "summarizer stream went silent"
                    );
                    return Err(SummarizationFailure::Timeout {
                        seconds: self.timeout.as_secs(),
                    });
                }
            };

            match event {
                StreamEvent::Chunk(text) => summary.push_str(&text),
                StreamEvent::End => break,
            }
        }

        let text = summary.trim().to_string();
        if text.is_empty() {
            return Err(SummarizationFailure::Empty);
        }

        let markers = markers::parse_goal_markers(&text);
        Ok(SummaryOutput { text, markers })
    }
}
