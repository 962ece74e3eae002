//! Error taxonomy for the context core.
//!
//! Recoverable kinds (`WouldExceedLimit`, `SummarizationFailed`,
//! `ValidationOver`) are handled inside the orchestrator and surface only as
//! events and pipeline outcomes; unrecoverable kinds (`CannotFit`,
//! `StoreUnavailable`, `InvariantViolated`) cross the facade.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ContextError>;

#[derive(Debug, Error)]
pub enum ContextError {
    /// Appending the message would push the context over budget.
    /// The caller must request compression first.
    #[error("message would exceed the context budget by {by} tokens")]
    WouldExceedLimit { by: u32 },

    /// The summarizer LLM call failed; active context is untouched.
    #[error("summarization failed: {0}")]
    SummarizationFailed(#[from] SummarizationFailure),

    /// A candidate prompt does not fit the effective limit.
    #[error("prompt is {tokens} tokens against an effective limit of {limit} ({by} over)")]
    ValidationOver { tokens: u32, limit: u32, by: u32 },

    /// Every emergency strategy failed; the prompt was not sent. The
    /// discarded state is preserved in the named emergency snapshot.
    #[error("prompt cannot be made to fit; state preserved in emergency snapshot {snapshot_id}")]
    CannotFit { snapshot_id: Uuid },

    /// History or snapshot IO failure. The orchestrator transitions the
    /// session to `Fatal`.
    #[error("session store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// Storage boundary guard tripped. Programmer error.
    #[error("storage invariant violated: {0}")]
    InvariantViolated(String),

    /// The session directory is locked by another holder.
    #[error("session is locked by pid {pid}")]
    LockHeld { pid: u32 },

    /// Operation attempted in a state that does not allow it.
    #[error("operation not valid while the orchestrator is {state}")]
    InvalidState { state: &'static str },
}

impl ContextError {
    pub(crate) fn store(err: impl std::fmt::Display) -> Self {
        ContextError::StoreUnavailable {
            reason: err.to_string(),
        }
    }
}

/// Why a summarizer call failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SummarizationFailure {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("summarizer returned empty output")]
    Empty,

    #[error("summarization timed out after {seconds}s")]
    Timeout { seconds: u64 },
}
