//! ollm-context — context compression core for local-LLM chat clients.
//!
//! Decides what portion of an ongoing conversation is sent to a
//! token-bounded model on each turn, summarizes older history into compact
//! checkpoints, takes recovery snapshots before destructive reductions,
//! and degrades in controlled steps when a prompt cannot be made to fit.
//!
//! ## Architecture
//!
//! - **Storage layers:** active context (what the model sees), recovery
//!   snapshots, and append-only session history — kept apart by a
//!   provenance guard checked on every emitted prompt.
//! - **Compression pipeline:** six stages from message selection through
//!   LLM summarization to re-validation, transactional from the caller's
//!   perspective.
//! - **Checkpoint lifecycle:** summaries age to lower fidelity levels and
//!   eventually merge as pressure persists.
//! - **Orchestrator:** the facade a chat loop embeds — single writer per
//!   session, typed events, cancellation, advisory session lock.
//!
//! The LLM transport, prompt assembler, token counter, provider profiles,
//! goal manager, and mode provider are collaborator traits implemented by
//! the embedding client (see [`policy`]).
//!
//! ```no_run
//! # use ollm_context::*;
//! # use std::sync::Arc;
//! # fn collaborators() -> (Arc<dyn LlmTransport>, Arc<dyn PromptAssembler>,
//! #     Arc<dyn ProviderProfiles>, Arc<dyn GoalManager>, Arc<dyn ModeProvider>) { unimplemented!() }
//! # async fn demo() -> Result<()> {
//! let (transport, assembler, profiles, goals, modes) = collaborators();
//! let orchestrator = ContextOrchestrator::new(
//!     uuid::Uuid::new_v4(),
//!     dirs::data_dir().unwrap().join("ollm"),
//!     "llama3:8b",
//!     OrchestratorConfig::default(),
//!     transport,
//!     assembler,
//!     profiles,
//!     Arc::new(TiktokenCounter),
//!     goals,
//!     modes,
//! );
//! orchestrator.start().await?;
//! orchestrator.add_message(Message::user("hello")).await?;
//! let prompt = orchestrator.build_prompt_for_turn().await?;
//! # Ok(()) }
//! ```

pub mod active;
pub mod checkpoint;
pub mod config;
pub mod emergency;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod pipeline;
pub mod policy;
pub mod snapshot;
pub mod storage;
pub mod summarize;
pub mod tokenizer;
pub mod validate;

// Re-export the surface a chat loop needs.
pub use active::{ActiveContextManager, TokenBreakdown};
pub use config::{LevelThresholds, OrchestratorConfig, ReliabilityWarnLimits};
pub use emergency::EmergencyStrategy;
pub use error::{ContextError, Result, SummarizationFailure};
pub use orchestrator::{
    ContextEvent, ContextOrchestrator, ContextState, ContextUsage, OrchestratorState,
};
pub use policy::{
    Goal, GoalManager, GoalMarker, LlmTransport, Mode, ModeProvider, ModelSize, PromptAssembler,
    ProviderProfiles, StreamEvent, Tier, TokenCounter, TransportError, TransportOptions,
    TransportStream,
};
pub use storage::{
    CheckpointRecord, CheckpointSummary, CompressionLevel, Message, Role, SessionHistory,
    SnapshotData, SnapshotPurpose, StorageLayer,
};
pub use tokenizer::TiktokenCounter;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
