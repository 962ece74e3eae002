//! Policy integrations: tier/mode/model adapters and the collaborator
//! contracts the core consumes but does not implement.

mod goal;
mod model;
mod tier;
mod traits;

pub use goal::{ArtifactAction, Goal, GoalCheckpoint, GoalDecision, GoalMarker, GoalStatus};
pub use model::ModelSize;
pub use tier::{Mode, Tier};
pub use traits::{
    GoalManager, LlmTransport, ModeProvider, PromptAssembler, ProviderProfiles, StreamEvent,
    TokenCounter, TransportError, TransportOptions, TransportStream,
};
