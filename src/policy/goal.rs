//! Read model for the goal collaborator, plus the markers the summarizer
//! extracts on its behalf.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    #[default]
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Paused => "paused",
            GoalStatus::Completed => "completed",
            GoalStatus::Abandoned => "abandoned",
        }
    }
}

/// A tracked checkpoint inside a goal (not to be confused with context
/// compression checkpoints).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalCheckpoint {
    pub text: String,
    pub status: String,
}

/// A decision recorded against a goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalDecision {
    pub text: String,
    pub locked: bool,
}

/// The goal manager's read model consumed when building goal-aware
/// summarization prompts. Goals are never compressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,
    pub priority: u8,
    pub status: GoalStatus,
    #[serde(default)]
    pub checkpoints: Vec<GoalCheckpoint>,
    #[serde(default)]
    pub decisions: Vec<GoalDecision>,
}

/// What an `[ARTIFACT]` marker says happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactAction {
    Created,
    Modified,
    Deleted,
}

impl ArtifactAction {
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "Created" => Some(ArtifactAction::Created),
            "Modified" => Some(ArtifactAction::Modified),
            "Deleted" => Some(ArtifactAction::Deleted),
            _ => None,
        }
    }
}

/// Goal markers parsed out of a summary, handed to the goal collaborator
/// to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalMarker {
    /// `[CHECKPOINT] text - STATUS`
    Checkpoint { text: String, status: String },
    /// `[DECISION] text` or `[DECISION] text - LOCKED`
    Decision { text: String, locked: bool },
    /// `[ARTIFACT] Created|Modified|Deleted path`
    Artifact { action: ArtifactAction, path: String },
}
