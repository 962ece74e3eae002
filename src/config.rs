//! Orchestrator configuration: the enumerated knobs, their defaults, and
//! validation. Loading from disk belongs to the embedding application.

use serde::{Deserialize, Serialize};

/// Configuration for a single session's context orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Requested context size in tokens. Drives tier derivation and the
    /// provider profile lookup for the effective limit.
    #[serde(default = "default_requested_size")]
    pub requested_size: u32,

    /// Tokens reserved for the model's response, subtracted from the
    /// effective limit before every fit check.
    #[serde(default = "default_reserved_response")]
    pub reserved_response: u32,

    /// Most-recent messages always preserved by normal compression.
    #[serde(default = "default_keep_recent_count")]
    pub keep_recent_count: usize,

    /// User messages preserved by the emergency aggressive-user-summary
    /// strategy.
    #[serde(default = "default_keep_recent_user_count")]
    pub keep_recent_user_count: usize,

    /// Messages retained by the rollover strategy (besides the system prompt).
    #[serde(default = "default_rollover_keep_count")]
    pub rollover_keep_count: usize,

    /// Snapshots retained on disk; oldest beyond this are pruned.
    #[serde(default = "default_snapshot_keep")]
    pub snapshot_keep: usize,

    /// Whether normal (non-emergency) compression may select user messages
    /// in addition to assistant messages.
    #[serde(default)]
    pub compress_user_messages: bool,

    /// Upper bound on a single summarizer call.
    #[serde(default = "default_summarization_timeout_secs")]
    pub summarization_timeout_secs: u64,

    /// Original-token thresholds selecting the compression level.
    #[serde(default)]
    pub level_thresholds: LevelThresholds,

    /// Per-model-size compression limits that drive reliability warnings.
    #[serde(default)]
    pub reliability_warn_limits: ReliabilityWarnLimits,

    /// Legacy auto-snapshot usage threshold. Retained for embedders; the
    /// orchestrator no longer triggers compression from it.
    #[serde(default = "default_snapshot_auto_threshold")]
    pub snapshot_auto_threshold: f32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            requested_size: default_requested_size(),
            reserved_response: default_reserved_response(),
            keep_recent_count: default_keep_recent_count(),
            keep_recent_user_count: default_keep_recent_user_count(),
            rollover_keep_count: default_rollover_keep_count(),
            snapshot_keep: default_snapshot_keep(),
            compress_user_messages: false,
            summarization_timeout_secs: default_summarization_timeout_secs(),
            level_thresholds: LevelThresholds::default(),
            reliability_warn_limits: ReliabilityWarnLimits::default(),
            snapshot_auto_threshold: default_snapshot_auto_threshold(),
        }
    }
}

fn default_requested_size() -> u32 {
    8192
}

fn default_reserved_response() -> u32 {
    1000
}

fn default_keep_recent_count() -> usize {
    5
}

fn default_keep_recent_user_count() -> usize {
    10
}

fn default_rollover_keep_count() -> usize {
    3
}

fn default_snapshot_keep() -> usize {
    10
}

fn default_summarization_timeout_secs() -> u64 {
    30
}

fn default_snapshot_auto_threshold() -> f32 {
    0.85
}

/// Original-token thresholds for choosing a compression level: above
/// `compact` tokens summarize at level 1, above `moderate` at level 2,
/// otherwise level 3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LevelThresholds {
    #[serde(default = "default_compact_threshold")]
    pub compact: u32,
    #[serde(default = "default_moderate_threshold")]
    pub moderate: u32,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            compact: default_compact_threshold(),
            moderate: default_moderate_threshold(),
        }
    }
}

fn default_compact_threshold() -> u32 {
    3000
}

fn default_moderate_threshold() -> u32 {
    2000
}

/// Per-model-size compression limits. A reliability warning fires when the
/// next compression would reach the limit for the session's model size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReliabilityWarnLimits {
    #[serde(default = "default_warn_3b")]
    pub b3: u32,
    #[serde(default = "default_warn_7b")]
    pub b7: u32,
    #[serde(default = "default_warn_13b")]
    pub b13: u32,
    #[serde(default = "default_warn_other")]
    pub other: u32,
}

impl Default for ReliabilityWarnLimits {
    fn default() -> Self {
        Self {
            b3: default_warn_3b(),
            b7: default_warn_7b(),
            b13: default_warn_13b(),
            other: default_warn_other(),
        }
    }
}

fn default_warn_3b() -> u32 {
    3
}

fn default_warn_7b() -> u32 {
    5
}

fn default_warn_13b() -> u32 {
    7
}

fn default_warn_other() -> u32 {
    10
}
