//! Core storage entities shared by every layer of the context core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which storage layer an element currently belongs to.
///
/// Every [`Message`] carries one of these tags. Prompt construction accepts
/// only `ActiveContext` elements; the boundary guard rejects the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageLayer {
    /// Live context — the only layer the LLM ever sees.
    #[default]
    ActiveContext,
    /// On-disk recovery snapshot. Never consulted when building a prompt.
    Snapshot,
    /// Append-only session history. Never consulted when building a prompt.
    History,
}

impl StorageLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageLayer::ActiveContext => "active_context",
            StorageLayer::Snapshot => "snapshot",
            StorageLayer::History => "history",
        }
    }
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single conversation message.
///
/// Created by the chat layer, never mutated once appended. The `origin` tag
/// records which storage layer holds this copy; clones change tags only at
/// the sanctioned transitions (history append, snapshot create/restore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Token count if already known (chat layer or cache may preset it).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    #[serde(default)]
    pub origin: StorageLayer,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            token_count: None,
            origin: StorageLayer::ActiveContext,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_token_count(mut self, tokens: u32) -> Self {
        self.token_count = Some(tokens);
        self
    }

    /// Re-tag a clone for another storage layer.
    pub fn into_layer(mut self, layer: StorageLayer) -> Self {
        self.origin = layer;
        self
    }
}

/// Summary fidelity. Lower level = fewer tokens, less fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CompressionLevel {
    /// One-paragraph compact summary.
    Compact = 1,
    /// Key decisions and outcomes.
    Moderate = 2,
    /// Detailed narrative.
    Detailed = 3,
}

impl CompressionLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// The next-lower fidelity, or `None` when already compact.
    pub fn lower(self) -> Option<CompressionLevel> {
        match self {
            CompressionLevel::Detailed => Some(CompressionLevel::Moderate),
            CompressionLevel::Moderate => Some(CompressionLevel::Compact),
            CompressionLevel::Compact => None,
        }
    }
}

impl From<CompressionLevel> for u8 {
    fn from(level: CompressionLevel) -> u8 {
        level as u8
    }
}

impl TryFrom<u8> for CompressionLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CompressionLevel::Compact),
            2 => Ok(CompressionLevel::Moderate),
            3 => Ok(CompressionLevel::Detailed),
            other => Err(format!("invalid compression level: {other}")),
        }
    }
}

/// An LLM-produced condensation of a contiguous run of older messages.
///
/// Mutated only when aged (level decreases, text and token count replaced)
/// or replaced entirely by a merge. `compression_level` monotonically
/// decreases and `compression_number` monotonically increases over the
/// checkpoint's life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub summary_text: String,
    /// Ids of the original messages this checkpoint replaced. Ids, not
    /// references — the canonical copies live in session history.
    pub original_message_ids: Vec<Uuid>,
    pub token_count: u32,
    pub compression_level: CompressionLevel,
    /// Ordinal of the compression pass that produced the current text.
    pub compression_number: u32,
    /// Model that produced the current summary text.
    pub source_model: String,
}

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPurpose {
    Recovery,
    Rollback,
    Emergency,
}

impl SnapshotPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotPurpose::Recovery => "recovery",
            SnapshotPurpose::Rollback => "rollback",
            SnapshotPurpose::Emergency => "emergency",
        }
    }
}

/// Bookkeeping stored alongside a snapshot's payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub message_count: usize,
    pub checkpoint_count: usize,
    pub total_tokens: u32,
    /// Ids of the messages that were live in the active context when the
    /// snapshot was taken. Restoration reinstalls exactly this subset.
    #[serde(default)]
    pub active_recent_ids: Vec<Uuid>,
}

/// Full on-disk recovery snapshot of conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub schema_version: u32,
    pub id: Uuid,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub purpose: SnapshotPurpose,
    /// Full uncompressed message list up to the snapshot's timestamp.
    pub full_messages: Vec<Message>,
    pub checkpoints_copy: Vec<CheckpointSummary>,
    pub metadata: SnapshotMetadata,
}

/// One compression event, recorded into session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Index range into `SessionHistory::messages` covered by this event.
    pub message_index_range: (usize, usize),
    pub original_tokens: u32,
    pub compressed_tokens: u32,
    pub ratio: f64,
    pub level: CompressionLevel,
}

/// Session-level totals kept current by the history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMetadata {
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub total_messages: usize,
    pub total_tokens: u64,
    pub compression_count: u32,
}

impl Default for HistoryMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            start_time: now,
            last_update: now,
            total_messages: 0,
            total_tokens: 0,
            compression_count: 0,
        }
    }
}

/// Append-only durable log of every raw message and checkpointing event.
/// The sole source of truth for audit and export; never consulted when
/// building a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistory {
    pub schema_version: u32,
    pub session_id: Uuid,
    pub messages: Vec<Message>,
    pub checkpoint_records: Vec<CheckpointRecord>,
    pub metadata: HistoryMetadata,
}

impl SessionHistory {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            schema_version: 1,
            session_id,
            messages: Vec::new(),
            checkpoint_records: Vec::new(),
            metadata: HistoryMetadata::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors_tag_active_context() {
        let msg = Message::user("hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.origin, StorageLayer::ActiveContext);
        assert!(msg.token_count.is_none());
    }

    #[test]
    fn test_into_layer_retags() {
        let msg = Message::assistant("reply").into_layer(StorageLayer::History);
        assert_eq!(msg.origin, StorageLayer::History);
    }

    #[test]
    fn test_compression_level_ordering() {
        assert!(CompressionLevel::Compact < CompressionLevel::Detailed);
        assert_eq!(CompressionLevel::Detailed.lower(), Some(CompressionLevel::Moderate));
        assert_eq!(CompressionLevel::Moderate.lower(), Some(CompressionLevel::Compact));
        assert_eq!(CompressionLevel::Compact.lower(), None);
    }

    #[test]
    fn test_compression_level_serde_roundtrip() {
        let json = serde_json::to_string(&CompressionLevel::Moderate).unwrap();
        assert_eq!(json, "2");
        let level: CompressionLevel = serde_json::from_str("1").unwrap();
        assert_eq!(level, CompressionLevel::Compact);
        assert!(serde_json::from_str::<CompressionLevel>("4").is_err());
    }

    #[test]
    fn test_message_origin_survives_serde() {
        let msg = Message::user("persisted").into_layer(StorageLayer::Snapshot);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.origin, StorageLayer::Snapshot);
        assert_eq!(back.content, "persisted");
    }
}
