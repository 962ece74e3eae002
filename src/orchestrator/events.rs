//! Typed event surface. Subscribers receive a broadcast receiver handle;
//! emission never blocks and never fails the writer.

use crate::emergency::EmergencyStrategy;
use crate::policy::{ModelSize, Tier};
use crate::storage::{CompressionLevel, SnapshotPurpose};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Everything the orchestrator announces to the chat loop.
#[derive(Debug, Clone)]
pub enum ContextEvent {
    Started {
        session_id: Uuid,
        tier: Tier,
    },
    TierChanged {
        previous: Tier,
        current: Tier,
    },
    ConfigUpdated,
    CompressionStarted {
        message_count: usize,
        tokens_before: u32,
    },
    CompressionCompleted {
        checkpoint_id: Uuid,
        original_tokens: u32,
        compressed_tokens: u32,
        level: CompressionLevel,
    },
    SnapshotCreated {
        snapshot_id: Uuid,
        purpose: SnapshotPurpose,
    },
    SnapshotRestored {
        snapshot_id: Uuid,
    },
    ReliabilityWarning {
        checkpoint_id: Uuid,
        score: f64,
        model_size: ModelSize,
        compression_number: u32,
    },
    Emergency {
        strategy: EmergencyStrategy,
        succeeded: bool,
    },
}

pub(crate) struct EventBus {
    tx: broadcast::Sender<ContextEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.tx.subscribe()
    }

    /// Fire an event. A missing subscriber is not an error.
    pub fn emit(&self, event: ContextEvent) {
        tracing::debug!(?event, "context event");
        let _ = self.tx.send(event);
    }
}
