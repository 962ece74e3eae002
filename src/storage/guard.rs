//! Storage boundary guard.
//!
//! The three storage layers must never contaminate each other: only active
//! context elements may reach an emitted prompt. The guard is checked once
//! per materialized prompt; a trip is a programmer error, not a recoverable
//! condition.

use super::types::{Message, StorageLayer};
use crate::error::ContextError;

/// True when the message belongs to the live active context.
pub fn is_active_context(message: &Message) -> bool {
    message.origin == StorageLayer::ActiveContext
}

/// True when the message is a snapshot copy.
pub fn is_snapshot(message: &Message) -> bool {
    message.origin == StorageLayer::Snapshot
}

/// True when the message is a history copy.
pub fn is_history(message: &Message) -> bool {
    message.origin == StorageLayer::History
}

/// Assert that no element in a prompt originated from a snapshot or history
/// store. Called at every point where a prompt is materialized.
pub fn assert_prompt_provenance(messages: &[Message]) -> Result<(), ContextError> {
    for message in messages {
        if !is_active_context(message) {
            return Err(ContextError::InvariantViolated(format!(
                "prompt element {} originated from the {} layer",
                message.id,
                message.origin.as_str(),
            )));
        }
    }
    Ok(())
}
