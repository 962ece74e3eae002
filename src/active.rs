//! Active context manager: the one object the LLM ever sees.
//!
//! Holds the system prompt, checkpoint summaries, and the recent message
//! window, with token accounting against the effective limit. All mutation
//! happens under the orchestrator's single-writer lock.

use crate::error::{ContextError, Result};
use crate::policy::TokenCounter;
use crate::storage::{guard, CheckpointSummary, Message, Role, StorageLayer};
use crate::validate::Validation;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Token accounting split by prompt section. `total` always equals
/// `system + checkpoints + recent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenBreakdown {
    pub system: u32,
    pub checkpoints: u32,
    pub recent: u32,
    pub total: u32,
}

pub struct ActiveContextManager {
    system_prompt: Message,
    checkpoints: Vec<CheckpointSummary>,
    recent: Vec<Message>,
    counter: Arc<dyn TokenCounter>,
    effective_limit: u32,
    reserved_response: u32,
    /// Per-message token cache keyed by message id. Messages are immutable,
    /// so entries are only ever dropped, never invalidated in place.
    cache: HashMap<Uuid, u32>,
    counts: TokenBreakdown,
}

impl ActiveContextManager {
    pub fn new(
        system_prompt: Message,
        counter: Arc<dyn TokenCounter>,
        effective_limit: u32,
        reserved_response: u32,
    ) -> Self {
        let mut manager = Self {
            system_prompt: system_prompt.into_layer(StorageLayer::ActiveContext),
            checkpoints: Vec::new(),
            recent: Vec::new(),
            counter,
            effective_limit,
            reserved_response,
            cache: HashMap::new(),
            counts: TokenBreakdown::default(),
        };
        manager.recount();
        manager
    }

    /// Budget available for prompt contents.
    pub fn budget(&self) -> u32 {
        self.effective_limit.saturating_sub(self.reserved_response)
    }

    pub fn system_prompt(&self) -> &Message {
        &self.system_prompt
    }

    pub fn checkpoints(&self) -> &[CheckpointSummary] {
        &self.checkpoints
    }

    pub fn recent_messages(&self) -> &[Message] {
        &self.recent
    }

    pub fn token_count(&self) -> TokenBreakdown {
        self.counts
    }

    pub fn available_tokens(&self) -> u32 {
        self.budget().saturating_sub(self.counts.total)
    }

    /// Replace the system prompt (tier or mode change) and recount.
    pub fn set_system_prompt(&mut self, prompt: Message) {
        self.cache.remove(&self.system_prompt.id);
        self.system_prompt = prompt.into_layer(StorageLayer::ActiveContext);
        self.recount();
    }

    /// Update limits after a config change.
    pub fn set_limits(&mut self, effective_limit: u32, reserved_response: u32) {
        self.effective_limit = effective_limit;
        self.reserved_response = reserved_response;
    }

    fn cached_tokens(
        counter: &Arc<dyn TokenCounter>,
        cache: &mut HashMap<Uuid, u32>,
        message: &Message,
    ) -> u32 {
        if let Some(tokens) = message.token_count {
            return tokens;
        }
        if let Some(&tokens) = cache.get(&message.id) {
            return tokens;
        }
        let tokens = counter.count_tokens(&message.content);
        cache.insert(message.id, tokens);
        tokens
    }

    fn message_tokens(&mut self, message: &Message) -> u32 {
        Self::cached_tokens(&self.counter, &mut self.cache, message)
    }

    /// Recompute every section from scratch. Used after any bulk mutation
    /// to avoid accounting drift.
    fn recount(&mut self) {
        let Self {
            system_prompt,
            checkpoints,
            recent,
            counter,
            cache,
            counts,
            ..
        } = self;
        counts.system = Self::cached_tokens(counter, cache, system_prompt);
        counts.checkpoints = checkpoints.iter().map(|c| c.token_count).sum();
        counts.recent = recent
            .iter()
            .map(|m| Self::cached_tokens(counter, cache, m))
            .sum();
        counts.total = counts.system + counts.checkpoints + counts.recent;
    }

    /// Token overage that appending `message` would cause, if any.
    pub fn would_exceed(&mut self, message: &Message) -> Option<u32> {
        let tokens = self.message_tokens(message);
        let prospective = self.counts.total + tokens;
        let budget = self.budget();
        (prospective > budget).then(|| prospective - budget)
    }

    /// Append a message. Fails with `WouldExceedLimit` when the result
    /// would not leave room for the reserved response.
    pub fn add_message(&mut self, message: Message) -> Result<()> {
        if let Some(by) = self.would_exceed(&message) {
            return Err(ContextError::WouldExceedLimit { by });
        }
        let tokens = self.message_tokens(&message);
        self.recent.push(message.into_layer(StorageLayer::ActiveContext));
        self.counts.recent += tokens;
        self.counts.total += tokens;
        Ok(())
    }

    /// Append a checkpoint produced by the compression pipeline.
    pub fn add_checkpoint(&mut self, checkpoint: CheckpointSummary) {
        self.counts.checkpoints += checkpoint.token_count;
        self.counts.total += checkpoint.token_count;
        self.checkpoints.push(checkpoint);
    }

    /// Remove messages by id and recompute counts from scratch.
    pub fn remove_messages(&mut self, ids: &[Uuid]) {
        self.recent.retain(|m| !ids.contains(&m.id));
        for id in ids {
            self.cache.remove(id);
        }
        self.recount();
    }

    /// Replace a checkpoint in place (aging). Returns false when no
    /// checkpoint with the given id exists.
    pub fn replace_checkpoint(&mut self, updated: CheckpointSummary) -> bool {
        let Some(slot) = self.checkpoints.iter_mut().find(|c| c.id == updated.id) else {
            return false;
        };
        *slot = updated;
        self.recount();
        true
    }

    /// Replace the two named checkpoints with their merge, at the position
    /// of the first.
    pub fn merge_checkpoints(&mut self, removed: (Uuid, Uuid), merged: CheckpointSummary) {
        let position = self
            .checkpoints
            .iter()
            .position(|c| c.id == removed.0 || c.id == removed.1)
            .unwrap_or(0);
        self.checkpoints
            .retain(|c| c.id != removed.0 && c.id != removed.1);
        self.checkpoints.insert(position.min(self.checkpoints.len()), merged);
        self.recount();
    }

    /// Drop all but the last `keep` recent messages. Returns the dropped
    /// prefix (already preserved in the emergency snapshot by the caller).
    pub fn retain_recent(&mut self, keep: usize) -> Vec<Message> {
        if self.recent.len() <= keep {
            return Vec::new();
        }
        let dropped: Vec<Message> = self.recent.drain(..self.recent.len() - keep).collect();
        for message in &dropped {
            self.cache.remove(&message.id);
        }
        self.recount();
        dropped
    }

    pub fn clear_checkpoints(&mut self) {
        self.checkpoints.clear();
        self.recount();
    }

    /// Reinstall state from a snapshot restore. Existing recent messages
    /// and checkpoints are cleared; the system prompt is the caller's to
    /// re-derive.
    pub fn install(&mut self, messages: Vec<Message>, checkpoints: Vec<CheckpointSummary>) {
        self.recent = messages
            .into_iter()
            .map(|m| m.into_layer(StorageLayer::ActiveContext))
            .collect();
        self.checkpoints = checkpoints;
        let system_id = self.system_prompt.id;
        self.cache.retain(|id, _| *id == system_id);
        self.recount();
    }

    /// Read-only copy of the live state for inspection and snapshots.
    pub fn snapshot_state(&self) -> (Vec<Message>, Vec<CheckpointSummary>) {
        (self.recent.clone(), self.checkpoints.clone())
    }

    /// Fit check of the current context against the budget.
    pub fn validate(&self) -> Validation {
        let tokens = self.counts.total;
        let limit = self.budget();
        if tokens <= limit {
            Validation::Fit { tokens }
        } else {
            Validation::Over {
                tokens,
                limit,
                by: tokens - limit,
            }
        }
    }

    /// Materialize the prompt: system prompt, one synthetic assistant
    /// message per checkpoint (oldest first), recent messages in arrival
    /// order, then optionally the new message. Provenance is asserted on
    /// every call.
    pub fn build_prompt(&self, new_message: Option<&Message>) -> Result<Vec<Message>> {
        let mut prompt = Vec::with_capacity(2 + self.checkpoints.len() + self.recent.len());
        prompt.push(self.system_prompt.clone());

        for checkpoint in &self.checkpoints {
            prompt.push(Message {
                id: checkpoint.id,
                role: Role::Assistant,
                content: checkpoint.summary_text.clone(),
                timestamp: checkpoint.created_at,
                token_count: Some(checkpoint.token_count),
                origin: StorageLayer::ActiveContext,
            });
        }

        prompt.extend(self.recent.iter().cloned());

        if let Some(message) = new_message {
            prompt.push(message.clone().into_layer(StorageLayer::ActiveContext));
        }

        guard::assert_prompt_provenance(&prompt)?;
        Ok(prompt)
    }
}
