//! Last-resort reductions, attempted in order once a normal pipeline pass
//! has failed to make the prompt fit. A recovery snapshot is always taken
//! before the first strategy mutates anything.

use crate::active::ActiveContextManager;
use crate::checkpoint::CheckpointLifecycle;
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::history::HistoryStore;
use crate::pipeline::CompressionPipeline;
use crate::policy::{Goal, Mode, TokenCounter};
use crate::snapshot::SnapshotStore;
use crate::storage::{
    CheckpointRecord, CheckpointSummary, CompressionLevel, Message, Role, SnapshotPurpose,
};
use crate::summarize::{SummarizationService, SummarizeRequest};
use crate::validate::ValidationService;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The four strategies, in order of attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyStrategy {
    CompressAtLowerLevel,
    MergeOldest,
    AggressiveUserSummary,
    Rollover,
}

impl EmergencyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyStrategy::CompressAtLowerLevel => "compress-at-lower-level",
            EmergencyStrategy::MergeOldest => "merge-oldest",
            EmergencyStrategy::AggressiveUserSummary => "aggressive-user-summary",
            EmergencyStrategy::Rollover => "rollover",
        }
    }
}

/// What the emergency path did and whether it worked.
#[derive(Debug, Clone)]
pub struct EmergencyOutcome {
    pub snapshot_id: Uuid,
    /// Every strategy attempted, with its success flag, in order.
    pub attempts: Vec<(EmergencyStrategy, bool)>,
    /// True when some strategy yielded a prompt that validates.
    pub resolved: bool,
}

pub struct EmergencyActions {
    pipeline: Arc<CompressionPipeline>,
    lifecycle: Arc<CheckpointLifecycle>,
    validator: Arc<ValidationService>,
    summarizer: Arc<SummarizationService>,
    counter: Arc<dyn TokenCounter>,
}

impl EmergencyActions {
    pub fn new(
        pipeline: Arc<CompressionPipeline>,
        lifecycle: Arc<CheckpointLifecycle>,
        validator: Arc<ValidationService>,
        summarizer: Arc<SummarizationService>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            pipeline,
            lifecycle,
            validator,
            summarizer,
            counter,
        }
    }

    fn message_tokens(&self, message: &Message) -> u32 {
        message
            .token_count
            .unwrap_or_else(|| self.counter.count_tokens(&message.content))
    }

    fn fits(
        &self,
        active: &ActiveContextManager,
        pending: Option<&Message>,
        model_id: &str,
    ) -> Result<bool> {
        let prompt = active.build_prompt(pending)?;
        Ok(self.validator.validate(&prompt, model_id).is_fit())
    }

    /// Execute strategies in order until one yields a fitting prompt.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        active: &mut ActiveContextManager,
        history: &mut HistoryStore,
        snapshots: &SnapshotStore,
        config: &OrchestratorConfig,
        mode: Mode,
        goal: Option<&Goal>,
        model_id: &str,
        pending: Option<&Message>,
        cancel: &CancellationToken,
    ) -> Result<EmergencyOutcome> {
        // The snapshot comes first, unconditionally: whatever a strategy
        // discards below stays recoverable.
        let (recent, checkpoints) = active.snapshot_state();
        let recent_ids: Vec<Uuid> = recent.iter().map(|m| m.id).collect();
        let snapshot = snapshots.create(
            history.messages(),
            &checkpoints,
            recent_ids,
            SnapshotPurpose::Emergency,
        )?;
        tracing::warn!(
            snapshot_id = %snapshot.id,
            tokens = active.token_count().total,
            "entering emergency reduction"
        );

        let mut attempts = Vec::new();

        // 1. Re-run the pipeline with the level forced to compact.
        let succeeded = match self
            .pipeline
            .run(
                active,
                history,
                config,
                mode,
                goal,
                model_id,
                Some(CompressionLevel::Compact),
                cancel,
            )
            .await
        {
            Ok(_) => self.fits(active, pending, model_id)?,
            Err(e) => {
                tracing::warn!(error = %e, "forced compact compression failed");
                false
            }
        };
        attempts.push((EmergencyStrategy::CompressAtLowerLevel, succeeded));
        if succeeded {
            return Ok(EmergencyOutcome {
                snapshot_id: snapshot.id,
                attempts,
                resolved: true,
            });
        }

        // 2. Merge the two oldest compact checkpoints.
        let succeeded = match self.merge_oldest(active, mode, goal, model_id, cancel).await {
            Ok(true) => self.fits(active, pending, model_id)?,
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(error = %e, "merge of oldest checkpoints failed");
                false
            }
        };
        attempts.push((EmergencyStrategy::MergeOldest, succeeded));
        if succeeded {
            return Ok(EmergencyOutcome {
                snapshot_id: snapshot.id,
                attempts,
                resolved: true,
            });
        }

        // 3. Aggressive user summary, only when user messages alone exceed
        // half the budget.
        let succeeded = match self
            .aggressive_user_summary(active, history, config, mode, goal, model_id, pending, cancel)
            .await
        {
            Ok(true) => self.fits(active, pending, model_id)?,
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(error = %e, "aggressive user summary failed");
                false
            }
        };
        attempts.push((EmergencyStrategy::AggressiveUserSummary, succeeded));
        if succeeded {
            return Ok(EmergencyOutcome {
                snapshot_id: snapshot.id,
                attempts,
                resolved: true,
            });
        }

        // 4. Rollover: system prompt plus the last few messages. The
        // discarded tail lives in the snapshot taken above.
        active.clear_checkpoints();
        let dropped = active.retain_recent(config.rollover_keep_count);
        tracing::warn!(
            dropped = dropped.len(),
            kept = config.rollover_keep_count,
            "rollover executed"
        );
        let succeeded = self.fits(active, pending, model_id)?;
        attempts.push((EmergencyStrategy::Rollover, succeeded));

        Ok(EmergencyOutcome {
            snapshot_id: snapshot.id,
            resolved: succeeded,
            attempts,
        })
    }

    /// Merge the two oldest compact checkpoints in place. Returns false
    /// when fewer than two exist.
    async fn merge_oldest(
        &self,
        active: &mut ActiveContextManager,
        mode: Mode,
        goal: Option<&Goal>,
        model_id: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let compact: Vec<CheckpointSummary> = active
            .checkpoints()
            .iter()
            .filter(|c| c.compression_level == CompressionLevel::Compact)
            .take(2)
            .cloned()
            .collect();
        let [first, second] = compact.as_slice() else {
            return Ok(false);
        };

        let merged = self
            .lifecycle
            .merge(first, second, mode, goal, model_id, cancel)
            .await?;
        active.merge_checkpoints((first.id, second.id), merged);
        Ok(true)
    }

    /// Summarize all but the last few user messages into a single compact
    /// checkpoint, bypassing the assistants-only selection rule.
    #[allow(clippy::too_many_arguments)]
    async fn aggressive_user_summary(
        &self,
        active: &mut ActiveContextManager,
        history: &mut HistoryStore,
        config: &OrchestratorConfig,
        mode: Mode,
        goal: Option<&Goal>,
        model_id: &str,
        pending: Option<&Message>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let user_messages: Vec<Message> = active
            .recent_messages()
            .iter()
            .filter(|m| m.role == Role::User)
            .cloned()
            .collect();

        let mut user_tokens: u32 = user_messages.iter().map(|m| self.message_tokens(m)).sum();
        if let Some(message) = pending
            && message.role == Role::User
        {
            user_tokens += self.message_tokens(message);
        }
        if u64::from(user_tokens) * 2 <= u64::from(active.budget()) {
            return Ok(false);
        }
        if user_messages.len() <= config.keep_recent_user_count {
            return Ok(false);
        }

        let selected = &user_messages[..user_messages.len() - config.keep_recent_user_count];
        let original_tokens: u32 = selected.iter().map(|m| self.message_tokens(m)).sum();

        let output = self
            .summarizer
            .summarize(
                SummarizeRequest {
                    messages: selected,
                    level: CompressionLevel::Compact,
                    mode,
                    goal,
                    model_id,
                    merge: false,
                },
                cancel,
            )
            .await?;

        let selected_ids: Vec<Uuid> = selected.iter().map(|m| m.id).collect();
        let compressed_tokens = self.counter.count_tokens(&output.text);
        let checkpoint = CheckpointSummary {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            summary_text: output.text,
            original_message_ids: selected_ids.clone(),
            token_count: compressed_tokens,
            compression_level: CompressionLevel::Compact,
            compression_number: history.compression_count() + 1,
            source_model: model_id.to_string(),
        };

        let first_index = history.index_of(selected_ids[0]).unwrap_or(0);
        let last_index = history
            .index_of(*selected_ids.last().expect("selection is non-empty"))
            .unwrap_or(first_index);
        history.record_checkpoint(CheckpointRecord {
            id: checkpoint.id,
            timestamp: checkpoint.created_at,
            message_index_range: (first_index, last_index),
            original_tokens,
            compressed_tokens,
            ratio: f64::from(compressed_tokens) / f64::from(original_tokens.max(1)),
            level: CompressionLevel::Compact,
        });

        active.remove_messages(&selected_ids);
        active.add_checkpoint(checkpoint);
        tracing::warn!(
            compressed = selected_ids.len(),
            kept = config.keep_recent_user_count,
            "user messages summarized under emergency"
        );
        Ok(true)
    }
}
