//! Checkpoint lifecycle: aging to lower fidelity levels, merging the
//! oldest compact checkpoints, and reliability scoring.

use crate::config::ReliabilityWarnLimits;
use crate::error::SummarizationFailure;
use crate::policy::{Goal, Mode, ModelSize, TokenCounter};
use crate::storage::{CheckpointSummary, CompressionLevel, Message};
use crate::summarize::{SummarizationService, SummarizeRequest};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct CheckpointLifecycle {
    summarizer: Arc<SummarizationService>,
    counter: Arc<dyn TokenCounter>,
}

impl CheckpointLifecycle {
    pub fn new(summarizer: Arc<SummarizationService>, counter: Arc<dyn TokenCounter>) -> Self {
        Self { summarizer, counter }
    }

    /// Re-summarize a checkpoint at the next-lower level, preserving its
    /// identity and original message ids. Returns `None` when the
    /// checkpoint is already compact.
    pub async fn age(
        &self,
        checkpoint: &CheckpointSummary,
        mode: Mode,
        goal: Option<&Goal>,
        model_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<CheckpointSummary>, SummarizationFailure> {
        let Some(target) = checkpoint.compression_level.lower() else {
            return Ok(None);
        };

        let input = vec![Message::assistant(checkpoint.summary_text.clone())];
        let output = self
            .summarizer
            .summarize(
                SummarizeRequest {
                    messages: &input,
                    level: target,
                    mode,
                    goal,
                    model_id,
                    merge: false,
                },
                cancel,
            )
            .await?;

        let token_count = self.counter.count_tokens(&output.text);
        tracing::info!(
            checkpoint_id = %checkpoint.id,
            from = checkpoint.compression_level.as_u8(),
            to = target.as_u8(),
            tokens_before = checkpoint.token_count,
            tokens_after = token_count,
            "checkpoint aged"
        );

        Ok(Some(CheckpointSummary {
            summary_text: output.text,
            token_count,
            compression_level: target,
            compression_number: checkpoint.compression_number + 1,
            source_model: model_id.to_string(),
            ..checkpoint.clone()
        }))
    }

    /// Merge two compact checkpoints into one, unioning their original
    /// message ids. The result is a new checkpoint; both inputs are
    /// destroyed by the caller.
    pub async fn merge(
        &self,
        first: &CheckpointSummary,
        second: &CheckpointSummary,
        mode: Mode,
        goal: Option<&Goal>,
        model_id: &str,
        cancel: &CancellationToken,
    ) -> Result<CheckpointSummary, SummarizationFailure> {
        let input = vec![
            Message::assistant(first.summary_text.clone()),
            Message::assistant(second.summary_text.clone()),
        ];
        let output = self
            .summarizer
            .summarize(
                SummarizeRequest {
                    messages: &input,
                    level: CompressionLevel::Compact,
                    mode,
                    goal,
                    model_id,
                    merge: true,
                },
                cancel,
            )
            .await?;

        let mut original_message_ids: Vec<Uuid> = first.original_message_ids.clone();
        for id in &second.original_message_ids {
            if !original_message_ids.contains(id) {
                original_message_ids.push(*id);
            }
        }

        let token_count = self.counter.count_tokens(&output.text);
        let merged = CheckpointSummary {
            id: Uuid::new_v4(),
            created_at: first.created_at.min(second.created_at),
            summary_text: output.text,
            original_message_ids,
            token_count,
            compression_level: CompressionLevel::Compact,
            compression_number: first.compression_number.max(second.compression_number) + 1,
            source_model: model_id.to_string(),
        };

        tracing::info!(
            merged_id = %merged.id,
            first = %first.id,
            second = %second.id,
            tokens_before = first.token_count + second.token_count,
            tokens_after = merged.token_count,
            "checkpoints merged"
        );
        Ok(merged)
    }
}

/// Reliability of a checkpoint produced by a model of the given size after
/// `compression_number` compression passes.
pub fn reliability_score(model_size: ModelSize, compression_number: u32) -> f64 {
    model_size.reliability_factor() * 0.9f64.powi(compression_number as i32)
}

/// Whether the orchestrator should warn: true when the next compression
/// would reach the per-model limit.
pub fn should_warn(
    limits: &ReliabilityWarnLimits,
    model_size: ModelSize,
    compression_number: u32,
) -> bool {
    compression_number + 1 >= model_size.warn_limit(limits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{LlmTransport, StreamEvent, TransportError, TransportOptions, TransportStream};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;

    struct FixedTransport(&'static str);

    #[async_trait]
    impl LlmTransport for FixedTransport {
        async fn stream(
            &self,
            _model_id: &str,
            _messages: Vec<Message>,
            _options: TransportOptions,
        ) -> Result<TransportStream, TransportError> {
            let events = vec![Ok(StreamEvent::Chunk(self.0.to_string())), Ok(StreamEvent::End)];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count_tokens(&self, text: &str) -> u32 {
            text.chars().count() as u32
        }
    }

    fn lifecycle(reply: &'static str) -> CheckpointLifecycle {
        CheckpointLifecycle::new(
            Arc::new(SummarizationService::new(
                Arc::new(FixedTransport(reply)),
                Duration::from_secs(5),
            )),
            Arc::new(CharCounter),
        )
    }

    fn checkpoint(level: CompressionLevel, number: u32) -> CheckpointSummary {
        CheckpointSummary {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            summary_text: "a long detailed account of earlier work".into(),
            original_message_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
            token_count: 40,
            compression_level: level,
            compression_number: number,
            source_model: "llama3:8b".into(),
        }
    }

    #[tokio::test]
    async fn test_age_steps_down_one_level() {
        let lifecycle = lifecycle("shorter account");
        let original = checkpoint(CompressionLevel::Detailed, 1);

        let aged = lifecycle
            .age(&original, Mode::Assistant, None, "llama3:8b", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(aged.id, original.id);
        assert_eq!(aged.compression_level, CompressionLevel::Moderate);
        assert_eq!(aged.compression_number, 2);
        assert_eq!(aged.summary_text, "shorter account");
        assert_eq!(aged.original_message_ids, original.original_message_ids);
    }

    #[tokio::test]
    async fn test_compact_checkpoint_cannot_age() {
        let lifecycle = lifecycle("unused");
        let original = checkpoint(CompressionLevel::Compact, 3);
        let aged = lifecycle
            .age(&original, Mode::Assistant, None, "llama3:8b", &CancellationToken::new())
            .await
            .unwrap();
        assert!(aged.is_none());
    }

    #[tokio::test]
    async fn test_merge_unions_ids_and_increments_number() {
        let lifecycle = lifecycle("both segments merged");
        let mut first = checkpoint(CompressionLevel::Compact, 2);
        let second = checkpoint(CompressionLevel::Compact, 4);
        // A shared id must not be duplicated by the union.
        first.original_message_ids.push(second.original_message_ids[0]);

        let merged = lifecycle
            .merge(&first, &second, Mode::Assistant, None, "llama3:8b", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(merged.compression_level, CompressionLevel::Compact);
        assert_eq!(merged.compression_number, 5);
        assert_eq!(merged.original_message_ids.len(), 4);
        assert_ne!(merged.id, first.id);
        assert_ne!(merged.id, second.id);
    }

    #[test]
    fn test_reliability_score_matches_table() {
        let score = reliability_score(ModelSize::B7, 4);
        assert!((score - 0.5 * 0.9f64.powi(4)).abs() < 1e-9);
        assert!((score - 0.328).abs() < 0.001);
    }

    #[test]
    fn test_warn_threshold_boundary() {
        let limits = ReliabilityWarnLimits::default();
        // 7B limit is 5: warn once the next compression would reach it.
        assert!(!should_warn(&limits, ModelSize::B7, 3));
        assert!(should_warn(&limits, ModelSize::B7, 4));
        assert!(should_warn(&limits, ModelSize::B7, 5));
        // 3B limit is 3.
        assert!(!should_warn(&limits, ModelSize::B3, 1));
        assert!(should_warn(&limits, ModelSize::B3, 2));
    }
}
