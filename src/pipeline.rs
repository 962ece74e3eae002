//! The compression pipeline: selects older messages, summarizes them into
//! a checkpoint, updates the active context, and re-validates.
//!
//! Stages 4–5 apply as one transaction: a summarizer failure in stage 3
//! leaves the active context and history untouched.

use crate::active::ActiveContextManager;
use crate::config::OrchestratorConfig;
use crate::error::{ContextError, Result};
use crate::history::HistoryStore;
use crate::policy::{Goal, GoalMarker, Mode, TokenCounter};
use crate::storage::{CheckpointRecord, CheckpointSummary, CompressionLevel, Message, Role};
use crate::summarize::{SummarizationService, SummarizeRequest};
use crate::validate::{Validation, ValidationService};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Older assistant messages needed before a compression is worthwhile.
const MIN_COMPRESSIBLE: usize = 5;

/// What a pipeline run produced.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Compressed(CompressionReport),
    /// Not enough older assistant messages. A no-op, not an error.
    NothingToCompress,
}

#[derive(Debug, Clone)]
pub struct CompressionReport {
    pub checkpoint_id: Uuid,
    pub messages_compressed: usize,
    pub original_tokens: u32,
    pub compressed_tokens: u32,
    pub level: CompressionLevel,
    pub compression_number: u32,
    pub markers: Vec<GoalMarker>,
    /// Stage-6 re-validation of the updated context.
    pub validation: Validation,
}

pub struct CompressionPipeline {
    summarizer: Arc<SummarizationService>,
    validator: Arc<ValidationService>,
    counter: Arc<dyn TokenCounter>,
}

impl CompressionPipeline {
    pub fn new(
        summarizer: Arc<SummarizationService>,
        validator: Arc<ValidationService>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            summarizer,
            validator,
            counter,
        }
    }

    fn message_tokens(&self, message: &Message) -> u32 {
        message
            .token_count
            .unwrap_or_else(|| self.counter.count_tokens(&message.content))
    }

    /// Choose the compression level from the original token total.
    fn level_for(&self, config: &OrchestratorConfig, original_tokens: u32) -> CompressionLevel {
        let thresholds = config.level_thresholds;
        if original_tokens > thresholds.compact {
            CompressionLevel::Compact
        } else if original_tokens > thresholds.moderate {
            CompressionLevel::Moderate
        } else {
            CompressionLevel::Detailed
        }
    }

    /// Run all six stages against the given context and history.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        active: &mut ActiveContextManager,
        history: &mut HistoryStore,
        config: &OrchestratorConfig,
        mode: Mode,
        goal: Option<&Goal>,
        model_id: &str,
        forced_level: Option<CompressionLevel>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        // Stage 1: identification. The last keep_recent_count messages are
        // always preserved; only assistant messages among the rest are
        // candidates unless the user-compression policy switch is on.
        let recent = active.recent_messages();
        if recent.len() <= config.keep_recent_count {
            return Ok(PipelineOutcome::NothingToCompress);
        }
        let selected: Vec<Message> = recent[..recent.len() - config.keep_recent_count]
            .iter()
            .filter(|m| {
                m.role == Role::Assistant || (config.compress_user_messages && m.role == Role::User)
            })
            .cloned()
            .collect();
        if selected.len() < MIN_COMPRESSIBLE {
            tracing::debug!(candidates = selected.len(), "nothing to compress");
            return Ok(PipelineOutcome::NothingToCompress);
        }

        // Stage 2: preparation.
        let original_tokens: u32 = selected.iter().map(|m| self.message_tokens(m)).sum();
        let level = forced_level.unwrap_or_else(|| self.level_for(config, original_tokens));
        tracing::info!(
            messages = selected.len(),
            original_tokens,
            level = level.as_u8(),
            "compression pass"
        );

        // Stage 3: summarization. A failure here propagates with the
        // context untouched.
        let output = self
            .summarizer
            .summarize(
                SummarizeRequest {
                    messages: &selected,
                    level,
                    mode,
                    goal,
                    model_id,
                    merge: false,
                },
                cancel,
            )
            .await
            .map_err(ContextError::SummarizationFailed)?;

        // Stage 4: checkpoint creation.
        let selected_ids: Vec<Uuid> = selected.iter().map(|m| m.id).collect();
        let compressed_tokens = self.counter.count_tokens(&output.text);
        let compression_number = history.compression_count() + 1;
        let checkpoint = CheckpointSummary {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            summary_text: output.text,
            original_message_ids: selected_ids.clone(),
            token_count: compressed_tokens,
            compression_level: level,
            compression_number,
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
            level,
        });

        // Stage 5: context update.
        active.remove_messages(&selected_ids);
        active.add_checkpoint(checkpoint.clone());

        // Stage 6: re-validation of the updated prompt.
        let prompt = active.build_prompt(None)?;
        let validation = self.validator.validate(&prompt, model_id);

        tracing::info!(
            checkpoint_id = %checkpoint.id,
            original_tokens,
            compressed_tokens,
            fits = validation.is_fit(),
            "compression complete"
        );

        Ok(PipelineOutcome::Compressed(CompressionReport {
            checkpoint_id: checkpoint.id,
            messages_compressed: selected_ids.len(),
            original_tokens,
            compressed_tokens,
            level,
            compression_number,
            markers: output.markers,
            validation,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{
        LlmTransport, ProviderProfiles, StreamEvent, TransportError, TransportOptions,
        TransportStream,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedTransport(&'static str);

    #[async_trait]
    impl LlmTransport for FixedTransport {
        async fn stream(
            &self,
            _model_id: &str,
            _messages: Vec<Message>,
            _options: TransportOptions,
        ) -> std::result::Result<TransportStream, TransportError> {
            let events = vec![Ok(StreamEvent::Chunk(self.0.to_string())), Ok(StreamEvent::End)];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl LlmTransport for FailingTransport {
        async fn stream(
            &self,
            _model_id: &str,
            _messages: Vec<Message>,
            _options: TransportOptions,
        ) -> std::result::Result<TransportStream, TransportError> {
            Err(TransportError("connection refused".into()))
        }
    }

    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count_tokens(&self, text: &str) -> u32 {
            text.chars().count() as u32
        }
    }

    struct FixedProfiles(u32);

    impl ProviderProfiles for FixedProfiles {
        fn effective_limit(&self, _model_id: &str, _requested_size: u32) -> u32 {
            self.0
        }

        fn context_limit(&self, _model_id: &str) -> u32 {
            self.0
        }
    }

    fn pipeline(transport: Arc<dyn LlmTransport>, limit: u32) -> CompressionPipeline {
        let counter: Arc<dyn TokenCounter> = Arc::new(CharCounter);
        CompressionPipeline::new(
            Arc::new(SummarizationService::new(transport, Duration::from_secs(5))),
            Arc::new(ValidationService::new(
                Arc::new(FixedProfiles(limit)),
                counter.clone(),
                8192,
                50,
            )),
            counter,
        )
    }

    fn context(limit: u32) -> ActiveContextManager {
        ActiveContextManager::new(
            Message::system("sys").with_token_count(5),
            Arc::new(CharCounter),
            limit,
            50,
        )
    }

    fn seeded(limit: u32, assistants: usize, tokens_each: u32) -> (ActiveContextManager, HistoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut history = HistoryStore::open(dir.path(), Uuid::new_v4()).unwrap();
        // Seed with a roomy budget, then tighten for the test.
        let mut active = context(u32::MAX);
        for i in 0..assistants {
            let msg = Message::assistant(format!("reply {i}")).with_token_count(tokens_each);
            history.append(&msg);
            active.add_message(msg).unwrap();
        }
        active.set_limits(limit, 50);
        (active, history, dir)
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::default()
    }

    #[tokio::test]
    async fn test_too_few_candidates_is_a_noop() {
        let (mut active, mut history, _dir) = seeded(400, 8, 30);
        // 8 messages, last 5 preserved → 3 candidates < 5.
        let pipeline = pipeline(Arc::new(FixedTransport("summary")), 400);
        let outcome = pipeline
            .run(
                &mut active,
                &mut history,
                &config(),
                Mode::Assistant,
                None,
                "llama3:8b",
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, PipelineOutcome::NothingToCompress));
        assert_eq!(active.recent_messages().len(), 8);
        assert_eq!(history.compression_count(), 0);
    }

    #[tokio::test]
    async fn test_compresses_older_assistants_into_one_checkpoint() {
        let (mut active, mut history, _dir) = seeded(400, 20, 30);
        let pipeline = pipeline(Arc::new(FixedTransport("condensed history")), 400);

        let outcome = pipeline
            .run(
                &mut active,
                &mut history,
                &config(),
                Mode::Assistant,
                None,
                "llama3:8b",
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let PipelineOutcome::Compressed(report) = outcome else {
            panic!("expected compression");
        };
        assert_eq!(report.messages_compressed, 15);
        assert_eq!(report.original_tokens, 450);
        assert_eq!(report.compression_number, 1);
        assert!(report.validation.is_fit());

        assert_eq!(active.checkpoints().len(), 1);
        assert_eq!(active.recent_messages().len(), 5);
        assert_eq!(active.checkpoints()[0].original_message_ids.len(), 15);
        assert!(active.token_count().total <= 350);

        // History keeps every message and gains one record.
        assert_eq!(history.messages().len(), 20);
        assert_eq!(history.compression_count(), 1);
        let record = &history.full().checkpoint_records[0];
        assert_eq!(record.message_index_range, (0, 14));
        assert!(record.ratio < 1.0);
    }

    #[tokio::test]
    async fn test_level_thresholds() {
        // 15 selected at 150 tokens each = 2250 original → moderate.
        let (mut active, mut history, _dir) = seeded(10_000, 20, 150);
        let pipeline = pipeline(Arc::new(FixedTransport("condensed")), 10_000);
        let outcome = pipeline
            .run(
                &mut active,
                &mut history,
                &config(),
                Mode::Assistant,
                None,
                "llama3:8b",
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let PipelineOutcome::Compressed(report) = outcome else {
            panic!("expected compression");
        };
        assert_eq!(report.level, CompressionLevel::Moderate);

        // 15 selected at 250 each = 3750 → compact.
        let (mut active, mut history, _dir) = seeded(10_000, 20, 250);
        let outcome = pipeline
            .run(
                &mut active,
                &mut history,
                &config(),
                Mode::Assistant,
                None,
                "llama3:8b",
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let PipelineOutcome::Compressed(report) = outcome else {
            panic!("expected compression");
        };
        assert_eq!(report.level, CompressionLevel::Compact);
    }

    #[tokio::test]
    async fn test_forced_level_wins() {
        let (mut active, mut history, _dir) = seeded(400, 20, 30);
        let pipeline = pipeline(Arc::new(FixedTransport("condensed")), 400);
        let outcome = pipeline
            .run(
                &mut active,
                &mut history,
                &config(),
                Mode::Assistant,
                None,
                "llama3:8b",
                Some(CompressionLevel::Compact),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let PipelineOutcome::Compressed(report) = outcome else {
            panic!("expected compression");
        };
        assert_eq!(report.level, CompressionLevel::Compact);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_context_untouched() {
        let (mut active, mut history, _dir) = seeded(400, 20, 30);
        let before = active.token_count();
        let pipeline = pipeline(Arc::new(FailingTransport), 400);

        let err = pipeline
            .run(
                &mut active,
                &mut history,
                &config(),
                Mode::Assistant,
                None,
                "llama3:8b",
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ContextError::SummarizationFailed(_)));
        assert_eq!(active.token_count(), before);
        assert_eq!(active.recent_messages().len(), 20);
        assert!(active.checkpoints().is_empty());
        assert_eq!(history.compression_count(), 0);
        assert!(history.full().checkpoint_records.is_empty());
    }

    #[tokio::test]
    async fn test_user_messages_skipped_unless_policy_allows() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = HistoryStore::open(dir.path(), Uuid::new_v4()).unwrap();
        let mut active = context(u32::MAX);
        for i in 0..10 {
            let msg = if i % 2 == 0 {
                Message::user(format!("question {i}")).with_token_count(30)
            } else {
                Message::assistant(format!("answer {i}")).with_token_count(30)
            };
            history.append(&msg);
            active.add_message(msg).unwrap();
        }
        active.set_limits(400, 50);

        // 5 older (last 5 preserved), only ~2-3 assistants among them.
        let pipeline = pipeline(Arc::new(FixedTransport("condensed")), 400);
        let outcome = pipeline
            .run(
                &mut active,
                &mut history,
                &config(),
                Mode::Assistant,
                None,
                "llama3:8b",
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, PipelineOutcome::NothingToCompress));

        // With the policy switch on, user messages count as candidates.
        let mut permissive = config();
        permissive.compress_user_messages = true;
        let outcome = pipeline
            .run(
                &mut active,
                &mut history,
                &permissive,
                Mode::Assistant,
                None,
                "llama3:8b",
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, PipelineOutcome::Compressed(_)));
    }
}
