//! Context orchestrator: the single entry point the chat loop talks to.
//!
//! One orchestrator per session, explicitly constructed with its
//! collaborators. A single writer lock guards the active context and the
//! pipeline; it is held across the summarizer's suspension point only for
//! the duration of a compression transaction.

mod events;
mod lockfile;
#[cfg(test)]
mod tests;

pub use events::ContextEvent;

use crate::active::{ActiveContextManager, TokenBreakdown};
use crate::checkpoint::{self, CheckpointLifecycle};
use crate::config::OrchestratorConfig;
use crate::emergency::EmergencyActions;
use crate::error::{ContextError, Result};
use crate::history::HistoryStore;
use crate::pipeline::{CompressionPipeline, CompressionReport, PipelineOutcome};
use crate::policy::{
    GoalManager, LlmTransport, Mode, ModeProvider, ModelSize, PromptAssembler, ProviderProfiles,
    Tier, TokenCounter,
};
use crate::snapshot::SnapshotStore;
use crate::storage::{Message, SnapshotData, SnapshotPurpose};
use crate::summarize::SummarizationService;
use crate::validate::{Validation, ValidationService};
use events::EventBus;
use lockfile::SessionLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Uninitialized,
    Ready,
    Summarizing,
    Restoring,
    Fatal,
}

impl OrchestratorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorState::Uninitialized => "uninitialized",
            OrchestratorState::Ready => "ready",
            OrchestratorState::Summarizing => "summarizing",
            OrchestratorState::Restoring => "restoring",
            OrchestratorState::Fatal => "fatal",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => OrchestratorState::Ready,
            2 => OrchestratorState::Summarizing,
            3 => OrchestratorState::Restoring,
            4 => OrchestratorState::Fatal,
            _ => OrchestratorState::Uninitialized,
        }
    }
}

/// Live usage numbers for the status line.
#[derive(Debug, Clone, Copy)]
pub struct ContextUsage {
    pub used_tokens: u32,
    pub effective_limit: u32,
    pub percent_used: f32,
    pub breakdown: TokenBreakdown,
}

/// Full state snapshot returned by [`ContextOrchestrator::state`].
#[derive(Debug, Clone)]
pub struct ContextState {
    pub state: OrchestratorState,
    pub tier: Tier,
    pub mode: Mode,
    pub usage: ContextUsage,
    pub compression_count: u32,
    pub snapshot_count: usize,
}

struct SessionState {
    active: ActiveContextManager,
    history: HistoryStore,
    lock: Option<SessionLock>,
    validator: Arc<ValidationService>,
    pipeline: Arc<CompressionPipeline>,
    lifecycle: Arc<CheckpointLifecycle>,
    emergency: Arc<EmergencyActions>,
}

struct Inner {
    state: OrchestratorState,
    config: OrchestratorConfig,
    model_id: String,
    tier: Tier,
    session: Option<SessionState>,
}

pub struct ContextOrchestrator {
    session_id: Uuid,
    snapshots: SnapshotStore,
    inner: Mutex<Inner>,
    events: EventBus,
    summarizing: AtomicBool,
    summarize_done: Notify,
    state_mirror: AtomicU8,
    current_cancel: std::sync::Mutex<CancellationToken>,
    transport: Arc<dyn LlmTransport>,
    assembler: Arc<dyn PromptAssembler>,
    profiles: Arc<dyn ProviderProfiles>,
    counter: Arc<dyn TokenCounter>,
    goals: Arc<dyn GoalManager>,
    modes: Arc<dyn ModeProvider>,
    root: PathBuf,
}

impl ContextOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: Uuid,
        root: impl Into<PathBuf>,
        model_id: impl Into<String>,
        config: OrchestratorConfig,
        transport: Arc<dyn LlmTransport>,
        assembler: Arc<dyn PromptAssembler>,
        profiles: Arc<dyn ProviderProfiles>,
        counter: Arc<dyn TokenCounter>,
        goals: Arc<dyn GoalManager>,
        modes: Arc<dyn ModeProvider>,
    ) -> Self {
        let root = root.into();
        let tier = Tier::from_requested_size(config.requested_size);
        Self {
            session_id,
            snapshots: SnapshotStore::new(&root, session_id),
            inner: Mutex::new(Inner {
                state: OrchestratorState::Uninitialized,
                config,
                model_id: model_id.into(),
                tier,
                session: None,
            }),
            events: EventBus::new(64),
            summarizing: AtomicBool::new(false),
            summarize_done: Notify::new(),
            state_mirror: AtomicU8::new(0),
            current_cancel: std::sync::Mutex::new(CancellationToken::new()),
            transport,
            assembler,
            profiles,
            counter,
            goals,
            modes,
            root,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Subscribe to the event surface.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ContextEvent> {
        self.events.subscribe()
    }

    fn set_state(&self, inner: &mut Inner, state: OrchestratorState) {
        inner.state = state;
        self.state_mirror.store(state as u8, Ordering::Release);
    }

    /// Current lifecycle state, readable without the writer lock.
    pub fn current_state(&self) -> OrchestratorState {
        OrchestratorState::from_u8(self.state_mirror.load(Ordering::Acquire))
    }

    fn build_session(&self, inner: &Inner, lock: SessionLock, history: HistoryStore) -> SessionState {
        let mode = self.modes.current_mode();
        let system_prompt = self.assembler.build_system_prompt(inner.tier, mode);
        let effective_limit = self
            .profiles
            .effective_limit(&inner.model_id, inner.config.requested_size);

        let active = ActiveContextManager::new(
            system_prompt,
            self.counter.clone(),
            effective_limit,
            inner.config.reserved_response,
        );

        let summarizer = Arc::new(SummarizationService::new(
            self.transport.clone(),
            Duration::from_secs(inner.config.summarization_timeout_secs),
        ));
        let validator = Arc::new(ValidationService::new(
            self.profiles.clone(),
            self.counter.clone(),
            inner.config.requested_size,
            inner.config.reserved_response,
        ));
        let pipeline = Arc::new(CompressionPipeline::new(
            summarizer.clone(),
            validator.clone(),
            self.counter.clone(),
        ));
        let lifecycle = Arc::new(CheckpointLifecycle::new(
            summarizer.clone(),
            self.counter.clone(),
        ));
        let emergency = Arc::new(EmergencyActions::new(
            pipeline.clone(),
            lifecycle.clone(),
            validator.clone(),
            summarizer.clone(),
            self.counter.clone(),
        ));

        SessionState {
            active,
            history,
            lock: Some(lock),
            validator,
            pipeline,
            lifecycle,
            emergency,
        }
    }

    /// Acquire the session lock, load history if present, derive the
    /// system prompt, and become `Ready`.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != OrchestratorState::Uninitialized {
            return Err(ContextError::InvalidState {
                state: inner.state.as_str(),
            });
        }

        let session_dir = self
            .root
            .join("sessions")
            .join(self.session_id.to_string());
        let lock = SessionLock::acquire(&session_dir)?;
        let history = HistoryStore::open(&self.root, self.session_id)?;

        inner.tier = Tier::from_requested_size(inner.config.requested_size);
        let session = self.build_session(&inner, lock, history);
        inner.session = Some(session);
        self.set_state(&mut inner, OrchestratorState::Ready);

        tracing::info!(
            session_id = %self.session_id,
            tier = inner.tier.as_str(),
            model = %inner.model_id,
            "context orchestrator started"
        );
        self.events.emit(ContextEvent::Started {
            session_id: self.session_id,
            tier: inner.tier,
        });
        Ok(())
    }

    /// Save state, release the session lock, and return to `Uninitialized`.
    pub async fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(mut session) = inner.session.take() {
            session.history.save()?;
            if let Some(lock) = session.lock.take() {
                lock.release();
            }
        }
        self.set_state(&mut inner, OrchestratorState::Uninitialized);
        tracing::info!(session_id = %self.session_id, "context orchestrator shut down");
        Ok(())
    }

    fn ensure_ready(inner: &Inner) -> Result<()> {
        match inner.state {
            OrchestratorState::Ready => Ok(()),
            OrchestratorState::Fatal => Err(ContextError::StoreUnavailable {
                reason: "session is in a fatal state".into(),
            }),
            other => Err(ContextError::InvalidState {
                state: other.as_str(),
            }),
        }
    }

    /// Accept a message into the session. Compresses first when the
    /// message would not fit, escalating to emergency actions if needed.
    ///
    /// Linearizes with other calls: a message accepted after another
    /// appears after it in both the active context and history.
    pub async fn add_message(&self, message: Message) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_ready(&inner)?;

        let needs_compression = {
            let session = inner.session.as_mut().expect("session exists when ready");
            session.active.would_exceed(&message).is_some()
        };

        if needs_compression {
            self.compress_to_fit(&mut inner, &message).await?;
        }

        let session = inner.session.as_mut().expect("session exists when ready");
        session.active.add_message(message.clone())?;
        session.history.append(&message);
        if let Err(e) = session.history.save() {
            self.set_state(&mut inner, OrchestratorState::Fatal);
            return Err(e);
        }
        Ok(())
    }

    /// The prompt for this turn: validated, provenance-checked, ready for
    /// the transport.
    pub async fn build_prompt_for_turn(&self) -> Result<Vec<Message>> {
        let mut inner = self.inner.lock().await;
        Self::ensure_ready(&inner)?;
        let model_id = inner.model_id.clone();
        let session = inner.session.as_mut().expect("session exists when ready");

        let prompt = session.active.build_prompt(None)?;
        match session.validator.validate(&prompt, &model_id) {
            Validation::Fit { .. } => Ok(prompt),
            Validation::Over { tokens, limit, by } => {
                Err(ContextError::ValidationOver { tokens, limit, by })
            }
        }
    }

    /// Create a recovery snapshot of the full conversation state.
    pub async fn create_snapshot(&self, purpose: SnapshotPurpose) -> Result<Uuid> {
        let mut inner = self.inner.lock().await;
        Self::ensure_ready(&inner)?;
        let keep = inner.config.snapshot_keep;
        let session = inner.session.as_mut().expect("session exists when ready");

        let (recent, checkpoints) = session.active.snapshot_state();
        let recent_ids: Vec<Uuid> = recent.iter().map(|m| m.id).collect();
        let snapshot = self.snapshots.create(
            session.history.messages(),
            &checkpoints,
            recent_ids,
            purpose,
        )?;
        self.snapshots.prune(keep)?;

        self.events.emit(ContextEvent::SnapshotCreated {
            snapshot_id: snapshot.id,
            purpose,
        });
        Ok(snapshot.id)
    }

    /// Replace the active context with the state captured in a snapshot.
    /// History is not touched; the system prompt is re-derived from the
    /// prompt assembler.
    pub async fn restore_snapshot(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_ready(&inner)?;
        self.set_state(&mut inner, OrchestratorState::Restoring);

        let result = (|| -> Result<()> {
            let (messages, checkpoints) = self.snapshots.restore(id)?;
            let tier = inner.tier;
            let mode = self.modes.current_mode();
            let system_prompt = self.assembler.build_system_prompt(tier, mode);
            let session = inner.session.as_mut().expect("session exists when ready");
            session.active.set_system_prompt(system_prompt);
            session.active.install(messages, checkpoints);
            Ok(())
        })();

        self.set_state(&mut inner, OrchestratorState::Ready);
        result?;

        tracing::info!(snapshot_id = %id, "snapshot restored");
        self.events.emit(ContextEvent::SnapshotRestored { snapshot_id: id });
        Ok(())
    }

    /// List on-disk snapshots, newest first. Does not take the writer lock.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotData>> {
        self.snapshots.list()
    }

    /// Full state snapshot for status displays.
    pub async fn state(&self) -> Result<ContextState> {
        let inner = self.inner.lock().await;
        let snapshot_count = self.snapshots.count()?;
        let usage = match &inner.session {
            Some(session) => {
                let breakdown = session.active.token_count();
                let effective_limit = self
                    .profiles
                    .effective_limit(&inner.model_id, inner.config.requested_size);
                ContextUsage {
                    used_tokens: breakdown.total,
                    effective_limit,
                    percent_used: if effective_limit == 0 {
                        0.0
                    } else {
                        breakdown.total as f32 / effective_limit as f32 * 100.0
                    },
                    breakdown,
                }
            }
            None => ContextUsage {
                used_tokens: 0,
                effective_limit: 0,
                percent_used: 0.0,
                breakdown: TokenBreakdown::default(),
            },
        };

        Ok(ContextState {
            state: inner.state,
            tier: inner.tier,
            mode: self.modes.current_mode(),
            usage,
            compression_count: inner
                .session
                .as_ref()
                .map(|s| s.history.compression_count())
                .unwrap_or(0),
            snapshot_count,
        })
    }

    /// The pre-computed effective context size, exposed so the chat
    /// transport can set model-level parameters coherently.
    pub async fn ollama_context_limit(&self) -> u32 {
        let inner = self.inner.lock().await;
        self.profiles
            .effective_limit(&inner.model_id, inner.config.requested_size)
    }

    /// Render the full session history as markdown.
    pub async fn export_history_markdown(&self) -> Result<String> {
        let inner = self.inner.lock().await;
        let session = inner
            .session
            .as_ref()
            .ok_or(ContextError::InvalidState {
                state: inner.state.as_str(),
            })?;
        Ok(session.history.export_markdown())
    }

    pub fn is_summarization_in_progress(&self) -> bool {
        self.summarizing.load(Ordering::Acquire)
    }

    /// Await completion of any in-flight summarization without polling.
    pub async fn wait_for_summarization(&self) {
        loop {
            let notified = self.summarize_done.notified();
            if !self.summarizing.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    /// Handle that aborts the in-flight LLM call, leaving the session
    /// `Ready` with its context unchanged.
    pub fn cancellation_handle(&self) -> CancellationToken {
        self.current_cancel
            .lock()
            .expect("cancel lock poisoned")
            .clone()
    }

    /// Apply a new configuration. Re-derives the tier (and, when it
    /// changes, the system prompt) and rebuilds the dependent services.
    pub async fn update_config(&self, config: OrchestratorConfig) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != OrchestratorState::Uninitialized {
            Self::ensure_ready(&inner)?;
        }

        let previous_tier = inner.tier;
        inner.config = config;
        inner.tier = Tier::from_requested_size(inner.config.requested_size);

        if inner.session.is_some() {
            let tier = inner.tier;
            let mode = self.modes.current_mode();
            let effective_limit = self
                .profiles
                .effective_limit(&inner.model_id, inner.config.requested_size);
            let reserved = inner.config.reserved_response;
            let requested = inner.config.requested_size;
            let timeout = inner.config.summarization_timeout_secs;

            let summarizer = Arc::new(SummarizationService::new(
                self.transport.clone(),
                Duration::from_secs(timeout),
            ));
            let validator = Arc::new(ValidationService::new(
                self.profiles.clone(),
                self.counter.clone(),
                requested,
                reserved,
            ));
            let pipeline = Arc::new(CompressionPipeline::new(
                summarizer.clone(),
                validator.clone(),
                self.counter.clone(),
            ));
            let lifecycle = Arc::new(CheckpointLifecycle::new(
                summarizer.clone(),
                self.counter.clone(),
            ));
            let emergency = Arc::new(EmergencyActions::new(
                pipeline.clone(),
                lifecycle.clone(),
                validator.clone(),
                summarizer.clone(),
                self.counter.clone(),
            ));

            let session = inner.session.as_mut().expect("session checked above");
            session.validator = validator;
            session.pipeline = pipeline;
            session.lifecycle = lifecycle;
            session.emergency = emergency;
            session.active.set_limits(effective_limit, reserved);

            if tier != previous_tier {
                let system_prompt = self.assembler.build_system_prompt(tier, mode);
                session.active.set_system_prompt(system_prompt);
                self.events.emit(ContextEvent::TierChanged {
                    previous: previous_tier,
                    current: tier,
                });
            }
        }

        self.events.emit(ContextEvent::ConfigUpdated);
        Ok(())
    }

    /// The compression transaction: normal pipeline pass, checkpoint aging
    /// under continued pressure, then emergency actions. Holds the writer
    /// lock across the summarizer's suspension points.
    async fn compress_to_fit(&self, inner: &mut Inner, pending: &Message) -> Result<()> {
        self.set_state(inner, OrchestratorState::Summarizing);
        self.summarizing.store(true, Ordering::Release);
        let cancel = CancellationToken::new();
        *self
            .current_cancel
            .lock()
            .expect("cancel lock poisoned") = cancel.clone();

        let result = self.run_compression(inner, pending, &cancel).await;

        self.summarizing.store(false, Ordering::Release);
        self.summarize_done.notify_waiters();
        if inner.state == OrchestratorState::Summarizing {
            self.set_state(inner, OrchestratorState::Ready);
        }
        result
    }

    fn emit_reliability_warning(&self, inner: &Inner, report: &CompressionReport) {
        let model_size = ModelSize::classify(&inner.model_id);
        if checkpoint::should_warn(
            &inner.config.reliability_warn_limits,
            model_size,
            report.compression_number,
        ) {
            let score = checkpoint::reliability_score(model_size, report.compression_number);
            tracing::warn!(
                checkpoint_id = %report.checkpoint_id,
                score,
                model_size = model_size.as_str(),
                "summary reliability degrading"
            );
            self.events.emit(ContextEvent::ReliabilityWarning {
                checkpoint_id: report.checkpoint_id,
                score,
                model_size,
                compression_number: report.compression_number,
            });
        }
    }

    async fn run_compression(
        &self,
        inner: &mut Inner,
        pending: &Message,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let config = inner.config.clone();
        let model_id = inner.model_id.clone();
        let mode = self.modes.current_mode();
        let goal = self.goals.active_goal();

        let tokens_before;
        let report = {
            let session = inner.session.as_mut().expect("session exists when ready");
            tokens_before = session.active.token_count().total;
            self.events.emit(ContextEvent::CompressionStarted {
                message_count: session.active.recent_messages().len(),
                tokens_before,
            });

            // Normal pipeline pass.
            let pipeline = session.pipeline.clone();
            let outcome = pipeline
                .run(
                    &mut session.active,
                    &mut session.history,
                    &config,
                    mode,
                    goal.as_ref(),
                    &model_id,
                    None,
                    cancel,
                )
                .await?;

            match outcome {
                PipelineOutcome::Compressed(report) => {
                    if let Some(goal) = &goal
                        && !report.markers.is_empty()
                    {
                        self.goals.apply_markers(&goal.id, &report.markers);
                    }
                    Some(report)
                }
                PipelineOutcome::NothingToCompress => None,
            }
        };

        // Age checkpoints while the pending message still does not fit.
        {
            let session = inner.session.as_mut().expect("session exists when ready");
            let lifecycle = session.lifecycle.clone();
            while session.active.would_exceed(pending).is_some() {
                let Some(target) = session
                    .active
                    .checkpoints()
                    .iter()
                    .find(|c| c.compression_level.lower().is_some())
                    .cloned()
                else {
                    break;
                };

                match lifecycle
                    .age(&target, mode, goal.as_ref(), &model_id, cancel)
                    .await
                {
                    Ok(Some(aged)) => {
                        session.active.replace_checkpoint(aged);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "checkpoint aging failed");
                        break;
                    }
                }
            }
        }

        // Persist what the pipeline recorded so far.
        {
            let session = inner.session.as_mut().expect("session exists when ready");
            if let Err(e) = session.history.save() {
                self.set_state(inner, OrchestratorState::Fatal);
                return Err(e);
            }
        }

        let still_over = {
            let session = inner.session.as_mut().expect("session exists when ready");
            session.active.would_exceed(pending).is_some()
        };
        if !still_over {
            self.finish_compression(inner, report.as_ref(), tokens_before);
            return Ok(());
        }

        // Emergency path.
        let outcome = {
            let session = inner.session.as_mut().expect("session exists when ready");
            let emergency = session.emergency.clone();
            emergency
                .run(
                    &mut session.active,
                    &mut session.history,
                    &self.snapshots,
                    &config,
                    mode,
                    goal.as_ref(),
                    &model_id,
                    Some(pending),
                    cancel,
                )
                .await?
        };

        self.events.emit(ContextEvent::SnapshotCreated {
            snapshot_id: outcome.snapshot_id,
            purpose: SnapshotPurpose::Emergency,
        });
        for (strategy, succeeded) in &outcome.attempts {
            self.events.emit(ContextEvent::Emergency {
                strategy: *strategy,
                succeeded: *succeeded,
            });
        }
        self.snapshots.prune(config.snapshot_keep)?;

        {
            let session = inner.session.as_mut().expect("session exists when ready");
            if let Err(e) = session.history.save() {
                self.set_state(inner, OrchestratorState::Fatal);
                return Err(e);
            }
        }

        if outcome.resolved {
            self.finish_compression(inner, report.as_ref(), tokens_before);
            Ok(())
        } else {
            tracing::error!(
                snapshot_id = %outcome.snapshot_id,
                "prompt cannot be made to fit"
            );
            Err(ContextError::CannotFit {
                snapshot_id: outcome.snapshot_id,
            })
        }
    }

    /// Close out a successful compression transaction: emit
    /// `compression-completed` for the checkpoint now carrying the
    /// compressed content, plus a reliability warning when due. A turn
    /// resolved purely by rollover produced no checkpoint and is covered
    /// by its emergency event alone.
    fn finish_compression(
        &self,
        inner: &Inner,
        report: Option<&CompressionReport>,
        tokens_before: u32,
    ) {
        let Some(session) = inner.session.as_ref() else {
            return;
        };

        let completed = match report {
            Some(report) => Some((
                report.checkpoint_id,
                report.original_tokens,
                report.compressed_tokens,
                report.level,
            )),
            None => session
                .active
                .checkpoints()
                .last()
                .map(|cp| (cp.id, tokens_before, cp.token_count, cp.compression_level)),
        };
        let Some((checkpoint_id, original_tokens, compressed_tokens, level)) = completed else {
            return;
        };

        self.events.emit(ContextEvent::CompressionCompleted {
            checkpoint_id,
            original_tokens,
            compressed_tokens,
            level,
        });
        if let Some(report) = report {
            self.emit_reliability_warning(inner, report);
        }
    }
}
