
use super::*;
use crate::config::OrchestratorConfig;
use crate::policy::{
    Goal, GoalManager, GoalMarker, LlmTransport, Mode, ModeProvider, PromptAssembler,
    ProviderProfiles, StreamEvent, TokenCounter, TransportError, TransportOptions,
    TransportStream,
};
use crate::storage::{Message, Role};
use async_trait::async_trait;
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex as StdMutex;
use tokio::sync::broadcast;

/// Mock transport — returns a configurable summary, optionally failing
/// until told to recover.
pub(super) struct MockTransport {
    reply: StdMutex<String>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockTransport {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: StdMutex::new(reply.to_string()),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmTransport for MockTransport {
    async fn stream(
        &self,
        _model_id: &str,
        _messages: Vec<Message>,
        _options: TransportOptions,
    ) -> std::result::Result<TransportStream, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError("connection refused".into()));
        }
        let reply = self.reply.lock().unwrap().clone();
        let events = vec![Ok(StreamEvent::Chunk(reply)), Ok(StreamEvent::End)];
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// Mock prompt assembler — fixed system prompt, records the tier of the
/// last request.
pub(super) struct MockAssembler {
    prompt_tokens: u32,
    pub last_tier: StdMutex<Option<Tier>>,
}

impl MockAssembler {
    pub fn new(prompt_tokens: u32) -> Arc<Self> {
        Arc::new(Self {
            prompt_tokens,
            last_tier: StdMutex::new(None),
        })
    }
}

impl PromptAssembler for MockAssembler {
    fn build_system_prompt(&self, tier: Tier, _mode: Mode) -> Message {
        *self.last_tier.lock().unwrap() = Some(tier);
        Message::system("you are a local assistant").with_token_count(self.prompt_tokens)
    }

    fn system_prompt_tokens(&self) -> u32 {
        self.prompt_tokens
    }
}

/// Mock provider profiles — a fixed effective limit, or the standard 85%
/// of the requested size when none is set.
pub(super) struct MockProfiles {
    effective: Option<u32>,
}

impl MockProfiles {
    pub fn fixed(effective: u32) -> Arc<Self> {
        Arc::new(Self {
            effective: Some(effective),
        })
    }

    pub fn scaled() -> Arc<Self> {
        Arc::new(Self { effective: None })
    }
}

impl ProviderProfiles for MockProfiles {
    fn effective_limit(&self, _model_id: &str, requested_size: u32) -> u32 {
        self.effective
            .unwrap_or_else(|| (requested_size as f64 * 0.85) as u32)
    }

    fn context_limit(&self, _model_id: &str) -> u32 {
        self.effective.unwrap_or(8192)
    }
}

/// One character = one token; keeps test arithmetic exact.
pub(super) struct CharCounter;

impl TokenCounter for CharCounter {
    fn count_tokens(&self, text: &str) -> u32 {
        text.chars().count() as u32
    }
}

/// Mock goal manager — optional fixed goal, records applied markers.
pub(super) struct MockGoals {
    goal: Option<Goal>,
    pub applied: StdMutex<Vec<GoalMarker>>,
}

impl MockGoals {
    pub fn none() -> Arc<Self> {
        Arc::new(Self {
            goal: None,
            applied: StdMutex::new(Vec::new()),
        })
    }

    pub fn with_goal(goal: Goal) -> Arc<Self> {
        Arc::new(Self {
            goal: Some(goal),
            applied: StdMutex::new(Vec::new()),
        })
    }
}

impl GoalManager for MockGoals {
    fn active_goal(&self) -> Option<Goal> {
        self.goal.clone()
    }

    fn apply_markers(&self, _goal_id: &str, markers: &[GoalMarker]) {
        self.applied.lock().unwrap().extend_from_slice(markers);
    }
}

pub(super) struct FixedMode(pub Mode);

impl ModeProvider for FixedMode {
    fn current_mode(&self) -> Mode {
        self.0
    }
}

// === Shared helpers ===

pub(super) struct TestHarness {
    pub orchestrator: ContextOrchestrator,
    pub transport: Arc<MockTransport>,
    pub assembler: Arc<MockAssembler>,
    pub goals: Arc<MockGoals>,
    pub events: broadcast::Receiver<ContextEvent>,
    _dir: tempfile::TempDir,
}

pub(super) struct HarnessOptions {
    pub effective_limit: Option<u32>,
    pub config: OrchestratorConfig,
    pub model_id: &'static str,
    pub summary: &'static str,
    pub goals: Option<Arc<MockGoals>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        let mut config = OrchestratorConfig::default();
        config.reserved_response = 50;
        Self {
            effective_limit: Some(400),
            config,
            model_id: "llama3:8b",
            summary: "condensed",
            goals: None,
        }
    }
}

pub(super) async fn harness(options: HarnessOptions) -> TestHarness {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::new(options.summary);
    let assembler = MockAssembler::new(5);
    let goals = options.goals.unwrap_or_else(MockGoals::none);
    let profiles: Arc<MockProfiles> = match options.effective_limit {
        Some(limit) => MockProfiles::fixed(limit),
        None => MockProfiles::scaled(),
    };

    let orchestrator = ContextOrchestrator::new(
        Uuid::new_v4(),
        dir.path(),
        options.model_id,
        options.config,
        transport.clone(),
        assembler.clone(),
        profiles,
        Arc::new(CharCounter),
        goals.clone(),
        Arc::new(FixedMode(Mode::Assistant)),
    );
    let events = orchestrator.subscribe();
    orchestrator.start().await.unwrap();

    TestHarness {
        orchestrator,
        transport,
        assembler,
        goals,
        events,
        _dir: dir,
    }
}

impl TestHarness {
    pub fn root(&self) -> &std::path::Path {
        self._dir.path()
    }

    pub fn session_dir(&self) -> std::path::PathBuf {
        self.root()
            .join("sessions")
            .join(self.orchestrator.session_id().to_string())
    }
}

pub(super) fn drain(rx: &mut broadcast::Receiver<ContextEvent>) -> Vec<ContextEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub(super) fn count_matching(events: &[ContextEvent], pred: impl Fn(&ContextEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}
