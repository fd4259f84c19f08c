pub mod channels;
pub mod quiz;
pub mod session_store;
pub mod state_machine;
pub mod timers;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    config::AppConfig,
    dao::fast_store::FastStore,
    services::{
        answer_buffer::AnswerBuffer,
        audit::{AuditSink, TracingAuditSink},
        catalog::DurableQuizCatalog,
        fallback_guard::FallbackGuard,
        ffi::FfiResolver,
        leaderboard::Leaderboard,
        metrics,
        participants::ParticipantDirectory,
        scores::ScoreBook,
        scoring::{
            ScoringPipeline,
            batch::AnswerBatcher,
            pipeline::PipelineDeps,
        },
    },
};

use self::{channels::ChannelRegistry, quiz::QuizCatalog, session_store::SessionStore, timers::TimerManager};

/// Engine handle shared by routes and background tasks.
pub type SharedState = Arc<AppState>;

/// Engine components, constructed once at startup and shared by reference.
pub struct AppState {
    config: AppConfig,
    fast: Arc<dyn FastStore>,
    guard: Arc<FallbackGuard>,
    sessions: Arc<SessionStore>,
    participants: ParticipantDirectory,
    timers: TimerManager,
    answers: Arc<AnswerBuffer>,
    scores: ScoreBook,
    leaderboard: Arc<Leaderboard>,
    ffi: FfiResolver,
    channels: Arc<ChannelRegistry>,
    batcher: Arc<AnswerBatcher>,
    scoring: Arc<ScoringPipeline>,
    catalog: Arc<dyn QuizCatalog>,
    audit: Arc<dyn AuditSink>,
}

impl AppState {
    /// Construct the engine over `fast`, reading quizzes from the durable store.
    ///
    /// The engine starts in degraded mode until a durable store is installed
    /// into the fallback guard.
    pub fn new(config: AppConfig, fast: Arc<dyn FastStore>) -> SharedState {
        let guard = Arc::new(FallbackGuard::new(fast.clone(), config.fallback.clone()));
        let catalog = Arc::new(DurableQuizCatalog::new(guard.clone()));
        Self::build(config, fast, guard, catalog, Arc::new(TracingAuditSink))
    }

    /// Construct the engine with explicit quiz catalog and audit sink.
    pub fn with_collaborators(
        config: AppConfig,
        fast: Arc<dyn FastStore>,
        catalog: Arc<dyn QuizCatalog>,
        audit: Arc<dyn AuditSink>,
    ) -> SharedState {
        let guard = Arc::new(FallbackGuard::new(fast.clone(), config.fallback.clone()));
        Self::build(config, fast, guard, catalog, audit)
    }

    fn build(
        config: AppConfig,
        fast: Arc<dyn FastStore>,
        guard: Arc<FallbackGuard>,
        catalog: Arc<dyn QuizCatalog>,
        audit: Arc<dyn AuditSink>,
    ) -> SharedState {
        let sessions = Arc::new(SessionStore::new(
            fast.clone(),
            guard.clone(),
            config.flow.transition_timeout,
        ));
        let answers = Arc::new(AnswerBuffer::new(fast.clone(), config.answer_buffer.clone()));
        let scores = ScoreBook::new(fast.clone());
        let leaderboard = Arc::new(Leaderboard::new(fast.clone(), scores.clone()));
        let channels = Arc::new(ChannelRegistry::new(config.channels.capacity));
        let batcher = Arc::new(AnswerBatcher::new(guard.clone(), config.scoring.batch_size));
        let scoring = ScoringPipeline::new(PipelineDeps {
            fast: fast.clone(),
            sessions: sessions.clone(),
            answers: answers.clone(),
            scores: scores.clone(),
            leaderboard: leaderboard.clone(),
            catalog: catalog.clone(),
            batcher: batcher.clone(),
            channels: channels.clone(),
            audit: audit.clone(),
            late_submissions: config.scoring.late_submissions,
        });

        Arc::new(Self {
            participants: ParticipantDirectory::new(fast.clone()),
            timers: TimerManager::new(),
            ffi: FfiResolver::new(fast.clone(), config.ffi.clone()),
            config,
            fast,
            guard,
            sessions,
            answers,
            scores,
            leaderboard,
            channels,
            batcher,
            scoring,
            catalog,
            audit,
        })
    }

    /// Start the periodic batch flusher and the metrics poller.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            self.batcher.spawn_flusher(self.config.scoring.flush_interval),
            metrics::spawn_poller(self.clone(), self.config.metrics.interval),
        ]
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Fast store shared by every component.
    pub fn fast(&self) -> &Arc<dyn FastStore> {
        &self.fast
    }

    /// Durable-store fallback guard.
    pub fn guard(&self) -> &Arc<FallbackGuard> {
        &self.guard
    }

    /// Session lifecycle store.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Participant records.
    pub fn participants(&self) -> &ParticipantDirectory {
        &self.participants
    }

    /// Question countdowns.
    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }

    /// Buffered submissions.
    pub fn answers(&self) -> &AnswerBuffer {
        &self.answers
    }

    /// Running scores.
    pub fn scores(&self) -> &ScoreBook {
        &self.scores
    }

    /// Ranked standings.
    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    /// Fastest-finger-first resolver.
    pub fn ffi(&self) -> &FfiResolver {
        &self.ffi
    }

    /// Broadcast routing table.
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Scored-answer batch writer.
    pub fn batcher(&self) -> &Arc<AnswerBatcher> {
        &self.batcher
    }

    /// Scoring workers.
    pub fn scoring(&self) -> &Arc<ScoringPipeline> {
        &self.scoring
    }

    /// Quiz content lookup.
    pub fn catalog(&self) -> &Arc<dyn QuizCatalog> {
        &self.catalog
    }

    /// Audit event sink.
    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }
}
