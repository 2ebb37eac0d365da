//! Dispatch engine: the conversational entry point.
//!
//! Each utterance runs as one turn against its session:
//!
//! 1. Take the per-session lock and load the session from the store.
//! 2. Route: meta command, disambiguation follow-up, new intent, or
//!    continued slot filling.
//! 3. Extract parameters under a timeout, then invoke the command once every
//!    required slot is filled and phrase its reply.
//! 4. Record the turn and persist the session.
//!
//! Turns for one session are serialized; distinct sessions run concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use parley_action::{
    CommandArgs, CommandExecutor, CommandHandler, CommandRegistry, CommandSpec, ExecutionError,
    RegisterOutcome, RegistrationError,
};
use parley_core::{
    ConversationSession, ParamSpec, ParleyConfig, ResolutionState, Turn, TurnError, TurnErrorKind,
};
use parley_storage::{Durability, SessionStore};
use parley_vector::{
    EmbeddingIndexer, IndexError, IntentMatcher, MatchParams, Resolution, ResolutionError,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ExtractionError, InvalidTransition};
use crate::extractor::ParameterExtractor;
use crate::generation::TextGenerator;
use crate::meta::MetaCommand;
use crate::responder::{CompletedCommand, PassthroughResponder, ResponseGenerator};
use crate::response;
use crate::state_machine::validate_transition;

// =============================================================================
// Settings and results
// =============================================================================

/// Engine tuning derived from `ParleyConfig`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub match_params: MatchParams,
    pub extraction_timeout: Duration,
    pub max_history_turns: usize,
    /// Zero disables the background sweep.
    pub sweep_interval: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &ParleyConfig) -> Self {
        Self {
            match_params: MatchParams::from_config(&config.matching),
            extraction_timeout: Duration::from_millis(config.extraction.timeout_ms),
            max_history_turns: config.session.max_history_turns,
            sweep_interval: Duration::from_secs(config.session.sweep_interval_secs),
        }
    }
}

/// What the caller gets back for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub response_text: String,
    /// Set only when a command ran to completion on this turn.
    pub executed_command: Option<String>,
    pub error: Option<TurnError>,
}

/// Degradation flags for external monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineHealth {
    pub persistence_degraded: bool,
    pub degraded_sessions: Vec<String>,
    /// The last resolution fell back to name matching or failed to embed.
    pub matching_degraded: bool,
    pub registered_commands: usize,
}

/// Why a turn stopped before completing normally.
#[derive(Debug)]
enum TurnAbort {
    /// Extraction timed out or the generator failed; the session is rolled back.
    Extraction(ExtractionError),
    /// The state machine was asked for an illegal move; the resolution is reset.
    Transition(InvalidTransition),
}

impl From<ExtractionError> for TurnAbort {
    fn from(err: ExtractionError) -> Self {
        TurnAbort::Extraction(err)
    }
}

impl From<InvalidTransition> for TurnAbort {
    fn from(err: InvalidTransition) -> Self {
        TurnAbort::Transition(err)
    }
}

type TurnStep = Result<(), TurnAbort>;

// =============================================================================
// Per-session locking
// =============================================================================

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Exclusive hold on one session for the duration of a turn.
///
/// Released on drop; the map entry is removed once nobody else waits on it.
struct SessionLease<'a> {
    locks: &'a LockMap,
    session_id: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let idle = locks
            .get(&self.session_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) <= 2);
        if idle {
            locks.remove(&self.session_id);
        }
    }
}

// =============================================================================
// DispatchEngine
// =============================================================================

pub struct DispatchEngine {
    registry: Arc<CommandRegistry>,
    matcher: IntentMatcher,
    extractor: ParameterExtractor,
    executor: CommandExecutor,
    store: Arc<SessionStore>,
    settings: EngineSettings,
    locks: LockMap,
    matching_degraded: AtomicBool,
    responder: Arc<dyn ResponseGenerator>,
    command_responders: RwLock<HashMap<String, Arc<dyn ResponseGenerator>>>,
}

impl DispatchEngine {
    pub fn new(
        registry: Arc<CommandRegistry>,
        indexer: Arc<EmbeddingIndexer>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<SessionStore>,
        config: &ParleyConfig,
    ) -> Self {
        let matcher = IntentMatcher::new(
            Arc::clone(&registry),
            indexer,
            config.matching.name_match_fallback,
        );
        Self {
            registry,
            matcher,
            extractor: ParameterExtractor::new(generator, config.extraction.coercion_retries),
            executor: CommandExecutor::new(Duration::from_millis(config.execution.timeout_ms)),
            store,
            settings: EngineSettings::from_config(config),
            locks: Mutex::new(HashMap::new()),
            matching_degraded: AtomicBool::new(false),
            responder: Arc::new(PassthroughResponder),
            command_responders: RwLock::new(HashMap::new()),
        }
    }

    /// Phrase every successful command's reply with `responder`.
    pub fn with_responder(mut self, responder: Arc<dyn ResponseGenerator>) -> Self {
        self.responder = responder;
        self
    }

    /// Override reply phrasing for one command, replacing any earlier override.
    pub fn set_command_responder(
        &self,
        command: impl Into<String>,
        responder: Arc<dyn ResponseGenerator>,
    ) {
        let command = command.into();
        debug!(command = %command, "Command responder set");
        self.command_responders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(command, responder);
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Register a command after startup.
    ///
    /// A rejected definition is logged and returned; it never disturbs the
    /// commands already registered. New commands are embedded eagerly when
    /// the provider is reachable.
    pub async fn register_command(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
        params: Vec<ParamSpec>,
        description: impl Into<String>,
    ) -> Result<RegisterOutcome, RegistrationError> {
        let name = name.into();
        let outcome = match self.registry.register(name.clone(), handler, params, description) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(command = %name, error = %e, "Command registration rejected");
                return Err(e);
            }
        };

        if outcome == RegisterOutcome::Registered {
            if let Ok(spec) = self.registry.lookup(&name) {
                if let Err(e) = self.matcher.indexer().ensure_embedding(&spec).await {
                    warn!(command = %name, error = %e, "Deferred embedding for new command");
                }
            }
        }
        Ok(outcome)
    }

    /// Embed every registered command ahead of the first utterance.
    pub async fn warm_index(&self) -> Result<usize, IndexError> {
        self.matcher.indexer().warm(&self.registry.list()).await
    }

    /// Periodically remove idle sessions. `None` when the interval is zero.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let period = self.settings.sweep_interval;
        if period.is_zero() {
            return None;
        }
        let store = Arc::clone(&self.store);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let swept = store.sweep_expired().await;
                debug!(swept, "Session sweep finished");
            }
        }))
    }

    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            persistence_degraded: self.store.is_degraded(),
            degraded_sessions: self.store.degraded_sessions(),
            matching_degraded: self.matching_degraded.load(Ordering::Relaxed),
            registered_commands: self.registry.len(),
        }
    }

    /// Handle one utterance for `session_id`.
    ///
    /// Never fails: every problem is reported in the returned `TurnResult`
    /// and recorded on the session's turn history.
    pub async fn handle_utterance(&self, session_id: &str, utterance: &str) -> TurnResult {
        let _lease = self.lease(session_id).await;

        let mut session = self.store.get(session_id).await;
        if session.state.is_terminal() {
            if let Err(e) = self.advance(&mut session, ResolutionState::AwaitingIntent) {
                error!(session_id, error = %e, "Could not leave terminal state");
            }
            session.clear_resolution();
        }

        let sequence = session.allocate_sequence();
        let mut turn = Turn::new(sequence, utterance);
        let before = session.clone();

        match self.route(&mut session, &mut turn, utterance.trim()).await {
            Ok(()) => {}
            Err(TurnAbort::Extraction(err)) => {
                warn!(session_id, sequence, error = %err, "Extraction abandoned; session rolled back");
                session = before;
                turn.parameters.clear();
                turn.response = match err {
                    ExtractionError::Timeout { .. } => response::extraction_timeout(),
                    _ => response::generation_failed(),
                };
                turn.error = Some(err.to_turn_error());
            }
            Err(TurnAbort::Transition(err)) => {
                error!(session_id, sequence, error = %err, "Resolution reset after invalid transition");
                session.clear_resolution();
                turn.response = response::internal();
                turn.error = Some(TurnError::new(TurnErrorKind::Internal, err.to_string()));
            }
        }

        let result = TurnResult {
            response_text: turn.response.clone(),
            executed_command: turn.result.as_ref().and(turn.command.clone()),
            error: turn.error.clone(),
        };

        info!(
            session_id,
            sequence,
            state = %session.state,
            command = turn.command.as_deref().unwrap_or("-"),
            error = ?turn.error.as_ref().map(|e| e.kind),
            "Turn handled"
        );

        session.push_turn(turn, self.settings.max_history_turns);
        session.touch();
        if self.store.put(session_id, &session).await == Durability::Degraded {
            debug!(session_id, "Turn persisted in memory only");
        }
        result
    }

    // -------------------------------------------------------------------------
    // Routing
    // -------------------------------------------------------------------------

    async fn route(
        &self,
        session: &mut ConversationSession,
        turn: &mut Turn,
        utterance: &str,
    ) -> TurnStep {
        if utterance.is_empty() {
            turn.response = response::empty_utterance();
            return Ok(());
        }
        if let Some(meta) = MetaCommand::detect(utterance) {
            return self.handle_meta(meta, session, turn);
        }

        match session.state {
            ResolutionState::AwaitingIntent if !session.candidates.is_empty() => {
                self.handle_selection(session, turn, utterance).await
            }
            ResolutionState::AwaitingIntent => self.resolve_intent(session, turn, utterance).await,
            ResolutionState::AwaitingParameters => {
                self.continue_filling(session, turn, utterance).await
            }
            other => {
                warn!(session_id = %session.session_id, state = %other, "Stale resolution discarded");
                session.clear_resolution();
                self.resolve_intent(session, turn, utterance).await
            }
        }
    }

    fn handle_meta(
        &self,
        meta: MetaCommand,
        session: &mut ConversationSession,
        turn: &mut Turn,
    ) -> TurnStep {
        match meta {
            MetaCommand::Cancel => {
                let pending = session.pending_command.clone();
                if pending.is_none() && session.candidates.is_empty() {
                    turn.response = response::nothing_to_cancel();
                    return Ok(());
                }
                if session.state == ResolutionState::AwaitingParameters {
                    self.advance(session, ResolutionState::AwaitingIntent)?;
                }
                session.clear_resolution();
                turn.response = response::cancelled(pending.as_deref().unwrap_or("that"));
            }
            MetaCommand::Reset => {
                session.clear_resolution();
                session.turns.clear();
                turn.response = response::reset();
            }
            MetaCommand::Help => {
                turn.response = response::help(&self.registry.list());
            }
        }
        Ok(())
    }

    /// Interpret the utterance as a choice among the offered candidates.
    async fn handle_selection(
        &self,
        session: &mut ConversationSession,
        turn: &mut Turn,
        utterance: &str,
    ) -> TurnStep {
        let candidates = session.candidates.clone();

        let choice = if let Ok(number) = utterance.parse::<usize>() {
            if number == 0 || number > candidates.len() {
                turn.response = response::selection_out_of_range(candidates.len());
                turn.error = Some(TurnError::new(
                    TurnErrorKind::AmbiguousMatch,
                    ResolutionError::AmbiguousMatch { candidates }.to_string(),
                ));
                return Ok(());
            }
            // A bare number carries no parameters; reuse the ambiguous request.
            let original = session
                .ambiguous_utterance
                .clone()
                .unwrap_or_else(|| utterance.to_string());
            Some((candidates[number - 1].clone(), original))
        } else {
            named_candidate(utterance, &candidates).map(|name| (name, utterance.to_string()))
        };

        session.candidates.clear();
        session.ambiguous_utterance = None;
        if let Some((name, request)) = choice {
            match self.registry.lookup(&name) {
                Ok(spec) => {
                    debug!(command = %name, "Disambiguation resolved");
                    return self.begin_resolution(spec, session, turn, &request).await;
                }
                Err(e) => warn!(error = %e, "Selected command is no longer registered"),
            }
        }
        self.resolve_intent(session, turn, utterance).await
    }

    async fn resolve_intent(
        &self,
        session: &mut ConversationSession,
        turn: &mut Turn,
        utterance: &str,
    ) -> TurnStep {
        let outcome = match self
            .matcher
            .resolve(utterance, &self.settings.match_params)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Intent resolution unavailable");
                self.matching_degraded.store(true, Ordering::Relaxed);
                turn.response = response::embedding_unavailable();
                turn.error = Some(TurnError::new(TurnErrorKind::EmbeddingUnavailable, e.to_string()));
                return Ok(());
            }
        };
        self.matching_degraded
            .store(outcome.degraded, Ordering::Relaxed);

        match outcome.resolution {
            Resolution::Resolved(matched) => {
                info!(
                    command = %matched.name(),
                    score = matched.score,
                    degraded = outcome.degraded,
                    "Intent resolved"
                );
                self.begin_resolution(Arc::clone(&matched.command), session, turn, utterance)
                    .await
            }
            Resolution::Ambiguous(candidates) => {
                let names: Vec<String> = candidates.iter().map(|c| c.name().to_string()).collect();
                debug!(candidates = ?names, "Intent ambiguous");
                self.advance(session, ResolutionState::Ambiguous)?;
                session.candidates = names.clone();
                session.ambiguous_utterance = Some(utterance.to_string());
                self.advance(session, ResolutionState::AwaitingIntent)?;
                turn.response = response::clarify(&candidates);
                turn.error = Some(TurnError::new(
                    TurnErrorKind::AmbiguousMatch,
                    ResolutionError::AmbiguousMatch { candidates: names }.to_string(),
                ));
                Ok(())
            }
            Resolution::NoMatch { best } => {
                let best_score = best.as_ref().map(|b| b.score);
                debug!(best_score = ?best_score, "No intent matched");
                turn.response = response::no_match();
                turn.error = Some(TurnError::new(
                    TurnErrorKind::NoMatch,
                    ResolutionError::NoMatch { best_score }.to_string(),
                ));
                Ok(())
            }
        }
    }

    /// Start filling the slots of a freshly resolved command.
    async fn begin_resolution(
        &self,
        spec: Arc<CommandSpec>,
        session: &mut ConversationSession,
        turn: &mut Turn,
        utterance: &str,
    ) -> TurnStep {
        self.advance(session, ResolutionState::AwaitingParameters)?;
        session.candidates.clear();
        session.ambiguous_utterance = None;
        session.prompted_slot = None;
        session.pending_command = Some(spec.name.clone());
        session.pending_slots = spec
            .required_params()
            .map(|p| (p.name.clone(), None))
            .collect();
        turn.command = Some(spec.name.clone());
        self.fill_slots(spec, session, turn, utterance, true).await
    }

    async fn continue_filling(
        &self,
        session: &mut ConversationSession,
        turn: &mut Turn,
        utterance: &str,
    ) -> TurnStep {
        let pending = session.pending_command.clone();
        let spec = match pending.map(|name| self.registry.lookup(&name)) {
            Some(Ok(spec)) => spec,
            other => {
                if let Some(Err(e)) = other {
                    warn!(error = %e, "Pending command disappeared; resolving afresh");
                }
                session.clear_resolution();
                return self.resolve_intent(session, turn, utterance).await;
            }
        };
        self.advance(session, ResolutionState::AwaitingParameters)?;
        turn.command = Some(spec.name.clone());
        self.fill_slots(spec, session, turn, utterance, false).await
    }

    // -------------------------------------------------------------------------
    // Slot filling and execution
    // -------------------------------------------------------------------------

    async fn fill_slots(
        &self,
        spec: Arc<CommandSpec>,
        session: &mut ConversationSession,
        turn: &mut Turn,
        utterance: &str,
        include_optional: bool,
    ) -> TurnStep {
        let timeout = self.settings.extraction_timeout;
        let extraction = self
            .extractor
            .extract(utterance, &spec, session, include_optional);
        let report = match tokio::time::timeout(timeout, extraction).await {
            Ok(report) => report?,
            Err(_) => {
                return Err(ExtractionError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                }
                .into())
            }
        };
        turn.parameters = session.filled_slots();

        if let Some(problem) = report.first_problem() {
            session.prompted_slot = problem.param().map(str::to_string);
            turn.response = response::coercion_failed(&spec, &problem);
            turn.error = Some(problem.to_turn_error());
            return Ok(());
        }

        self.advance(session, ResolutionState::ReadyToExecute)?;
        session.prompted_slot = None;
        self.execute(&spec, session, turn).await
    }

    async fn execute(
        &self,
        spec: &Arc<CommandSpec>,
        session: &mut ConversationSession,
        turn: &mut Turn,
    ) -> TurnStep {
        let arguments = session.filled_slots();
        let args = CommandArgs::from(arguments.clone());
        match self.executor.invoke(spec, args).await {
            Ok(output) => {
                self.advance(session, ResolutionState::Executed)?;
                let completed = CompletedCommand {
                    spec,
                    utterance: &turn.utterance,
                    arguments: &arguments,
                    output: &output,
                };
                let reply = self.phrase_reply(&completed).await;
                turn.result = Some(output.text);
                turn.response = reply;
            }
            Err(err) => {
                self.advance(session, ResolutionState::Failed)?;
                let kind = match err {
                    ExecutionError::CommandRaised { .. } => TurnErrorKind::CommandRaised,
                    ExecutionError::Timeout { .. } => TurnErrorKind::Timeout,
                };
                turn.response = response::execution_failed(&err);
                turn.error = Some(TurnError::new(kind, err.to_string()));
            }
        }
        Ok(())
    }

    /// The user-facing reply for a successful command; the raw output text
    /// whenever phrasing fails, times out, or comes back empty.
    async fn phrase_reply(&self, completed: &CompletedCommand<'_>) -> String {
        let responder = self
            .command_responders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&completed.spec.name)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.responder));

        let timeout = self.settings.extraction_timeout;
        match tokio::time::timeout(timeout, responder.respond(completed)).await {
            Ok(Ok(reply)) if !reply.trim().is_empty() => reply,
            Ok(Ok(_)) => {
                warn!(command = %completed.spec.name, "Responder returned nothing; using command output");
                completed.output.text.clone()
            }
            Ok(Err(e)) => {
                warn!(command = %completed.spec.name, error = %e, "Responder failed; using command output");
                completed.output.text.clone()
            }
            Err(_) => {
                warn!(
                    command = %completed.spec.name,
                    after_ms = timeout.as_millis() as u64,
                    "Responder timed out; using command output"
                );
                completed.output.text.clone()
            }
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn advance(
        &self,
        session: &mut ConversationSession,
        to: ResolutionState,
    ) -> Result<(), InvalidTransition> {
        validate_transition(session.state, to)?;
        debug!(
            session_id = %session.session_id,
            from = %session.state,
            to = %to,
            "State transition"
        );
        session.state = to;
        Ok(())
    }

    async fn lease(&self, session_id: &str) -> SessionLease<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(session_id.to_string()).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        SessionLease {
            locks: &self.locks,
            session_id: session_id.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn active_locks(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// The single candidate named in `utterance`, raw (`get_weather`) or spaced.
fn named_candidate(utterance: &str, candidates: &[String]) -> Option<String> {
    let normalized: String = utterance
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect();
    let spaced_text = format!(" {} ", normalized.split_whitespace().collect::<Vec<_>>().join(" "));
    let words_text = spaced_text.replace('_', " ");

    let mut named = candidates.iter().filter(|name| {
        let raw = name.to_lowercase();
        spaced_text.contains(&format!(" {} ", raw))
            || words_text.contains(&format!(" {} ", raw.replace('_', " ")))
    });
    match (named.next(), named.next()) {
        (Some(name), None) => Some(name.clone()),
        _ => None,
    }
}
