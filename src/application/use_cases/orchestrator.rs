//! Workflow orchestration
//!
//! Drives a turn through the fixed node graph (intake → plan → retrieve →
//! generate → execute → validate) and owns every retry, escalation and
//! failure decision; the node components only classify. Each turn streams an
//! ordered sequence of events ending in exactly one terminal event: complete,
//! interrupt or error.
//!
//! Sessions are single-flight: one running or parked turn at a time. A parked
//! turn lives in the checkpoint store, holds no concurrency permit, and is
//! re-entered at the planning node on resume.

use crate::application::use_cases::intent_planner::IntentPlanner;
use crate::application::use_cases::knowledge_store::{KnowledgeStore, ScoredItem};
use crate::application::use_cases::query_executor::QueryExecutor;
use crate::application::use_cases::sql_generator::SqlGenerator;
use crate::application::use_cases::validator::{Validator, Verdict};
use crate::domain::error::{AppError, ErrorClass, Result};
use crate::domain::intent::IntentRoute;
use crate::domain::knowledge::{KnowledgeDraft, KnowledgeKind};
use crate::domain::session::{Checkpoint, PriorError, Turn, TurnOutcome, TurnRecord};
use crate::domain::workflow::{Event, WorkflowState};
use crate::infrastructure::history::{CheckpointStore, HistoryStore};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bound on generate↔validate self-correction cycles per turn.
    pub max_semantic_retries: u32,
    /// Bound on backoff retries per external call.
    pub max_transient_retries: u32,
    pub backoff_base_ms: u64,
    /// Knowledge items retrieved per turn.
    pub search_k: usize,
    /// Prior turns fed to the planner as conversation context.
    pub conversation_window: usize,
    pub max_concurrent_sessions: usize,
    pub channel_capacity: usize,
    /// Row cap when rendering results into the answer.
    pub answer_preview_rows: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_semantic_retries: 3,
            max_transient_retries: 3,
            backoff_base_ms: 200,
            search_k: 12,
            conversation_window: 5,
            max_concurrent_sessions: 8,
            channel_capacity: 32,
            answer_preview_rows: 50,
        }
    }
}

/// Per-session in-process state. Parked turns are tracked by the checkpoint
/// store instead, so a handle with `in_flight == false` and no checkpoint
/// means the session is idle.
#[derive(Default)]
struct SessionHandle {
    in_flight: AtomicBool,
    cancelled: AtomicBool,
    cancel: Notify,
}

/// Race a component call against the session's cancellation signal.
async fn guarded<T>(
    handle: &SessionHandle,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    if handle.cancelled.load(Ordering::SeqCst) {
        return Err(AppError::Cancelled);
    }
    tokio::select! {
        _ = handle.cancel.notified() => Err(AppError::Cancelled),
        res = fut => res,
    }
}

/// Retry a call while it fails transiently, with exponential backoff. Any
/// other error class (and retry exhaustion) surfaces to the caller.
macro_rules! retry_transient {
    ($self:expr, $handle:expr, $call:expr) => {{
        let mut attempt: u32 = 0;
        loop {
            match guarded($handle, $call).await {
                Ok(v) => break Ok(v),
                Err(e)
                    if e.class() == ErrorClass::Transient
                        && attempt < $self.config.max_transient_retries =>
                {
                    attempt += 1;
                    warn!("Transient failure (attempt {}): {}", attempt, e);
                    guarded($handle, $self.backoff(attempt)).await?;
                }
                Err(e) => break Err(e),
            }
        }
    }};
}

/// How a turn left the node loop without failing.
enum TurnEnd {
    Complete { answer: String, sql: Option<String> },
    Parked { prompt: String },
}

pub struct WorkflowOrchestrator {
    planner: IntentPlanner,
    knowledge: Arc<KnowledgeStore>,
    generator: SqlGenerator,
    executor: QueryExecutor,
    validator: Validator,
    history: Arc<dyn HistoryStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
    semaphore: Arc<Semaphore>,
    config: OrchestratorConfig,
}

impl WorkflowOrchestrator {
    pub fn new(
        planner: IntentPlanner,
        knowledge: Arc<KnowledgeStore>,
        generator: SqlGenerator,
        executor: QueryExecutor,
        history: Arc<dyn HistoryStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            planner,
            knowledge,
            generator,
            executor,
            validator: Validator::new(),
            history,
            checkpoints,
            sessions: Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_sessions)),
            config,
        })
    }

    /// Start a new turn. Returns the turn's event stream; the receiver sees
    /// ordered progress events and exactly one terminal event.
    pub async fn submit(
        self: &Arc<Self>,
        session_id: &str,
        question: &str,
    ) -> Result<mpsc::Receiver<Event>> {
        if question.trim().is_empty() {
            return Err(AppError::Validation("Question must not be empty".to_string()));
        }
        if self.checkpoints.pending(session_id).await? {
            return Err(AppError::SessionBusy(format!(
                "Session {} is awaiting clarification; resume or cancel it first",
                session_id
            )));
        }
        let turn = Turn::new(question.trim());
        self.spawn_turn(session_id, turn, WorkflowState::Intake)
    }

    /// Resume a parked turn with the human's clarification. The checkpoint is
    /// consumed exactly once; the turn re-enters at planning with the
    /// clarification merged in.
    pub async fn resume(
        self: &Arc<Self>,
        session_id: &str,
        clarification: &str,
    ) -> Result<mpsc::Receiver<Event>> {
        if clarification.trim().is_empty() {
            return Err(AppError::Validation("Clarification must not be empty".to_string()));
        }
        let handle = self.handle_for(session_id);
        if handle.in_flight.load(Ordering::SeqCst) {
            return Err(AppError::SessionBusy(format!(
                "Session {} already has a turn in flight",
                session_id
            )));
        }
        let checkpoint = self.checkpoints.take(session_id).await?.ok_or_else(|| {
            AppError::NoPendingInterrupt(format!(
                "Session {} has no turn awaiting clarification",
                session_id
            ))
        })?;
        let mut turn = checkpoint.restore_turn()?;
        turn.clarifications.push(clarification.trim().to_string());
        info!("Resuming session {} at {}", session_id, checkpoint.paused_node);
        self.spawn_turn(session_id, turn, WorkflowState::Plan)
    }

    /// Best-effort cancellation: signals an in-flight turn and discards a
    /// parked checkpoint. Idle sessions are a no-op.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let handle = self.sessions.lock().unwrap().get(session_id).cloned();
        if let Some(handle) = handle {
            handle.cancelled.store(true, Ordering::SeqCst);
            handle.cancel.notify_waiters();
        }
        if self.checkpoints.take(session_id).await?.is_some() {
            info!("Discarded parked turn for session {}", session_id);
        }
        Ok(())
    }

    /// Bulk-load schema fragments into the knowledge base. Idempotent.
    pub async fn ingest_schema(&self, fragments: Vec<KnowledgeDraft>) -> Result<Vec<Uuid>> {
        self.knowledge.ingest_schema(fragments).await
    }

    fn spawn_turn(
        self: &Arc<Self>,
        session_id: &str,
        turn: Turn,
        start: WorkflowState,
    ) -> Result<mpsc::Receiver<Event>> {
        let handle = self.handle_for(session_id);
        if handle.in_flight.swap(true, Ordering::SeqCst) {
            return Err(AppError::SessionBusy(format!(
                "Session {} already has a turn in flight",
                session_id
            )));
        }
        handle.cancelled.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let orchestrator = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let permit = orchestrator.semaphore.clone().acquire_owned().await;
            match permit {
                Ok(_permit) => {
                    orchestrator.run_turn(&session_id, turn, start, &tx, &handle).await;
                }
                Err(_) => {
                    let _ = tx
                        .send(Event::error(
                            ErrorClass::Fatal,
                            "Orchestrator is shutting down".to_string(),
                        ))
                        .await;
                }
            }
            handle.in_flight.store(false, Ordering::SeqCst);
        });
        Ok(rx)
    }

    async fn run_turn(
        self: &Arc<Self>,
        session_id: &str,
        mut turn: Turn,
        start: WorkflowState,
        tx: &mpsc::Sender<Event>,
        handle: &SessionHandle,
    ) {
        match self.drive(session_id, &mut turn, start, tx, handle).await {
            Ok(TurnEnd::Complete { answer, sql }) => {
                self.learn_from_success(session_id, &turn).await;
                self.knowledge.record_outcomes(&turn.retrieval, true);
                self.append_history(session_id, &turn, TurnOutcome::Success).await;
                let _ = tx.send(Event::complete(answer, sql)).await;
            }
            Ok(TurnEnd::Parked { prompt }) => {
                info!("Session {} parked awaiting clarification", session_id);
                let _ = tx.send(Event::interrupt(prompt)).await;
            }
            Err(AppError::Cancelled) => {
                self.append_history(session_id, &turn, TurnOutcome::Cancelled).await;
                let _ = tx
                    .send(Event::error(ErrorClass::Cancelled, "Turn cancelled".to_string()))
                    .await;
            }
            Err(err) => {
                warn!("Turn failed for session {}: {}", session_id, err);
                self.knowledge.record_outcomes(&turn.retrieval, false);
                self.append_history(session_id, &turn, TurnOutcome::Failed).await;
                let _ = tx.send(Event::error(err.class(), err.to_string())).await;
            }
        }
    }

    async fn drive(
        self: &Arc<Self>,
        session_id: &str,
        turn: &mut Turn,
        start: WorkflowState,
        tx: &mpsc::Sender<Event>,
        handle: &SessionHandle,
    ) -> Result<TurnEnd> {
        let mut state = start;
        let mut context: Vec<ScoredItem> = Vec::new();

        loop {
            match state {
                WorkflowState::Intake => {
                    let _ = tx.send(Event::progress(state, "Question received")).await;
                    state = WorkflowState::Plan;
                }

                WorkflowState::Plan => {
                    let _ = tx.send(Event::progress(state, "Planning query intent")).await;
                    let conversation = self
                        .history
                        .conversation(session_id, self.config.conversation_window)
                        .await?;
                    let intent = retry_transient!(
                        self,
                        handle,
                        self.planner
                            .plan(&turn.question, &turn.clarifications, &conversation)
                    )?;

                    if intent.route == IntentRoute::Other {
                        let answer = intent.direct_answer.clone().unwrap_or_default();
                        turn.intent = Some(intent);
                        turn.answer = Some(answer.clone());
                        return Ok(TurnEnd::Complete { answer, sql: None });
                    }

                    // First pass on an ambiguous question interrupts; once
                    // the user has clarified, the planner's remaining
                    // ambiguities are noted but no longer block.
                    if intent.is_ambiguous() && turn.clarifications.is_empty() {
                        let prompt = intent.clarification_prompt();
                        turn.intent = Some(intent);
                        return self.park(session_id, turn, prompt).await;
                    }
                    turn.intent = Some(intent);
                    state = WorkflowState::Retrieve;
                }

                WorkflowState::Retrieve => {
                    context = retry_transient!(
                        self,
                        handle,
                        self.knowledge.search(&turn.question, self.config.search_k)
                    )?;
                    turn.retrieval = context.iter().map(|s| s.as_ref()).collect();
                    let _ = tx
                        .send(Event::progress(
                            state,
                            format!("Retrieved {} knowledge items", context.len()),
                        ))
                        .await;
                    state = WorkflowState::Generate;
                }

                WorkflowState::Generate => {
                    let intent = turn
                        .intent
                        .clone()
                        .ok_or_else(|| AppError::Internal("Generating without an intent".to_string()))?;
                    let candidate = retry_transient!(
                        self,
                        handle,
                        self.generator
                            .generate(&turn.question, &intent, &context, &turn.prior_errors)
                    )?;

                    if turn.is_rejected_repeat(&candidate.text) {
                        return self
                            .park(
                                session_id,
                                turn,
                                "I keep arriving at a query that was already rejected. Can you rephrase the question or point me at the right tables?"
                                    .to_string(),
                            )
                            .await;
                    }

                    let _ = tx.send(Event::progress(state, "Generated SQL candidate")).await;
                    turn.candidates.push(candidate);
                    state = WorkflowState::Execute;
                }

                WorkflowState::Execute => {
                    let sql = turn
                        .latest_sql()
                        .ok_or_else(|| AppError::Internal("Executing without a candidate".to_string()))?
                        .to_string();
                    let _ = tx.send(Event::progress(state, "Executing SQL")).await;

                    // Only transient failures retry here; semantic and fatal
                    // outcomes flow to the validator for classification.
                    let outcome = retry_transient!(self, handle, self.executor.execute(&sql));
                    if matches!(outcome, Err(AppError::Cancelled)) {
                        return Err(AppError::Cancelled);
                    }

                    let _ = tx
                        .send(Event::progress(WorkflowState::Validate, "Validating result"))
                        .await;
                    let intent = turn
                        .intent
                        .clone()
                        .ok_or_else(|| AppError::Internal("Validating without an intent".to_string()))?;

                    match self.validator.assess(outcome, &intent) {
                        Verdict::Accept(rows) => {
                            let answer = match intent.route {
                                IntentRoute::Analyze => {
                                    let interpreted = retry_transient!(
                                        self,
                                        handle,
                                        self.generator.interpret(&turn.question, &sql, &rows)
                                    );
                                    match interpreted {
                                        Ok(answer) => answer,
                                        Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                                        Err(e) => {
                                            warn!("Interpretation failed, answering with raw rows: {}", e);
                                            rows.to_table_text(self.config.answer_preview_rows)
                                        }
                                    }
                                }
                                _ => {
                                    if rows.is_empty() {
                                        "The query ran successfully and returned no rows.".to_string()
                                    } else {
                                        rows.to_table_text(self.config.answer_preview_rows)
                                    }
                                }
                            };
                            turn.result = Some(rows);
                            turn.answer = Some(answer.clone());
                            return Ok(TurnEnd::Complete {
                                answer,
                                sql: Some(sql),
                            });
                        }
                        Verdict::Retry { sql_error } => {
                            turn.prior_errors.push(PriorError {
                                sql,
                                error: sql_error.clone(),
                            });
                            turn.semantic_retries += 1;
                            if turn.semantic_retries >= self.config.max_semantic_retries {
                                if intent.is_ambiguous() {
                                    return self
                                        .park(
                                            session_id,
                                            turn,
                                            format!(
                                                "I could not produce a working query. {}",
                                                intent.clarification_prompt()
                                            ),
                                        )
                                        .await;
                                }
                                return Err(AppError::Semantic(format!(
                                    "No working query after {} attempts; last error: {}",
                                    turn.semantic_retries, sql_error
                                )));
                            }
                            let _ = tx
                                .send(Event::progress(
                                    WorkflowState::Refine,
                                    format!(
                                        "Retrying with correction (attempt {})",
                                        turn.semantic_retries + 1
                                    ),
                                ))
                                .await;
                            state = WorkflowState::Generate;
                        }
                        Verdict::EscalateHuman { prompt } => {
                            return self.park(session_id, turn, prompt).await;
                        }
                        Verdict::Fail(err) => return Err(err),
                    }
                }

                other => {
                    return Err(AppError::Internal(format!(
                        "Unexpected workflow state: {}",
                        other.label()
                    )));
                }
            }
        }
    }

    /// Serialize the turn into the checkpoint store and signal the interrupt.
    async fn park(&self, session_id: &str, turn: &Turn, prompt: String) -> Result<TurnEnd> {
        let checkpoint = Checkpoint::for_turn(session_id, WorkflowState::Plan.label(), turn)?;
        self.checkpoints.put(checkpoint).await?;
        Ok(TurnEnd::Parked { prompt })
    }

    /// Store the successful question→SQL pair as a reusable pattern. Failures
    /// here are logged and dropped; learning never blocks the answer.
    async fn learn_from_success(&self, session_id: &str, turn: &Turn) {
        let Some(sql) = turn.latest_sql() else {
            return;
        };
        let draft = KnowledgeDraft {
            kind: KnowledgeKind::QueryPattern,
            text: format!("Question: {}\nSQL: {}", turn.question, sql),
            tables: Vec::new(),
            session_id: Some(session_id.to_string()),
            turn_id: Some(turn.id),
        };
        if let Err(e) = self.knowledge.ingest(draft).await {
            warn!("Failed to store query pattern: {}", e);
        }
    }

    async fn append_history(&self, session_id: &str, turn: &Turn, outcome: TurnOutcome) {
        let record = TurnRecord {
            turn_id: turn.id,
            question: turn.question.clone(),
            sql: turn.latest_sql().map(String::from),
            answer: turn.answer.clone(),
            outcome,
            retrieval: turn.retrieval.clone(),
            finished_at: Utc::now(),
        };
        if let Err(e) = self.history.append_turn(session_id, record).await {
            warn!("Failed to append turn history: {}", e);
        }
    }

    async fn backoff(&self, attempt: u32) -> Result<()> {
        let delay_ms = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(6));
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(())
    }

    fn handle_for(&self, session_id: &str) -> Arc<SessionHandle> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::knowledge_store::KnowledgeStoreConfig;
    use crate::application::use_cases::query_executor::QueryExecutorConfig;
    use crate::domain::error::ExecutionErrorKind;
    use crate::domain::llm_config::LLMConfig;
    use crate::domain::session::RowSet;
    use crate::domain::workflow::EventKind;
    use crate::infrastructure::db::DatabaseClient;
    use crate::infrastructure::history::{InMemoryCheckpoints, InMemoryHistory};
    use crate::infrastructure::llm_clients::{EmbeddingClient, LLMClient};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct ScriptedLLM {
        responses: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLLM {
        fn new(responses: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedLLM {
        async fn generate(&self, _config: &LLMConfig, _system: &str, user: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Model("script exhausted".to_string())))
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingClient for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut vec = vec![0.0f32; 8];
            for token in text.to_lowercase().split_whitespace() {
                let mut h: u32 = 2166136261;
                for b in token.bytes() {
                    h = (h ^ b as u32).wrapping_mul(16777619);
                }
                vec[(h % 8) as usize] += 1.0;
            }
            Ok(vec)
        }
    }

    struct ScriptedDb {
        outcomes: Mutex<VecDeque<Result<RowSet>>>,
    }

    #[async_trait]
    impl DatabaseClient for ScriptedDb {
        async fn run(&self, _sql: &str, _limit: usize) -> Result<RowSet> {
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Execution(
                    ExecutionErrorKind::Connection,
                    "script exhausted".to_string(),
                )))
        }
    }

    struct Harness {
        orchestrator: Arc<WorkflowOrchestrator>,
        knowledge: Arc<KnowledgeStore>,
        planner_llm: Arc<ScriptedLLM>,
        generator_llm: Arc<ScriptedLLM>,
        checkpoints: Arc<InMemoryCheckpoints>,
    }

    fn harness(
        plans: Vec<Result<String>>,
        generations: Vec<Result<String>>,
        executions: Vec<Result<RowSet>>,
    ) -> Harness {
        let planner_llm = ScriptedLLM::new(plans);
        let generator_llm = ScriptedLLM::new(generations);
        let knowledge = Arc::new(KnowledgeStore::new(
            Arc::new(StubEmbedder),
            KnowledgeStoreConfig::default(),
        ));
        let checkpoints = Arc::new(InMemoryCheckpoints::new());
        let db = Arc::new(ScriptedDb {
            outcomes: Mutex::new(executions.into()),
        });
        let config = OrchestratorConfig {
            backoff_base_ms: 1,
            ..OrchestratorConfig::default()
        };
        let orchestrator = WorkflowOrchestrator::new(
            IntentPlanner::new(planner_llm.clone(), LLMConfig::default()),
            knowledge.clone(),
            SqlGenerator::new(generator_llm.clone(), LLMConfig::default()),
            QueryExecutor::new(db, QueryExecutorConfig::default()),
            Arc::new(InMemoryHistory::new()),
            checkpoints.clone(),
            config,
        );
        Harness {
            orchestrator,
            knowledge,
            planner_llm,
            generator_llm,
            checkpoints,
        }
    }

    fn plan_query() -> Result<String> {
        Ok(r#"{"route":"query","entities":["orders"],"constraints":[],"ambiguities":[],"expects_rows":true}"#.to_string())
    }

    fn plan_ambiguous() -> Result<String> {
        Ok(r#"{"route":"query","entities":["orders"],"constraints":[],"ambiguities":["what does recent mean"],"expects_rows":true}"#.to_string())
    }

    fn gen_sql(sql: &str) -> Result<String> {
        Ok(format!(r#"{{"sql": "{}", "rationale": "r"}}"#, sql))
    }

    fn one_row() -> RowSet {
        let mut row = HashMap::new();
        row.insert("n".to_string(), serde_json::json!(42));
        RowSet {
            columns: vec!["n".to_string()],
            rows: vec![row],
            truncated: false,
        }
    }

    fn syntax_err() -> Result<RowSet> {
        Err(AppError::Execution(
            ExecutionErrorKind::Syntax,
            "column does not exist".to_string(),
        ))
    }

    async fn collect(mut rx: mpsc::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn assert_single_terminal(events: &[Event]) -> &Event {
        let finals: Vec<&Event> = events.iter().filter(|e| e.is_final).collect();
        assert_eq!(finals.len(), 1, "expected exactly one terminal event");
        assert!(events.last().unwrap().is_final);
        finals[0]
    }

    async fn seed_schema(h: &Harness) -> Uuid {
        h.orchestrator
            .ingest_schema(vec![KnowledgeDraft {
                kind: KnowledgeKind::SchemaFragment,
                text: "orders table with id, total_amount, created_at".to_string(),
                tables: vec!["orders".to_string()],
                session_id: None,
                turn_id: None,
            }])
            .await
            .unwrap()[0]
    }

    #[tokio::test]
    async fn test_happy_path_completes_and_learns() {
        let h = harness(
            vec![plan_query()],
            vec![gen_sql("SELECT count(*) FROM orders")],
            vec![Ok(one_row())],
        );
        let seeded = seed_schema(&h).await;

        let rx = h.orchestrator.submit("s1", "how many orders").await.unwrap();
        let events = collect(rx).await;

        let terminal = assert_single_terminal(&events);
        match &terminal.kind {
            EventKind::Complete { answer, sql } => {
                assert!(answer.contains("42"));
                assert_eq!(sql.as_deref(), Some("SELECT count(*) FROM orders"));
            }
            other => panic!("expected complete, got {:?}", other),
        }

        // Retrieved schema fragment credited, pattern learned.
        let item = h.knowledge.get(seeded).unwrap();
        assert_eq!(item.usage_count, 2);
        assert_eq!(item.success_count, 2);
        assert_eq!(h.knowledge.len(), 2);
    }

    #[tokio::test]
    async fn test_semantic_error_triggers_refinement() {
        let h = harness(
            vec![plan_query()],
            vec![gen_sql("SELECT bogus FROM orders"), gen_sql("SELECT n FROM orders")],
            vec![syntax_err(), Ok(one_row())],
        );

        let rx = h.orchestrator.submit("s1", "how many orders").await.unwrap();
        let events = collect(rx).await;

        let terminal = assert_single_terminal(&events);
        match &terminal.kind {
            EventKind::Complete { sql, .. } => {
                assert_eq!(sql.as_deref(), Some("SELECT n FROM orders"));
            }
            other => panic!("expected complete, got {:?}", other),
        }
        assert!(events.iter().any(|e| e.node == "refine"));

        // The second generation saw the first attempt's failure.
        let prompts = h.generator_llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("column does not exist"));
        assert!(prompts[1].contains("SELECT bogus FROM orders"));
        drop(prompts);

        // Exactly one new pattern learned, seeded with full weight.
        assert_eq!(h.knowledge.len(), 1);
        let events = h.knowledge.weight_events();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_recovers_on_final_allowed_attempt() {
        let h = harness(
            vec![plan_query()],
            vec![
                gen_sql("SELECT a FROM orders"),
                gen_sql("SELECT b FROM orders"),
                gen_sql("SELECT n FROM orders"),
            ],
            vec![syntax_err(), syntax_err(), Ok(one_row())],
        );

        let rx = h.orchestrator.submit("s1", "how many orders").await.unwrap();
        let events = collect(rx).await;

        let terminal = assert_single_terminal(&events);
        match &terminal.kind {
            EventKind::Complete { sql, .. } => {
                assert_eq!(sql.as_deref(), Some("SELECT n FROM orders"));
            }
            other => panic!("expected complete, got {:?}", other),
        }
        assert_eq!(events.iter().filter(|e| e.node == "refine").count(), 2);

        // All three attempts generated; exactly one pattern learned.
        assert_eq!(h.generator_llm.prompts.lock().unwrap().len(), 3);
        assert_eq!(h.knowledge.len(), 1);
    }

    #[tokio::test]
    async fn test_semantic_retry_bound_fails_the_turn() {
        let h = harness(
            vec![plan_query()],
            vec![gen_sql("SELECT a"), gen_sql("SELECT b"), gen_sql("SELECT c")],
            vec![syntax_err(), syntax_err(), syntax_err()],
        );
        let seeded = seed_schema(&h).await;

        let rx = h.orchestrator.submit("s1", "how many orders").await.unwrap();
        let events = collect(rx).await;

        let terminal = assert_single_terminal(&events);
        match &terminal.kind {
            EventKind::Error { kind, .. } => assert_eq!(*kind, ErrorClass::Semantic),
            other => panic!("expected error, got {:?}", other),
        }

        // Failure debited against everything retrieved.
        let item = h.knowledge.get(seeded).unwrap();
        assert_eq!(item.usage_count, 2);
        assert_eq!(item.success_count, 1);
        assert!(item.weight < 1.0);
    }

    #[tokio::test]
    async fn test_repeated_rejected_sql_escalates() {
        let h = harness(
            vec![plan_query()],
            vec![gen_sql("SELECT bogus"), gen_sql("SELECT bogus")],
            vec![syntax_err()],
        );

        let rx = h.orchestrator.submit("s1", "how many orders").await.unwrap();
        let events = collect(rx).await;

        let terminal = assert_single_terminal(&events);
        assert!(matches!(terminal.kind, EventKind::Interrupt { .. }));
        assert!(h.checkpoints.pending("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_ambiguous_question_interrupts_then_resume_completes() {
        let h = harness(
            vec![plan_ambiguous(), plan_query()],
            vec![gen_sql("SELECT n FROM orders")],
            vec![Ok(one_row())],
        );

        let rx = h.orchestrator.submit("s1", "recent orders").await.unwrap();
        let events = collect(rx).await;
        let terminal = assert_single_terminal(&events);
        match &terminal.kind {
            EventKind::Interrupt { prompt } => assert!(prompt.contains("recent")),
            other => panic!("expected interrupt, got {:?}", other),
        }

        // Parked session rejects new questions.
        let err = h.orchestrator.submit("s1", "another question").await.unwrap_err();
        assert!(matches!(err, AppError::SessionBusy(_)));

        let rx = h
            .orchestrator
            .resume("s1", "recent means the last 30 days")
            .await
            .unwrap();
        let events = collect(rx).await;
        let terminal = assert_single_terminal(&events);
        assert!(matches!(terminal.kind, EventKind::Complete { .. }));

        // Clarification reached the replanning prompt.
        let prompts = h.planner_llm.prompts.lock().unwrap();
        assert!(prompts[1].contains("last 30 days"));
        drop(prompts);

        // Checkpoint was consumed.
        let err = h.orchestrator.resume("s1", "again").await.unwrap_err();
        assert!(matches!(err, AppError::NoPendingInterrupt(_)));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_invisibly() {
        let h = harness(
            vec![Err(AppError::RateLimited("429".to_string())), plan_query()],
            vec![gen_sql("SELECT n FROM orders")],
            vec![Ok(one_row())],
        );

        let rx = h.orchestrator.submit("s1", "how many orders").await.unwrap();
        let events = collect(rx).await;
        let terminal = assert_single_terminal(&events);
        assert!(matches!(terminal.kind, EventKind::Complete { .. }));
    }

    #[tokio::test]
    async fn test_other_route_short_circuits() {
        let h = harness(
            vec![Ok(
                r#"{"route":"other","direct_answer":"I can answer questions about your database."}"#
                    .to_string(),
            )],
            vec![],
            vec![],
        );

        let rx = h.orchestrator.submit("s1", "what can you do").await.unwrap();
        let events = collect(rx).await;
        let terminal = assert_single_terminal(&events);
        match &terminal.kind {
            EventKind::Complete { answer, sql } => {
                assert!(answer.contains("database"));
                assert!(sql.is_none());
            }
            other => panic!("expected complete, got {:?}", other),
        }
        assert!(h.generator_llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_analyze_route_interprets_result() {
        let h = harness(
            vec![Ok(
                r#"{"route":"analyze","entities":["orders"],"ambiguities":[],"expects_rows":true}"#
                    .to_string(),
            )],
            vec![
                gen_sql("SELECT n FROM orders"),
                Ok("There were 42 orders, a modest volume.".to_string()),
            ],
            vec![Ok(one_row())],
        );

        let rx = h.orchestrator.submit("s1", "analyze order volume").await.unwrap();
        let events = collect(rx).await;
        let terminal = assert_single_terminal(&events);
        match &terminal.kind {
            EventKind::Complete { answer, .. } => {
                assert_eq!(answer, "There were 42 orders, a modest volume.");
            }
            other => panic!("expected complete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_result_refines_with_feedback() {
        let h = harness(
            vec![plan_query()],
            vec![gen_sql("SELECT n FROM orders WHERE 1=0"), gen_sql("SELECT n FROM orders")],
            vec![Ok(RowSet::default()), Ok(one_row())],
        );

        let rx = h.orchestrator.submit("s1", "how many orders").await.unwrap();
        let events = collect(rx).await;
        let terminal = assert_single_terminal(&events);
        assert!(matches!(terminal.kind, EventKind::Complete { .. }));

        let prompts = h.generator_llm.prompts.lock().unwrap();
        assert!(prompts[1].contains("no rows"));
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let h = harness(vec![], vec![], vec![]);
        let err = h.orchestrator.submit("s1", "   ").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_discards_parked_turn() {
        let h = harness(vec![plan_ambiguous()], vec![], vec![]);

        let rx = h.orchestrator.submit("s1", "recent orders").await.unwrap();
        collect(rx).await;
        assert!(h.checkpoints.pending("s1").await.unwrap());

        h.orchestrator.cancel("s1").await.unwrap();
        assert!(!h.checkpoints.pending("s1").await.unwrap());
        let err = h.orchestrator.resume("s1", "clarified").await.unwrap_err();
        assert!(matches!(err, AppError::NoPendingInterrupt(_)));
    }

    #[tokio::test]
    async fn test_fatal_execution_error_fails_immediately() {
        let h = harness(
            vec![plan_query()],
            vec![gen_sql("SELECT n FROM orders")],
            vec![Err(AppError::Execution(
                ExecutionErrorKind::Permission,
                "permission denied for table orders".to_string(),
            ))],
        );

        let rx = h.orchestrator.submit("s1", "how many orders").await.unwrap();
        let events = collect(rx).await;
        let terminal = assert_single_terminal(&events);
        match &terminal.kind {
            EventKind::Error { kind, message } => {
                assert_eq!(*kind, ErrorClass::Fatal);
                assert!(message.contains("permission denied"));
            }
            other => panic!("expected error, got {:?}", other),
        }
        // One generation, no refinement loop.
        assert_eq!(h.generator_llm.prompts.lock().unwrap().len(), 1);
    }
}
