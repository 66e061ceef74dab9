//! # Review Driver
//!
//! The top-level state machine. Runs one stage at a time: execute, look up
//! the next stage in the transition table, merge the patch, commit a
//! checkpoint, then move on. Execution stops at the approval gate, at a
//! terminal stage, or when the wall-clock budget runs out.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::events::{WorkflowEvent, WorkflowEventKind};
use super::interrupt::{GateState, InterruptController};
use super::stage::{next_stage, Signal, Stage};
use crate::config::ScholarConfig;
use crate::error::{ErrorCategory, PipelineError, SessionError};
use crate::stages::{
    extractor, planner, reflection, retriever, validator, writer, StageContext, ValidationReport,
};
use crate::state::{
    Blackboard, BlackboardPatch, CandidateItem, CheckpointInfo, CheckpointStore,
    ConversationMessage, Draft, Language, ScholarDb, Session, SessionStatus, SessionStore,
};

/// Options for a new session
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub language: Language,
    /// Backends to search; empty means every configured backend
    pub sources: Vec<String>,
}

/// Where a drive of the pipeline stopped
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub session_id: String,
    pub stage: Stage,
    pub status: SessionStatus,
    pub version: u64,
    pub retry_count: u32,
    pub candidates: Vec<CandidateItem>,
    /// Export form: `[N]` markers, cited ids derived from the text
    pub draft: Option<Draft>,
    pub validation: Option<ValidationReport>,
    pub error: Option<SessionError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub session_id: String,
    pub stage: Stage,
    pub status: SessionStatus,
    pub retry_count: u32,
    pub has_draft: bool,
    pub version: u64,
    pub pending_interrupt: bool,
    pub error: Option<SessionError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session: Session,
    pub version: u64,
    pub pending_interrupt: bool,
    pub blackboard: Blackboard,
    pub draft: Option<Draft>,
    pub history: Vec<CheckpointInfo>,
}

/// Removes a session from the active set when dropped
struct ActiveGuard {
    active: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.session_id);
        }
    }
}

pub struct ReviewDriver {
    ctx: StageContext,
    sessions: SessionStore,
    checkpoints: CheckpointStore,
    event_tx: Option<mpsc::Sender<WorkflowEvent>>,
    /// Sessions currently being driven
    active: Arc<Mutex<HashSet<String>>>,
}

impl ReviewDriver {
    pub fn new(ctx: StageContext, db: &ScholarDb) -> Self {
        Self {
            ctx,
            sessions: SessionStore::new(db),
            checkpoints: CheckpointStore::new(db),
            event_tx: None,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Set event channel for streaming progress
    pub fn with_event_channel(mut self, tx: mpsc::Sender<WorkflowEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Driver over the same stores, channel and active set with a new
    /// stage context. Sessions already running keep their old context.
    pub fn reconfigured(&self, ctx: StageContext) -> Self {
        Self {
            ctx,
            sessions: self.sessions.clone(),
            checkpoints: self.checkpoints.clone(),
            event_tx: self.event_tx.clone(),
            active: self.active.clone(),
        }
    }

    pub fn config(&self) -> &ScholarConfig {
        &self.ctx.config
    }

    async fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    fn claim(&self, session_id: &str) -> Result<ActiveGuard, PipelineError> {
        let mut active = self
            .active
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        if !active.insert(session_id.to_string()) {
            return Err(PipelineError::Busy(session_id.to_string()));
        }
        Ok(ActiveGuard {
            active: self.active.clone(),
            session_id: session_id.to_string(),
        })
    }

    fn require_session(&self, session_id: &str) -> Result<Session, PipelineError> {
        self.sessions
            .get(session_id)?
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))
    }

    /// Aborted sessions are terminal. A session that only ran out of
    /// retries keeps its draft and may still be continued.
    fn require_resumable(&self, session_id: &str) -> Result<Session, PipelineError> {
        let session = self.require_session(session_id)?;
        let exhausted = matches!(
            session.error.as_ref().map(|e| e.category),
            Some(ErrorCategory::RetriesExhausted)
        );
        let aborted = session.status == SessionStatus::Failed && !exhausted;
        if aborted {
            return Err(PipelineError::Failed(session.id));
        }
        Ok(session)
    }

    /// Create a session and run it to the approval gate
    #[tracing::instrument(skip(self, options), fields(language = ?options.language))]
    pub async fn start(&self, query: &str, options: StartOptions) -> Result<RunOutcome, PipelineError> {
        let session = self.sessions.create(query, options.language)?;
        let _guard = self.claim(&session.id)?;

        let mut board = Blackboard::new(query, options.language);
        board.sources = options.sources;
        board.messages.push(ConversationMessage::user(query));
        self.checkpoints
            .commit(&session.id, Stage::Planning, &board, false)?;

        self.emit(
            WorkflowEvent::new(WorkflowEventKind::SessionStarted, &session.id)
                .with_stage(Stage::Planning)
                .with_data(serde_json::json!({ "query": query })),
        )
        .await;

        self.drive(&session.id, Stage::Planning, board).await
    }

    /// Drive a session from its latest checkpoint. A session parked at the
    /// gate or in a terminal stage is returned as is; an aborted one is
    /// rejected.
    pub async fn run(&self, session_id: &str) -> Result<RunOutcome, PipelineError> {
        self.require_resumable(session_id)?;
        let _guard = self.claim(session_id)?;
        let checkpoint = self
            .checkpoints
            .latest(session_id)?
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;

        if checkpoint.pending_interrupt || checkpoint.stage.is_terminal() {
            return self.outcome(session_id, checkpoint.stage, checkpoint.version, &checkpoint.blackboard);
        }
        self.drive(session_id, checkpoint.stage, checkpoint.blackboard)
            .await
    }

    /// Approve candidates and continue past the gate.
    ///
    /// Repeating an approval that was already applied re-confirms the
    /// current state without running anything again.
    #[tracing::instrument(skip(self, approved_ids), fields(approved = approved_ids.len()))]
    pub async fn approve(
        &self,
        session_id: &str,
        approved_ids: &[String],
        expected_version: Option<u64>,
    ) -> Result<RunOutcome, PipelineError> {
        self.require_resumable(session_id)?;
        let guard = self.claim(session_id);
        let gate = InterruptController::new(&self.checkpoints);

        let checkpoint = match gate.inspect(session_id, approved_ids, expected_version)? {
            GateState::Pending(checkpoint) => checkpoint,
            GateState::AlreadyApproved(checkpoint) => {
                tracing::info!(version = checkpoint.version, "Approval already applied");
                return self.outcome(session_id, checkpoint.stage, checkpoint.version, &checkpoint.blackboard);
            }
            GateState::Elsewhere(_) => {
                return Err(PipelineError::NotAwaitingApproval(session_id.to_string()))
            }
        };
        let _guard = guard?;

        let next = next_stage(Stage::Interrupted, Signal::Approved).ok_or_else(|| {
            PipelineError::InvalidTransition {
                from: Stage::Interrupted,
                signal: Signal::Approved.to_string(),
            }
        })?;

        // merge onto the full suspended board, never replace it
        let mut board = checkpoint.blackboard;
        let patch = match InterruptController::approval_patch(&board, approved_ids) {
            Ok(patch) => patch,
            Err(e) => {
                self.abort(session_id, &e).await;
                return Err(e);
            }
        };
        board.merge(patch.handoff(Stage::Interrupted, next));

        let released = gate.release(session_id, &board)?;
        self.sessions.set_stage(session_id, next)?;
        self.emit(
            WorkflowEvent::new(WorkflowEventKind::Resumed, session_id)
                .with_stage(next)
                .with_data(serde_json::json!({
                    "version": released.version,
                    "approved": board.approved().len(),
                })),
        )
        .await;

        self.drive(session_id, next, board).await
    }

    /// Revise a finished draft with a new user instruction
    #[tracing::instrument(skip(self, instruction))]
    pub async fn continue_session(&self, session_id: &str, instruction: &str) -> Result<RunOutcome, PipelineError> {
        self.require_resumable(session_id)?;
        let _guard = self.claim(session_id)?;
        let checkpoint = self
            .checkpoints
            .latest(session_id)?
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;

        if checkpoint.blackboard.draft.is_none() {
            return Err(PipelineError::NoDraft(session_id.to_string()));
        }
        let next = next_stage(checkpoint.stage, Signal::Continue).ok_or_else(|| {
            PipelineError::InvalidTransition {
                from: checkpoint.stage,
                signal: Signal::Continue.to_string(),
            }
        })?;

        let mut board = checkpoint.blackboard;
        board.merge(
            BlackboardPatch {
                instruction: Some(Some(instruction.to_string())),
                is_continuation: Some(true),
                retry_count: Some(0),
                validation: Some(None),
                reflection: Some(None),
                ..Default::default()
            }
            .message(ConversationMessage::user(instruction))
            .log(format!("Continuation requested: {}", instruction))
            .handoff(checkpoint.stage, next),
        );

        let committed = self.checkpoints.commit(session_id, next, &board, false)?;
        self.sessions.set_stage(session_id, next)?;
        self.emit(
            WorkflowEvent::new(WorkflowEventKind::Resumed, session_id)
                .with_stage(next)
                .with_data(serde_json::json!({ "version": committed.version, "instruction": instruction })),
        )
        .await;

        self.drive(session_id, next, board).await
    }

    pub fn status(&self, session_id: &str) -> Result<StatusReport, PipelineError> {
        let session = self.require_session(session_id)?;
        let checkpoint = self
            .checkpoints
            .latest(session_id)?
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;

        Ok(StatusReport {
            session_id: session.id,
            stage: session.stage,
            status: session.status,
            retry_count: checkpoint.blackboard.retry_count,
            has_draft: checkpoint.blackboard.draft.is_some(),
            version: checkpoint.version,
            pending_interrupt: checkpoint.pending_interrupt,
            error: session.error,
        })
    }

    /// Most recently updated first
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<Session>, PipelineError> {
        Ok(self.sessions.list(limit)?)
    }

    pub fn session_detail(&self, session_id: &str) -> Result<SessionDetail, PipelineError> {
        let session = self.require_session(session_id)?;
        let checkpoint = self
            .checkpoints
            .latest(session_id)?
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;
        let approved = checkpoint.blackboard.approved_items();

        Ok(SessionDetail {
            draft: checkpoint
                .blackboard
                .draft
                .as_ref()
                .map(|d| d.normalized(&approved)),
            history: self.checkpoints.history(session_id)?,
            session,
            version: checkpoint.version,
            pending_interrupt: checkpoint.pending_interrupt,
            blackboard: checkpoint.blackboard,
        })
    }

    /// Run stages under the wall-clock budget; failures abort the session
    async fn drive(&self, session_id: &str, stage: Stage, board: Blackboard) -> Result<RunOutcome, PipelineError> {
        let budget = self.ctx.config.timeout();
        let result = match tokio::time::timeout(budget, self.step(session_id, stage, board)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout {
                secs: budget.as_secs(),
            }),
        };

        if let Err(e) = &result {
            self.abort(session_id, e).await;
        }
        result
    }

    /// Record a failure on the session if its category aborts sessions
    async fn abort(&self, session_id: &str, err: &PipelineError) {
        let category = err.category();
        if !category.aborts_session() {
            tracing::warn!(session_id, %category, "Request rejected: {}", err);
            return;
        }

        // the session row keeps the stage that failed
        let stage = match self.sessions.get(session_id) {
            Ok(Some(session)) => session.stage,
            _ => Stage::Failed,
        };
        let error = SessionError::from(err);
        if let Err(e) = self.commit_abort(session_id, stage, &error) {
            tracing::error!(session_id, "Failed to commit abort checkpoint: {}", e);
        }
        if let Err(e) = self.sessions.mark_failed(session_id, stage, &error) {
            tracing::error!(session_id, "Failed to record session failure: {}", e);
        }

        let data = serde_json::json!({ "category": error.category, "message": error.message });
        self.emit(
            WorkflowEvent::new(WorkflowEventKind::StageFailed, session_id)
                .with_stage(stage)
                .with_data(data.clone()),
        )
        .await;
        self.emit(WorkflowEvent::new(WorkflowEventKind::SessionFailed, session_id).with_data(data))
            .await;
    }

    /// Commit the latest board as a terminal `Failed` checkpoint
    fn commit_abort(&self, session_id: &str, stage: Stage, error: &SessionError) -> Result<(), PipelineError> {
        let Some(latest) = self.checkpoints.latest(session_id)? else {
            return Ok(());
        };
        if latest.stage.is_terminal() {
            return Ok(());
        }
        let failed = next_stage(stage, Signal::Abort).unwrap_or(Stage::Failed);
        let mut board = latest.blackboard;
        board.merge(
            BlackboardPatch::new()
                .log(format!("Aborted during {}: {}", stage, error.message))
                .handoff(stage, failed),
        );
        self.checkpoints.commit(session_id, failed, &board, false)?;
        Ok(())
    }

    async fn step(&self, session_id: &str, mut stage: Stage, mut board: Blackboard) -> Result<RunOutcome, PipelineError> {
        let mut version = self.checkpoints.latest_version(session_id)?;

        while stage != Stage::Interrupted && !stage.is_terminal() {
            self.emit(WorkflowEvent::new(WorkflowEventKind::StageStarted, session_id).with_stage(stage))
                .await;
            tracing::info!(session_id, %stage, "Stage started");

            let (patch, signal) = self.execute(session_id, stage, &board).await?;
            let next = next_stage(stage, signal).ok_or_else(|| PipelineError::InvalidTransition {
                from: stage,
                signal: signal.to_string(),
            })?;

            let logs = patch.logs.clone();
            board.merge(patch.handoff(stage, next));

            let checkpoint = if next == Stage::Interrupted {
                InterruptController::new(&self.checkpoints).suspend(session_id, &board)?
            } else {
                self.checkpoints.commit(session_id, next, &board, false)?
            };
            version = checkpoint.version;

            if signal == Signal::RetriesExhausted {
                let error = SessionError {
                    category: ErrorCategory::RetriesExhausted,
                    message: format!(
                        "validation still failing after {} retries",
                        board.retry_count
                    ),
                };
                self.sessions.mark_failed(session_id, next, &error)?;
            } else {
                self.sessions.set_stage(session_id, next)?;
            }

            self.emit(
                WorkflowEvent::new(WorkflowEventKind::StageCompleted, session_id)
                    .with_stage(stage)
                    .with_data(serde_json::json!({
                        "next": next,
                        "version": version,
                        "logs": logs,
                    })),
            )
            .await;

            match next {
                Stage::Interrupted => {
                    self.emit(
                        WorkflowEvent::new(WorkflowEventKind::InterruptRaised, session_id)
                            .with_stage(next)
                            .with_data(serde_json::json!({
                                "version": version,
                                "candidates": board.candidates.len(),
                            })),
                    )
                    .await
                }
                Stage::Completed => {
                    self.emit(WorkflowEvent::new(WorkflowEventKind::SessionCompleted, session_id))
                        .await
                }
                Stage::Failed => {
                    self.emit(
                        WorkflowEvent::new(WorkflowEventKind::SessionFailed, session_id).with_data(
                            serde_json::json!({ "category": ErrorCategory::RetriesExhausted }),
                        ),
                    )
                    .await
                }
                _ => {}
            }
            stage = next;
        }

        self.outcome(session_id, stage, version, &board)
    }

    /// Run one stage body and report its signal
    async fn execute(
        &self,
        session_id: &str,
        stage: Stage,
        board: &Blackboard,
    ) -> Result<(BlackboardPatch, Signal), PipelineError> {
        let ctx = &self.ctx;
        match stage {
            Stage::Planning => Ok((planner::plan(ctx, board).await?, Signal::Advance)),
            Stage::Retrieval => Ok((retriever::retrieve(ctx, board).await?, Signal::Advance)),
            Stage::Extraction => Ok((extractor::extract(ctx, board).await?, Signal::Advance)),
            Stage::Generation => Ok((writer::write(ctx, board).await?, Signal::Advance)),
            Stage::Validation => {
                let (report, mut patch) = validator::validate(ctx, board).await?;
                if !report.passed {
                    return Ok((patch, Signal::ValidationFailed));
                }
                if let Some(draft) = &board.draft {
                    patch = patch.message(ConversationMessage::assistant(draft.summary()));
                }
                Ok((patch, Signal::ValidationPassed))
            }
            Stage::Reflection => {
                let report = board.validation.clone().unwrap_or_default();
                let (decision, patch) =
                    reflection::run(&report, board.retry_count, ctx.config.max_retries);
                let signal = decision.signal();
                if let Signal::Retry(target) = signal {
                    self.emit(
                        WorkflowEvent::new(WorkflowEventKind::RetryScheduled, session_id)
                            .with_stage(stage)
                            .with_data(serde_json::json!({
                                "target": target,
                                "retry_count": board.retry_count + 1,
                                "instructions": decision.instructions(),
                            })),
                    )
                    .await;
                }
                Ok((patch, signal))
            }
            Stage::Interrupted | Stage::Completed | Stage::Failed => {
                Err(PipelineError::InvalidTransition {
                    from: stage,
                    signal: "execute".to_string(),
                })
            }
        }
    }

    fn outcome(
        &self,
        session_id: &str,
        stage: Stage,
        version: u64,
        board: &Blackboard,
    ) -> Result<RunOutcome, PipelineError> {
        let session = self.require_session(session_id)?;
        let approved = board.approved_items();
        Ok(RunOutcome {
            session_id: session_id.to_string(),
            stage,
            status: session.status,
            version,
            retry_count: board.retry_count,
            candidates: board.candidates.clone(),
            draft: board.draft.as_ref().map(|d| d.normalized(&approved)),
            validation: board.validation.clone(),
            error: session.error,
        })
    }
}
