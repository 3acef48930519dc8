//! The engine: stepwise run execution with durable progress.
//!
//! Execution discipline, in order, for every step:
//!
//! 1. run the step against an immutable snapshot
//! 2. validate the update against the step's declared writes
//! 3. merge through the reducer registry
//! 4. persist a checkpoint (state + what ran + what comes next)
//! 5. update the ledger and emit progress
//! 6. route
//!
//! Persisting before routing means a crash between steps loses at most the
//! decision of where to go next, which routing re-derives from the merged
//! state on restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{info, instrument, warn};

use crate::broadcast::Broadcaster;
use crate::engine::checkpoint::{Checkpoint, Checkpointer, InMemoryCheckpointer};
use crate::engine::config::EngineConfig;
use crate::engine::errors::EngineError;
use crate::engine::ledger::{EventLog, InMemoryLedger, RunLedger, RunRecord};
use crate::pipeline::{Pipeline, routing};
use crate::progress::{ProgressBody, ProgressMessage, signals_for, summary_for};
use crate::reducers::ReducerRegistry;
use crate::state::{DocState, StateSnapshot};
use crate::step::{StepContext, StepOutcome, StepUpdate};
use crate::suspend::{ResumePayload, Suspension};
use crate::types::{RunStatus, StepKind, new_run_id};

/// What a run (or resume) call hands back.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub state: StateSnapshot,
    /// Present when the run halted awaiting approval.
    pub suspension: Option<Suspension>,
}

/// Main orchestrator: owns the pipeline, storage, and fan-out.
///
/// All methods take `&self`; the engine is safe to share behind an `Arc`
/// and drive from multiple tasks (each thread's state is loaded, mutated,
/// and persisted within one call).
pub struct Engine {
    pipeline: Pipeline,
    reducers: ReducerRegistry,
    checkpointer: Arc<dyn Checkpointer>,
    ledger: Arc<dyn RunLedger>,
    events: Arc<dyn EventLog>,
    broadcaster: Broadcaster,
    config: EngineConfig,
    cancel_flags: Mutex<FxHashMap<String, Arc<AtomicBool>>>,
}

impl Engine {
    pub fn new(
        pipeline: Pipeline,
        checkpointer: Arc<dyn Checkpointer>,
        ledger: Arc<dyn RunLedger>,
        events: Arc<dyn EventLog>,
        config: EngineConfig,
    ) -> Self {
        let broadcaster = Broadcaster::new(config.send_timeout);
        Self {
            pipeline,
            reducers: ReducerRegistry::default(),
            checkpointer,
            ledger,
            events,
            broadcaster,
            config,
            cancel_flags: Mutex::new(FxHashMap::default()),
        }
    }

    /// Engine with volatile storage, for tests and development.
    #[must_use]
    pub fn in_memory(pipeline: Pipeline, config: EngineConfig) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        Self::new(
            pipeline,
            Arc::new(InMemoryCheckpointer::new()),
            ledger.clone(),
            ledger,
            config,
        )
    }

    pub fn ledger(&self) -> &Arc<dyn RunLedger> {
        &self.ledger
    }

    pub fn events(&self) -> &Arc<dyn EventLog> {
        &self.events
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Request cancellation of an in-flight run. Takes effect before the
    /// next step; returns `false` if the run is not currently executing.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.cancel_flags.lock().get(run_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Start a run on a thread, halting at the human-approval gate once a
    /// document is finalized.
    ///
    /// The thread's accumulated state (drafts, reviews, metrics) carries
    /// over from its latest checkpoint. A halted run on the same thread is
    /// superseded: its pending suspension is invalidated and a later resume
    /// of it reports no pending approval.
    pub async fn start_run(
        &self,
        thread_id: &str,
        input_text: &str,
    ) -> Result<RunOutcome, EngineError> {
        self.start_run_with(thread_id, input_text, true).await
    }

    /// Start a run that skips the approval gate: `finalize` routes straight
    /// to the end and the run completes without human input.
    pub async fn start_run_unattended(
        &self,
        thread_id: &str,
        input_text: &str,
    ) -> Result<RunOutcome, EngineError> {
        self.start_run_with(thread_id, input_text, false).await
    }

    #[instrument(skip(self, input_text), fields(thread_id = %thread_id))]
    async fn start_run_with(
        &self,
        thread_id: &str,
        input_text: &str,
        approval_required: bool,
    ) -> Result<RunOutcome, EngineError> {
        if let Some(halted) = self.ledger.latest_halted_run(thread_id).await?
            && halted.pending_suspension.is_some()
        {
            warn!(superseded = %halted.run_id, "invalidating pending approval");
            self.ledger
                .set_pending_suspension(&halted.run_id, None)
                .await?;
        }

        let run_id = new_run_id();
        self.ledger
            .create_run(RunRecord::new(
                run_id.clone(),
                thread_id,
                input_text,
                approval_required,
            ))
            .await?;

        let (mut state, step_no) = match self.checkpointer.latest(thread_id).await? {
            Some(checkpoint) => (checkpoint.state, checkpoint.step),
            None => (DocState::new(input_text), 0),
        };
        state.begin_run(input_text);

        let flag = self.register_cancel_flag(&run_id);
        let mut emitter = Emitter {
            engine: self,
            run_id: run_id.clone(),
            thread_id: thread_id.to_string(),
            seq: 0,
        };
        emitter.emit(ProgressBody::RunStarted).await?;
        info!(run_id = %run_id, "run started");

        self.drive(
            thread_id,
            &run_id,
            state,
            step_no,
            StepKind::ENTRY,
            approval_required,
            None,
            false,
            flag,
            emitter,
        )
        .await
    }

    /// Resume the thread's halted run with the approver's decision.
    #[instrument(skip(self, payload), fields(thread_id = %thread_id))]
    pub async fn resume_run(
        &self,
        thread_id: &str,
        payload: ResumePayload,
    ) -> Result<RunOutcome, EngineError> {
        let halted = self
            .ledger
            .latest_halted_run(thread_id)
            .await?
            .ok_or_else(|| EngineError::NoPendingApproval {
                thread_id: thread_id.to_string(),
            })?;
        // A superseded run keeps its Halted status but loses its pending
        // suspension; it can no longer be resumed.
        if halted.pending_suspension.is_none() {
            return Err(EngineError::NoPendingApproval {
                thread_id: thread_id.to_string(),
            });
        }
        let checkpoint =
            self.checkpointer
                .latest(thread_id)
                .await?
                .ok_or_else(|| EngineError::UnknownThread {
                    thread_id: thread_id.to_string(),
                })?;
        let current = checkpoint.next;
        if current.is_end() {
            return Err(EngineError::NoPendingApproval {
                thread_id: thread_id.to_string(),
            });
        }

        let run_id = halted.run_id;
        self.ledger.set_pending_suspension(&run_id, None).await?;

        let mut state = checkpoint.state;
        *state.status.get_mut() = RunStatus::Running;
        state.status.bump();

        let flag = self.register_cancel_flag(&run_id);
        let mut emitter = Emitter {
            engine: self,
            run_id: run_id.clone(),
            thread_id: thread_id.to_string(),
            seq: self.events.last_seq(&run_id).await?,
        };
        emitter.emit(ProgressBody::ResumeStarted).await?;
        info!(run_id = %run_id, "resume started");

        self.drive(
            thread_id,
            &run_id,
            state,
            checkpoint.step,
            current,
            halted.approval_required,
            Some(payload),
            true,
            flag,
            emitter,
        )
        .await
    }

    /// Drive the pipeline from `current` until it ends, suspends, or fails.
    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        thread_id: &str,
        run_id: &str,
        mut state: DocState,
        mut step_no: u64,
        mut current: StepKind,
        approval_required: bool,
        mut resume_payload: Option<ResumePayload>,
        resumed: bool,
        cancel_flag: Arc<AtomicBool>,
        mut emitter: Emitter<'_>,
    ) -> Result<RunOutcome, EngineError> {
        loop {
            if current.is_end() {
                let snapshot = state.snapshot();
                self.ledger
                    .update_run(run_id, RunStatus::Completed, &snapshot, None)
                    .await?;
                let body = if resumed {
                    ProgressBody::ResumeCompleted {
                        status: RunStatus::Completed,
                        state: snapshot.to_value(),
                    }
                } else {
                    ProgressBody::RunCompleted {
                        status: RunStatus::Completed,
                        state: snapshot.to_value(),
                    }
                };
                emitter.emit(body).await?;
                self.drop_cancel_flag(run_id);
                info!(run_id = %run_id, "run completed");
                return Ok(RunOutcome {
                    run_id: run_id.to_string(),
                    status: RunStatus::Completed,
                    state: snapshot,
                    suspension: None,
                });
            }

            if cancel_flag.load(Ordering::Relaxed) {
                let err = EngineError::Cancelled {
                    run_id: run_id.to_string(),
                };
                return Err(self
                    .fail_run(run_id, &mut state, &mut emitter, resumed, err)
                    .await?);
            }

            let step_impl = self.pipeline.step(current)?.clone();
            let snapshot = state.snapshot();
            let ctx = StepContext {
                thread_id: thread_id.to_string(),
                run_id: run_id.to_string(),
                step: step_no + 1,
            };

            let execution = match resume_payload.take() {
                Some(payload) => step_impl.resume(snapshot, ctx, payload),
                None => step_impl.run(snapshot, ctx),
            };
            let outcome = match self.config.step_timeout {
                Some(budget) => match tokio::time::timeout(budget, execution).await {
                    Ok(result) => result,
                    Err(_) => {
                        let err = EngineError::StepTimeout { step: current };
                        return Err(self
                            .fail_run(run_id, &mut state, &mut emitter, resumed, err)
                            .await?);
                    }
                },
                None => execution.await,
            };
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(source) => {
                    let err = EngineError::StepFailure {
                        step: current,
                        source,
                    };
                    return Err(self
                        .fail_run(run_id, &mut state, &mut emitter, resumed, err)
                        .await?);
                }
            };

            let (update, suspension) = match outcome {
                StepOutcome::Update(update) => (update, None),
                StepOutcome::Suspend { update, suspension } => (update, Some(suspension)),
            };

            if let Some(field) = self.undeclared_write(step_impl.writes(), &update) {
                let err = EngineError::UnauthorizedWrite {
                    step: current,
                    field,
                };
                return Err(self
                    .fail_run(run_id, &mut state, &mut emitter, resumed, err)
                    .await?);
            }

            let touched: Vec<String> = update.touched().iter().map(|f| f.to_string()).collect();
            self.reducers.apply_all(&mut state, &update)?;
            step_no += 1;

            if let Some(suspension) = suspension {
                *state.status.get_mut() = RunStatus::Halted;
                state.status.bump();
                // `next == ran` so the resume re-enters the suspended step.
                self.persist(thread_id, step_no, &state, current, current)
                    .await?;
                let snapshot = state.snapshot();
                self.ledger
                    .update_run(run_id, RunStatus::Halted, &snapshot, None)
                    .await?;
                self.ledger
                    .set_pending_suspension(run_id, Some(suspension.clone()))
                    .await?;
                // State dump first: the approval message must be the last
                // word of the segment, and its seq anchors a later resume.
                emitter
                    .emit(ProgressBody::StateUpdate {
                        state: snapshot.to_value(),
                    })
                    .await?;
                emitter
                    .emit(ProgressBody::HaltRequired {
                        suspensions: vec![suspension.clone()],
                    })
                    .await?;
                self.drop_cancel_flag(run_id);
                info!(run_id = %run_id, "run halted awaiting approval");
                return Ok(RunOutcome {
                    run_id: run_id.to_string(),
                    status: RunStatus::Halted,
                    state: snapshot,
                    suspension: Some(suspension),
                });
            }

            let merged = state.snapshot();
            let next = routing::next_step(
                current,
                &merged,
                self.config.max_iterations,
                approval_required,
            );
            if next.is_end() {
                *state.status.get_mut() = RunStatus::Completed;
                state.status.bump();
            }
            self.persist(thread_id, step_no, &state, current, next)
                .await?;
            let snapshot = state.snapshot();
            let status = if next.is_end() {
                RunStatus::Completed
            } else {
                RunStatus::Running
            };
            self.ledger
                .update_run(run_id, status, &snapshot, None)
                .await?;
            emitter
                .emit(ProgressBody::NodeUpdate {
                    node: current.encode().to_string(),
                    summary: summary_for(current, &merged),
                    signals: signals_for(current, &merged, self.config.max_iterations),
                    touched,
                    state: snapshot.to_value(),
                })
                .await?;

            current = next;
        }
    }

    async fn persist(
        &self,
        thread_id: &str,
        step: u64,
        state: &DocState,
        ran: StepKind,
        next: StepKind,
    ) -> Result<(), EngineError> {
        self.checkpointer
            .save(Checkpoint {
                thread_id: thread_id.to_string(),
                step,
                state: state.clone(),
                ran,
                next,
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    /// Mark the run failed, emit the failure, and hand back the original
    /// error for the caller to propagate.
    async fn fail_run(
        &self,
        run_id: &str,
        state: &mut DocState,
        emitter: &mut Emitter<'_>,
        resumed: bool,
        err: EngineError,
    ) -> Result<EngineError, EngineError> {
        *state.status.get_mut() = RunStatus::Failed;
        state.status.bump();
        self.ledger
            .update_run(
                run_id,
                RunStatus::Failed,
                &state.snapshot(),
                Some(&err.to_string()),
            )
            .await?;
        let body = if resumed {
            ProgressBody::ResumeFailed {
                error: err.to_string(),
            }
        } else {
            ProgressBody::RunFailed {
                error: err.to_string(),
            }
        };
        emitter.emit(body).await?;
        self.drop_cancel_flag(run_id);
        warn!(run_id = %run_id, error = %err, "run failed");
        Ok(err)
    }

    fn undeclared_write(
        &self,
        declared: &[crate::types::FieldId],
        update: &StepUpdate,
    ) -> Option<crate::types::FieldId> {
        update
            .touched()
            .into_iter()
            .find(|field| !declared.contains(field))
    }

    fn register_cancel_flag(&self, run_id: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .lock()
            .insert(run_id.to_string(), flag.clone());
        flag
    }

    fn drop_cancel_flag(&self, run_id: &str) {
        self.cancel_flags.lock().remove(run_id);
    }
}

/// Per-run progress emitter: numbers messages, logs the loggable ones, and
/// fans everything out to the thread's room.
struct Emitter<'a> {
    engine: &'a Engine,
    run_id: String,
    thread_id: String,
    seq: u64,
}

impl Emitter<'_> {
    async fn emit(&mut self, body: ProgressBody) -> Result<(), EngineError> {
        self.seq += 1;
        let message = ProgressMessage {
            run_id: self.run_id.clone(),
            thread_id: self.thread_id.clone(),
            seq: self.seq,
            at: Utc::now(),
            body,
        };
        if message.is_logged() {
            self.engine.events.append(message.clone()).await?;
        }
        self.engine.broadcaster.broadcast(&self.thread_id, message).await;
        Ok(())
    }
}
