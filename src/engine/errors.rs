use miette::Diagnostic;
use thiserror::Error;

use crate::engine::checkpoint::CheckpointerError;
use crate::engine::ledger::LedgerError;
use crate::reducers::ReducerError;
use crate::step::StepError;
use crate::types::{FieldId, StepKind};

/// Errors surfaced by the engine's public API.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// No checkpoint history exists for the thread.
    #[error("unknown thread: {thread_id}")]
    #[diagnostic(
        code(draftloom::engine::unknown_thread),
        help("Start a run on the thread before querying or resuming it.")
    )]
    UnknownThread { thread_id: String },

    /// Resume was requested but nothing is waiting for approval.
    #[error("thread `{thread_id}` has no pending approval")]
    #[diagnostic(
        code(draftloom::engine::no_pending_approval),
        help(
            "The run may have completed, failed, or been superseded by a newer run on the thread."
        )
    )]
    NoPendingApproval { thread_id: String },

    /// A step returned a fatal error; the run is marked failed.
    #[error("step `{step}` failed")]
    #[diagnostic(code(draftloom::engine::step_failure))]
    StepFailure {
        step: StepKind,
        #[source]
        #[diagnostic_source]
        source: StepError,
    },

    /// A step exceeded its execution budget.
    #[error("step `{step}` timed out")]
    #[diagnostic(code(draftloom::engine::step_timeout))]
    StepTimeout { step: StepKind },

    /// A step's update touched a field it never declared.
    #[error("step `{step}` wrote undeclared field `{field}`")]
    #[diagnostic(
        code(draftloom::engine::unauthorized_write),
        help("Add the field to the step's `writes()` declaration or drop the write.")
    )]
    UnauthorizedWrite { step: StepKind, field: FieldId },

    /// The run was cancelled before it reached a terminal step.
    #[error("run `{run_id}` was cancelled")]
    #[diagnostic(code(draftloom::engine::cancelled))]
    Cancelled { run_id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Pipeline(#[from] crate::pipeline::BuildError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ledger(#[from] LedgerError),

    #[error("reducer failure: {0}")]
    #[diagnostic(code(draftloom::engine::reducer))]
    Reducer(#[from] ReducerError),
}
