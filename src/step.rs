//! Step execution framework for the draftloom pipeline.
//!
//! This module provides the core abstractions for executable pipeline steps:
//! the [`Step`] trait, the execution context handed to each step, typed
//! partial state updates, and the suspend-capable outcome type.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::document::{Decision, Draft, FinalDocument, RequestInfo, Review};
use crate::state::StateSnapshot;
use crate::suspend::{HumanDecision, ResumePayload, Suspension};
use crate::types::{FieldId, RunStatus, StepKind};

/// Core trait defining executable pipeline steps.
///
/// A step receives an immutable state snapshot and an execution context,
/// does its work, and returns a [`StepOutcome`]: either a partial update
/// for the reducer layer to merge, or a suspension that halts the run.
///
/// Steps never mutate shared state directly, and each step declares up
/// front which fields it is allowed to write via [`writes`](Self::writes).
/// The engine rejects an update touching any undeclared field.
///
/// # Error Handling
///
/// Return `Err(StepError)` for fatal conditions that should fail the run.
/// Recoverable observations belong in the update's `notes`.
#[async_trait]
pub trait Step: Send + Sync {
    /// Which step in the pipeline this is.
    fn kind(&self) -> StepKind;

    /// Fields this step is permitted to write.
    fn writes(&self) -> &'static [FieldId];

    /// Execute this step against the given snapshot.
    async fn run(&self, snapshot: StateSnapshot, ctx: StepContext)
    -> Result<StepOutcome, StepError>;

    /// Re-enter a suspended step with external input.
    ///
    /// Only suspend-capable steps override this; the default treats a
    /// resume as a protocol violation.
    async fn resume(
        &self,
        _snapshot: StateSnapshot,
        _ctx: StepContext,
        _payload: ResumePayload,
    ) -> Result<StepOutcome, StepError> {
        Err(StepError::NotResumable { step: self.kind() })
    }
}

/// Execution context passed to steps.
///
/// Identifies the run and the step number within it, so that anything a
/// step emits is traceable in the run's event log.
#[derive(Clone, Debug)]
pub struct StepContext {
    /// Thread this run belongs to.
    pub thread_id: String,
    /// Run being executed.
    pub run_id: String,
    /// Monotonic step number within the thread's checkpoint history.
    pub step: u64,
}

/// Typed partial state update returned by a step.
///
/// All fields are optional; a step fills in only what it writes. Each field
/// corresponds to one state channel and is merged by that channel's reducer.
///
/// `human_feedback` is doubly optional: `Some(Some(text))` sets the one-shot
/// feedback, `Some(None)` clears it after consumption, `None` leaves it
/// untouched.
#[derive(Clone, Debug, Default)]
pub struct StepUpdate {
    pub request: Option<RequestInfo>,
    pub drafts: Option<Vec<Draft>>,
    pub reviews: Option<FxHashMap<String, Review>>,
    pub decision: Option<Decision>,
    pub metrics: Option<FxHashMap<String, Value>>,
    pub notes: Option<FxHashMap<String, Vec<String>>>,
    pub document: Option<FinalDocument>,
    pub human_feedback: Option<Option<String>>,
    pub human_decision: Option<HumanDecision>,
    pub status: Option<RunStatus>,
}

impl StepUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields this update actually touches, for ownership validation and
    /// progress reporting.
    #[must_use]
    pub fn touched(&self) -> Vec<FieldId> {
        let mut out = Vec::new();
        if self.request.is_some() {
            out.push(FieldId::Request);
        }
        if self.drafts.is_some() {
            out.push(FieldId::Drafts);
        }
        if self.reviews.is_some() {
            out.push(FieldId::Reviews);
        }
        if self.decision.is_some() {
            out.push(FieldId::Decision);
        }
        if self.metrics.is_some() {
            out.push(FieldId::Metrics);
        }
        if self.notes.is_some() {
            out.push(FieldId::Notes);
        }
        if self.document.is_some() {
            out.push(FieldId::Document);
        }
        if self.human_feedback.is_some() {
            out.push(FieldId::HumanFeedback);
        }
        if self.human_decision.is_some() {
            out.push(FieldId::HumanDecision);
        }
        if self.status.is_some() {
            out.push(FieldId::Status);
        }
        out
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.touched().is_empty()
    }

    #[must_use]
    pub fn with_request(mut self, request: RequestInfo) -> Self {
        self.request = Some(request);
        self
    }

    #[must_use]
    pub fn with_drafts(mut self, drafts: Vec<Draft>) -> Self {
        self.drafts = Some(drafts);
        self
    }

    #[must_use]
    pub fn with_review(mut self, name: impl Into<String>, review: Review) -> Self {
        self.reviews
            .get_or_insert_with(FxHashMap::default)
            .insert(name.into(), review);
        self
    }

    #[must_use]
    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    #[must_use]
    pub fn with_metric(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metrics
            .get_or_insert_with(FxHashMap::default)
            .insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_note(mut self, step: impl Into<String>, note: impl Into<String>) -> Self {
        self.notes
            .get_or_insert_with(FxHashMap::default)
            .entry(step.into())
            .or_default()
            .push(note.into());
        self
    }

    #[must_use]
    pub fn with_document(mut self, document: FinalDocument) -> Self {
        self.document = Some(document);
        self
    }

    #[must_use]
    pub fn with_human_feedback(mut self, feedback: Option<String>) -> Self {
        self.human_feedback = Some(feedback);
        self
    }

    #[must_use]
    pub fn with_human_decision(mut self, decision: HumanDecision) -> Self {
        self.human_decision = Some(decision);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Result of one step execution.
#[derive(Clone, Debug)]
pub enum StepOutcome {
    /// Step completed; merge this update and continue routing.
    Update(StepUpdate),
    /// Step requires external input; persist both parts and halt. The
    /// update is merged before the run suspends.
    Suspend {
        update: StepUpdate,
        suspension: Suspension,
    },
}

/// Fatal errors during step execution.
#[derive(Debug, Error, Diagnostic)]
pub enum StepError {
    /// Expected input data is missing from the state snapshot.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(draftloom::step::missing_input),
        help("Check that the previous step produced the required data.")
    )]
    MissingInput { what: &'static str },

    /// External content provider failure.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(draftloom::step::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(draftloom::step::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(
        code(draftloom::step::validation),
        help("Check input data format and required fields.")
    )]
    ValidationFailed(String),

    /// A resume was delivered to a step that cannot accept one.
    #[error("step `{step}` does not accept resume input")]
    #[diagnostic(
        code(draftloom::step::not_resumable),
        help("Only the human review step suspends; resume must re-enter it.")
    )]
    NotResumable { step: StepKind },
}
