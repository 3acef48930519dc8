//! Run ledger and event log: queryable history of runs and their
//! progress messages.
//!
//! The ledger is the control-plane view of the system: which runs exist,
//! where each one stands, and which run (if any) is waiting on a human.
//! It is updated after every checkpoint so an external reader never sees
//! a run ahead of its durable state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::{DecisionAction, FinalDocument, Review};
use crate::progress::ProgressMessage;
use crate::state::{QUALITY_SCORE_KEY, SAFETY_SCORE_KEY, StateSnapshot};
use crate::suspend::{HumanDecision, Suspension};
use crate::types::RunStatus;

/// Largest page a run listing will return.
pub const MAX_RUN_LIMIT: usize = 200;
/// Largest page an event listing will return.
pub const MAX_EVENT_LIMIT: usize = 500;

/// Clamp a caller-supplied page size into a sane range.
#[must_use]
pub fn clamp_limit(requested: usize, max: usize) -> usize {
    requested.clamp(1, max)
}

/// One run's control-plane record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub thread_id: String,
    /// The raw request text the run was started with.
    pub input_text: String,
    /// Whether the pipeline halts at the human-approval gate after
    /// finalizing, or runs straight through to completion.
    pub approval_required: bool,
    pub status: RunStatus,
    /// Drafts produced so far on the run's thread.
    pub iteration: u64,
    /// Latest decision action, if the decide step has run.
    pub decision: Option<DecisionAction>,
    pub safety_score: Option<f64>,
    pub quality_score: Option<f64>,
    /// The assembled final document, once finalize has run.
    pub document: Option<FinalDocument>,
    /// Review verdicts keyed by reviewer name, as of the last update.
    pub reviews: FxHashMap<String, Review>,
    /// Audit record of the approver's decision, once a resume applied one.
    pub human_decision: Option<HumanDecision>,
    /// Set while the run is halted awaiting approval; cleared on resume
    /// or when a newer run supersedes it.
    pub pending_suspension: Option<Suspension>,
    /// The failure text, present iff the run failed.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// Fresh record for a run that is about to execute.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        thread_id: impl Into<String>,
        input_text: impl Into<String>,
        approval_required: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            thread_id: thread_id.into(),
            input_text: input_text.into(),
            approval_required,
            status: RunStatus::Running,
            iteration: 0,
            decision: None,
            safety_score: None,
            quality_score: None,
            document: None,
            reviews: FxHashMap::default(),
            human_decision: None,
            pending_suspension: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh the snapshot-derived fields from a merged state snapshot.
    pub fn absorb(&mut self, snapshot: &StateSnapshot) {
        self.iteration = snapshot.iteration();
        self.decision = snapshot.decision.as_ref().map(|d| d.action);
        self.safety_score = snapshot.metric_f64(SAFETY_SCORE_KEY);
        self.quality_score = snapshot.metric_f64(QUALITY_SCORE_KEY);
        self.document = snapshot.document.clone();
        self.reviews = snapshot.reviews.clone();
        self.human_decision = snapshot.human_decision.clone();
        self.updated_at = Utc::now();
    }
}

/// Stored progress event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: String,
    pub seq: u64,
    pub kind: String,
    pub message: ProgressMessage,
    pub recorded_at: DateTime<Utc>,
}

/// Queryable run history.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Record a new run. Fails if the run id already exists.
    async fn create_run(&self, record: RunRecord) -> Result<(), LedgerError>;

    /// Update a run's status and state-derived fields. `error` carries the
    /// failure text on a transition to [`RunStatus::Failed`].
    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        snapshot: &StateSnapshot,
        error: Option<&str>,
    ) -> Result<(), LedgerError>;

    /// Attach or clear a run's pending suspension.
    async fn set_pending_suspension(
        &self,
        run_id: &str,
        suspension: Option<Suspension>,
    ) -> Result<(), LedgerError>;

    /// Fetch one run.
    async fn run(&self, run_id: &str) -> Result<Option<RunRecord>, LedgerError>;

    /// The thread's most recently created run.
    async fn latest_run(&self, thread_id: &str) -> Result<Option<RunRecord>, LedgerError>;

    /// The thread's most recently created run that is halted.
    async fn latest_halted_run(&self, thread_id: &str) -> Result<Option<RunRecord>, LedgerError>;

    /// Runs for a thread, newest first. `limit` clamps to `1..=MAX_RUN_LIMIT`.
    async fn list_runs(&self, thread_id: &str, limit: usize)
    -> Result<Vec<RunRecord>, LedgerError>;
}

/// Append-only log of progress messages per run.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one message to its run's log.
    async fn append(&self, message: ProgressMessage) -> Result<(), LedgerError>;

    /// Events for a run in append order. `limit` clamps to
    /// `1..=MAX_EVENT_LIMIT`.
    async fn events(&self, run_id: &str, limit: usize) -> Result<Vec<RunEvent>, LedgerError>;

    /// Highest sequence number recorded for the run, or 0 if none. Resumes
    /// continue numbering from here.
    async fn last_seq(&self, run_id: &str) -> Result<u64, LedgerError>;
}

/// Errors surfaced by ledger backends.
#[derive(Debug, Error, Diagnostic)]
pub enum LedgerError {
    #[error("run `{run_id}` already exists")]
    #[diagnostic(code(draftloom::ledger::duplicate_run))]
    DuplicateRun { run_id: String },

    #[error("run `{run_id}` not found")]
    #[diagnostic(code(draftloom::ledger::unknown_run))]
    UnknownRun { run_id: String },

    /// Backend storage failure.
    #[error("ledger backend error: {message}")]
    #[diagnostic(code(draftloom::ledger::backend))]
    Backend { message: String },
}

/// Volatile ledger + event log for tests and development.
#[derive(Default)]
pub struct InMemoryLedger {
    // Runs in creation order, so "latest" is a reverse scan.
    runs: RwLock<Vec<RunRecord>>,
    events: RwLock<FxHashMap<String, Vec<RunEvent>>>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLedger for InMemoryLedger {
    async fn create_run(&self, record: RunRecord) -> Result<(), LedgerError> {
        let mut runs = self.runs.write();
        if runs.iter().any(|r| r.run_id == record.run_id) {
            return Err(LedgerError::DuplicateRun {
                run_id: record.run_id,
            });
        }
        runs.push(record);
        Ok(())
    }

    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        snapshot: &StateSnapshot,
        error: Option<&str>,
    ) -> Result<(), LedgerError> {
        let mut runs = self.runs.write();
        let record = runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| LedgerError::UnknownRun {
                run_id: run_id.to_string(),
            })?;
        record.status = status;
        record.error = error.map(str::to_string);
        record.absorb(snapshot);
        Ok(())
    }

    async fn set_pending_suspension(
        &self,
        run_id: &str,
        suspension: Option<Suspension>,
    ) -> Result<(), LedgerError> {
        let mut runs = self.runs.write();
        let record = runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| LedgerError::UnknownRun {
                run_id: run_id.to_string(),
            })?;
        record.pending_suspension = suspension;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn run(&self, run_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        Ok(self
            .runs
            .read()
            .iter()
            .find(|r| r.run_id == run_id)
            .cloned())
    }

    async fn latest_run(&self, thread_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        Ok(self
            .runs
            .read()
            .iter()
            .rev()
            .find(|r| r.thread_id == thread_id)
            .cloned())
    }

    async fn latest_halted_run(&self, thread_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        Ok(self
            .runs
            .read()
            .iter()
            .rev()
            .find(|r| r.thread_id == thread_id && r.status == RunStatus::Halted)
            .cloned())
    }

    async fn list_runs(
        &self,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<RunRecord>, LedgerError> {
        let limit = clamp_limit(limit, MAX_RUN_LIMIT);
        Ok(self
            .runs
            .read()
            .iter()
            .rev()
            .filter(|r| r.thread_id == thread_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventLog for InMemoryLedger {
    async fn append(&self, message: ProgressMessage) -> Result<(), LedgerError> {
        let event = RunEvent {
            run_id: message.run_id.clone(),
            seq: message.seq,
            kind: message.kind().to_string(),
            message,
            recorded_at: Utc::now(),
        };
        self.events
            .write()
            .entry(event.run_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn events(&self, run_id: &str, limit: usize) -> Result<Vec<RunEvent>, LedgerError> {
        let limit = clamp_limit(limit, MAX_EVENT_LIMIT);
        Ok(self
            .events
            .read()
            .get(run_id)
            .map(|events| events.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn last_seq(&self, run_id: &str) -> Result<u64, LedgerError> {
        Ok(self
            .events
            .read()
            .get(run_id)
            .and_then(|events| events.last())
            .map(|event| event.seq)
            .unwrap_or(0))
    }
}
