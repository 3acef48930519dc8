//! Shared pipeline state: versioned channels plus immutable snapshots.
//!
//! [`DocState`] is the authoritative merged state for a thread. Each field
//! lives in its own versioned channel with a declared reducer kind; steps
//! never mutate state directly — they return a [`crate::step::StepUpdate`]
//! that the reducer layer merges in.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channels::Versioned;
use crate::document::{
    Decision, Draft, FinalDocument, QUALITY_REVIEW, RequestInfo, Review, SAFETY_REVIEW,
};
use crate::suspend::HumanDecision;
use crate::types::RunStatus;

/// Metrics key holding the number of drafts produced so far.
pub const ITERATION_KEY: &str = "iteration";
/// Metrics key holding the most recent safety score.
pub const SAFETY_SCORE_KEY: &str = "safety_score";
/// Metrics key holding the most recent quality score.
pub const QUALITY_SCORE_KEY: &str = "quality_score";

/// The authoritative merged state for one thread.
///
/// Written only by the workflow engine (via reducers); checkpointed after
/// every merge. Channel versions make state evolution visible without
/// diffing values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocState {
    /// Raw request text for the current run (Replace).
    pub input_text: Versioned<String>,
    /// Normalized intake record (Replace).
    pub request: Versioned<Option<RequestInfo>>,
    /// Accumulated draft versions (Append-list).
    pub drafts: Versioned<Vec<Draft>>,
    /// Review verdicts keyed by reviewer name (Merge-map, right-biased).
    pub reviews: Versioned<FxHashMap<String, Review>>,
    /// Latest routing decision (Replace).
    pub decision: Versioned<Option<Decision>>,
    /// Loosely-typed metrics such as iteration and scores (Merge-map).
    pub metrics: Versioned<FxHashMap<String, Value>>,
    /// Progress notes grouped by step name (Merge-notes).
    pub notes: Versioned<FxHashMap<String, Vec<String>>>,
    /// The assembled final document (Replace).
    pub document: Versioned<Option<FinalDocument>>,
    /// One-shot revision guidance from a rejecting approver (Replace,
    /// cleared after a single generate pass consumes it).
    pub human_feedback: Versioned<Option<String>>,
    /// Audit record of the most recent human decision (Replace).
    pub human_decision: Versioned<Option<HumanDecision>>,
    /// Pipeline-visible status flag (Replace).
    pub status: Versioned<RunStatus>,
}

impl DocState {
    /// Fresh state for a thread that has never run.
    #[must_use]
    pub fn new(input_text: impl Into<String>) -> Self {
        Self {
            input_text: Versioned::new(input_text.into(), 1),
            request: Versioned::default(),
            drafts: Versioned::default(),
            reviews: Versioned::default(),
            decision: Versioned::default(),
            metrics: Versioned::default(),
            notes: Versioned::default(),
            document: Versioned::default(),
            human_feedback: Versioned::default(),
            human_decision: Versioned::default(),
            status: Versioned::new(RunStatus::Running, 1),
        }
    }

    /// Reseed the thread state for a new run: replace the input text and
    /// reset the status flag. Accumulated drafts, reviews, and metrics are
    /// deliberately kept — state is keyed by thread, not by run.
    pub fn begin_run(&mut self, input_text: impl Into<String>) {
        *self.input_text.get_mut() = input_text.into();
        self.input_text.bump();
        *self.status.get_mut() = RunStatus::Running;
        self.status.bump();
    }

    /// Take an immutable point-in-time view for step execution.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            input_text: self.input_text.snapshot(),
            request: self.request.snapshot(),
            drafts: self.drafts.snapshot(),
            reviews: self.reviews.snapshot(),
            decision: self.decision.snapshot(),
            metrics: self.metrics.snapshot(),
            notes: self.notes.snapshot(),
            document: self.document.snapshot(),
            human_feedback: self.human_feedback.snapshot(),
            human_decision: self.human_decision.snapshot(),
            status: self.status.snapshot(),
        }
    }
}

impl Default for DocState {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// Immutable snapshot of [`DocState`] handed to steps and routing.
///
/// Snapshots are independent of the live state; mutating the state after
/// taking one does not affect it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub input_text: String,
    pub request: Option<RequestInfo>,
    pub drafts: Vec<Draft>,
    pub reviews: FxHashMap<String, Review>,
    pub decision: Option<Decision>,
    pub metrics: FxHashMap<String, Value>,
    pub notes: FxHashMap<String, Vec<String>>,
    pub document: Option<FinalDocument>,
    pub human_feedback: Option<String>,
    pub human_decision: Option<HumanDecision>,
    pub status: RunStatus,
}

impl StateSnapshot {
    /// Number of drafts produced so far, as maintained in metrics. Falls
    /// back to the draft count when the metric is absent or malformed.
    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.metrics
            .get(ITERATION_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(self.drafts.len() as u64)
    }

    /// Explicit safety verdict, if a safety review has run.
    #[must_use]
    pub fn safety_pass(&self) -> Option<bool> {
        self.reviews.get(SAFETY_REVIEW).map(|r| r.pass)
    }

    /// Explicit quality verdict, if a quality review has run.
    #[must_use]
    pub fn quality_pass(&self) -> Option<bool> {
        self.reviews.get(QUALITY_REVIEW).map(|r| r.pass)
    }

    #[must_use]
    pub fn latest_draft(&self) -> Option<&Draft> {
        self.drafts.last()
    }

    /// Numeric metric by key, if present and numeric.
    #[must_use]
    pub fn metric_f64(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).and_then(Value::as_f64)
    }

    /// Serialize the snapshot for progress messages and ledger payloads.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_is_independent_of_state() {
        let mut state = DocState::new("hello");
        let snap = state.snapshot();
        state
            .metrics
            .get_mut()
            .insert(ITERATION_KEY.into(), json!(5));
        assert!(snap.metrics.is_empty());
        assert_eq!(state.snapshot().iteration(), 5);
    }

    #[test]
    fn iteration_falls_back_to_draft_count() {
        let mut state = DocState::new("x");
        state.drafts.get_mut().push(Draft {
            version: 1,
            created_at: chrono::Utc::now(),
            content: "d1".into(),
            data: Value::Null,
            provenance: String::new(),
        });
        assert_eq!(state.snapshot().iteration(), 1);
    }

    #[test]
    fn begin_run_keeps_accumulated_state() {
        let mut state = DocState::new("first");
        state
            .reviews
            .get_mut()
            .insert(SAFETY_REVIEW.into(), Review::passing(0.9));
        state.begin_run("second");
        let snap = state.snapshot();
        assert_eq!(snap.input_text, "second");
        assert_eq!(snap.safety_pass(), Some(true));
        assert_eq!(snap.status, RunStatus::Running);
    }
}
