//! Core identifiers for the draftloom pipeline.
//!
//! This module defines the fundamental vocabulary shared across the crate:
//! the fixed set of pipeline steps ([`StepKind`]), the lifecycle status of a
//! run ([`RunStatus`]), and the state fields a step may write ([`FieldId`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a step in the review pipeline.
///
/// The pipeline topology is fixed; steps are addressed by this enum rather
/// than free-form strings so routing stays exhaustive and typo-free. `End`
/// is a virtual terminal — it is never registered or executed.
///
/// # Persistence
///
/// `StepKind` round-trips through [`encode`](Self::encode) /
/// [`decode`](Self::decode) for checkpoint storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Normalizes the raw request into structured state.
    Intake,
    /// Produces (or revises) a draft of the document.
    Generate,
    /// Reviews the latest draft for safety concerns.
    SafetyReview,
    /// Reviews the latest draft for quality.
    QualityReview,
    /// Decides between another revision loop and finalization.
    Decide,
    /// Assembles the final document from the accepted draft.
    Finalize,
    /// Suspends for external human approval.
    HumanReview,
    /// Virtual terminal; never executed.
    End,
}

impl StepKind {
    /// The entry step of the pipeline.
    pub const ENTRY: StepKind = StepKind::Intake;

    /// All executable steps, in pipeline order.
    pub const EXECUTABLE: [StepKind; 7] = [
        StepKind::Intake,
        StepKind::Generate,
        StepKind::SafetyReview,
        StepKind::QualityReview,
        StepKind::Decide,
        StepKind::Finalize,
        StepKind::HumanReview,
    ];

    /// Encode into the persisted string form.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            StepKind::Intake => "intake",
            StepKind::Generate => "generate",
            StepKind::SafetyReview => "safety_review",
            StepKind::QualityReview => "quality_review",
            StepKind::Decide => "decide",
            StepKind::Finalize => "finalize",
            StepKind::HumanReview => "human_review",
            StepKind::End => "end",
        }
    }

    /// Decode the persisted string form; unknown strings yield `None` so a
    /// corrupted checkpoint surfaces as an explicit error upstream.
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "intake" => Some(StepKind::Intake),
            "generate" => Some(StepKind::Generate),
            "safety_review" => Some(StepKind::SafetyReview),
            "quality_review" => Some(StepKind::QualityReview),
            "decide" => Some(StepKind::Decide),
            "finalize" => Some(StepKind::Finalize),
            "human_review" => Some(StepKind::HumanReview),
            "end" => Some(StepKind::End),
            _ => None,
        }
    }

    /// Returns `true` for the virtual terminal.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, StepKind::End)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// Lifecycle status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Halted,
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Halted => "HALTED",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a state field a step may write.
///
/// Every step declares the fields it owns; the engine rejects an update that
/// touches anything else. Each field has exactly one reducer kind (see
/// [`crate::reducers`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldId {
    Request,
    Drafts,
    Reviews,
    Decision,
    Metrics,
    Notes,
    Document,
    HumanFeedback,
    HumanDecision,
    Status,
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldId::Request => "request",
            FieldId::Drafts => "drafts",
            FieldId::Reviews => "reviews",
            FieldId::Decision => "decision",
            FieldId::Metrics => "metrics",
            FieldId::Notes => "notes",
            FieldId::Document => "document",
            FieldId::HumanFeedback => "human_feedback",
            FieldId::HumanDecision => "human_decision",
            FieldId::Status => "status",
        };
        f.write_str(name)
    }
}

/// Generate a fresh run identifier.
#[must_use]
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
