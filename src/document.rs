//! Domain records flowing through the pipeline: drafts, reviews, decisions,
//! and the finalized document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Review-results map key written by the safety review step.
pub const SAFETY_REVIEW: &str = "safety";
/// Review-results map key written by the quality review step.
pub const QUALITY_REVIEW: &str = "quality";

/// Normalized intake record produced from the raw request text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Request category label, e.g. `"document_request"`.
    pub kind: String,
    pub received_at: DateTime<Utc>,
    pub text: String,
}

/// One versioned candidate output. Drafts accumulate across revision loops;
/// the latest draft is always `drafts.last()`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    /// 1-based draft version within the thread.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Rendered document body.
    pub content: String,
    /// Structured payload accompanying the rendered body.
    #[serde(default)]
    pub data: Value,
    /// Short note on how this draft came to be (fresh, revision, ...).
    #[serde(default)]
    pub provenance: String,
}

/// Outcome of one reviewing step against the latest draft.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Explicit pass/fail verdict. A `false` here forces a revision loop
    /// regardless of what the decision step says.
    pub pass: bool,
    /// Numeric score in the reviewer's own scale.
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub required_changes: Vec<String>,
}

impl Review {
    /// Convenience constructor for a passing review with a score.
    #[must_use]
    pub fn passing(score: f64) -> Self {
        Self {
            pass: true,
            score: Some(score),
            issues: Vec::new(),
            suggestions: Vec::new(),
            required_changes: Vec::new(),
        }
    }

    /// Convenience constructor for a failing review with a score.
    #[must_use]
    pub fn failing(score: f64) -> Self {
        Self {
            pass: false,
            score: Some(score),
            issues: Vec::new(),
            suggestions: Vec::new(),
            required_changes: Vec::new(),
        }
    }
}

/// Action chosen by the decision step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Revise,
    Finalize,
}

/// Routing decision emitted by the decision step. Replaced wholesale on
/// every pass through `decide`, never merged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    pub rationale: String,
}

impl Decision {
    #[must_use]
    pub fn finalize(rationale: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Finalize,
            rationale: rationale.into(),
        }
    }

    #[must_use]
    pub fn revise(rationale: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Revise,
            rationale: rationale.into(),
        }
    }
}

/// Record of a human reviewer editing the final document on approval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HumanEdit {
    pub applied: bool,
    pub note: String,
}

/// The assembled final document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalDocument {
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub content: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub human_edit: Option<HumanEdit>,
}
