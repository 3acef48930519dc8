//! Suspension and resume payload types for the human-approval gate.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::document::{FinalDocument, Review};

/// Payload captured when a suspending step halts the pipeline.
///
/// Carries enough context for an external approver to render a decision
/// without reading the checkpoint: the assembled document and the review
/// verdicts that led to it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    /// Suspension category, e.g. `"human_approval"`.
    pub kind: String,
    /// Human-readable prompt for the approver.
    pub message: String,
    /// The document awaiting approval, if one was assembled.
    pub document: Option<FinalDocument>,
    /// Review verdicts at the time of suspension.
    #[serde(default)]
    pub reviews: FxHashMap<String, Review>,
    pub requested_at: DateTime<Utc>,
}

/// External input supplied when resuming a suspended run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub approved: bool,
    /// Replacement document body supplied by the approver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_content: Option<String>,
    /// Revision guidance when the approver rejects the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl ResumePayload {
    #[must_use]
    pub fn approve() -> Self {
        Self {
            approved: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            approved: false,
            feedback: Some(feedback.into()),
            ..Self::default()
        }
    }
}

/// Durable record of the most recent human decision for a thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HumanDecision {
    pub approved: bool,
    #[serde(default)]
    pub edited_content: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl HumanDecision {
    #[must_use]
    pub fn from_payload(payload: &ResumePayload) -> Self {
        Self {
            approved: payload.approved,
            edited_content: payload.edited_content.clone(),
            feedback: payload.feedback.clone(),
            decided_at: Utc::now(),
        }
    }
}
