//! Progress messages fanned out to observers and recorded in the event log.
//!
//! Every message carries a per-run sequence number that is strictly
//! increasing in the order messages were produced. Observers can detect
//! loss or reordering by watching `seq`; the event log may legitimately
//! skip numbers taken by broadcast-only messages.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::document::{QUALITY_REVIEW, Review, SAFETY_REVIEW};
use crate::state::StateSnapshot;
use crate::suspend::Suspension;
use crate::types::{RunStatus, StepKind};

/// One progress message for one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub run_id: String,
    pub thread_id: String,
    /// Strictly increasing within the run.
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: ProgressBody,
}

impl ProgressMessage {
    /// Short label for logging and storage.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match &self.body {
            ProgressBody::RunStarted => "run_started",
            ProgressBody::NodeUpdate { .. } => "node_update",
            ProgressBody::HaltRequired { .. } => "halt_required",
            ProgressBody::StateUpdate { .. } => "state_update",
            ProgressBody::RunCompleted { .. } => "run_completed",
            ProgressBody::RunFailed { .. } => "run_failed",
            ProgressBody::ResumeStarted => "resume_started",
            ProgressBody::ResumeCompleted { .. } => "resume_completed",
            ProgressBody::ResumeFailed { .. } => "resume_failed",
        }
    }

    /// Whether this message belongs in the durable event log. State dumps
    /// are broadcast-only; they are derivable from checkpoints.
    #[must_use]
    pub fn is_logged(&self) -> bool {
        !matches!(self.body, ProgressBody::StateUpdate { .. })
    }
}

/// Message payloads, tagged by `type` on the wire. The tag vocabulary is a
/// stable contract observers depend on; do not rename variants casually.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressBody {
    RunStarted,
    NodeUpdate {
        node: String,
        summary: String,
        /// Machine-readable facts about what the node produced, keyed by
        /// signal name.
        signals: FxHashMap<String, Value>,
        /// State fields the node's update touched.
        touched: Vec<String>,
        /// Full merged state after the node's update.
        state: Value,
    },
    HaltRequired {
        suspensions: Vec<Suspension>,
    },
    StateUpdate {
        state: Value,
    },
    RunCompleted {
        status: RunStatus,
        state: Value,
    },
    RunFailed {
        error: String,
    },
    ResumeStarted,
    ResumeCompleted {
        status: RunStatus,
        state: Value,
    },
    ResumeFailed {
        error: String,
    },
}

/// One-line description of what a step accomplished, derived from the
/// merged state.
#[must_use]
pub fn summary_for(step: StepKind, snapshot: &StateSnapshot) -> String {
    match step {
        StepKind::Intake => match &snapshot.request {
            Some(request) => format!("accepted {} request", request.kind),
            None => "accepted request".to_string(),
        },
        StepKind::Generate => format!("produced draft v{}", snapshot.iteration()),
        StepKind::SafetyReview => verdict_summary("safety", snapshot.safety_pass()),
        StepKind::QualityReview => verdict_summary("quality", snapshot.quality_pass()),
        StepKind::Decide => match snapshot.decision.as_ref() {
            Some(decision) => format!("decision: {}", decision.rationale),
            None => "no decision recorded".to_string(),
        },
        StepKind::Finalize => match snapshot.document.as_ref() {
            Some(document) => format!("assembled `{}`", document.title),
            None => "no document assembled".to_string(),
        },
        StepKind::HumanReview => match snapshot.human_decision.as_ref() {
            Some(decision) if decision.approved => "approved by reviewer".to_string(),
            Some(_) => "rejected by reviewer".to_string(),
            None => "awaiting approval".to_string(),
        },
        StepKind::End => "done".to_string(),
    }
}

fn verdict_summary(name: &str, pass: Option<bool>) -> String {
    match pass {
        Some(true) => format!("{name} review passed"),
        Some(false) => format!("{name} review failed"),
        None => format!("{name} review produced no verdict"),
    }
}

/// Machine-readable signal map for a node-update message.
#[must_use]
pub fn signals_for(
    step: StepKind,
    snapshot: &StateSnapshot,
    max_iterations: u64,
) -> FxHashMap<String, Value> {
    let mut signals = FxHashMap::default();
    match step {
        StepKind::Generate => {
            signals.insert("iteration".into(), json!(snapshot.iteration()));
            if let Some(draft) = snapshot.latest_draft() {
                signals.insert("draft_version".into(), json!(draft.version));
            }
        }
        StepKind::SafetyReview => {
            review_signals(&mut signals, snapshot.reviews.get(SAFETY_REVIEW));
        }
        StepKind::QualityReview => {
            review_signals(&mut signals, snapshot.reviews.get(QUALITY_REVIEW));
        }
        StepKind::Decide => {
            if let Some(decision) = snapshot.decision.as_ref() {
                signals.insert("action".into(), json!(decision.action));
                signals.insert("rationale".into(), json!(decision.rationale));
            }
            if snapshot.iteration() >= max_iterations {
                signals.insert("max_iterations_reached".into(), json!(true));
            }
        }
        StepKind::Finalize => {
            signals.insert("final_ready".into(), json!(snapshot.document.is_some()));
        }
        StepKind::HumanReview => {
            if let Some(decision) = snapshot.human_decision.as_ref() {
                signals.insert("approved".into(), json!(decision.approved));
            }
        }
        StepKind::Intake | StepKind::End => {}
    }
    signals
}

fn review_signals(signals: &mut FxHashMap<String, Value>, review: Option<&Review>) {
    let Some(review) = review else {
        return;
    };
    signals.insert("pass".into(), json!(review.pass));
    if let Some(score) = review.score {
        signals.insert("score".into(), json!(score));
    }
    signals.insert(
        "required_changes".into(),
        json!(review.required_changes.len()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Decision, Review, SAFETY_REVIEW};
    use crate::state::{DocState, ITERATION_KEY};
    use serde_json::json;

    #[test]
    fn serialized_messages_are_type_tagged() {
        let message = ProgressMessage {
            run_id: "r1".into(),
            thread_id: "t1".into(),
            seq: 1,
            at: Utc::now(),
            body: ProgressBody::RunStarted,
        };
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["type"], json!("run_started"));
        assert_eq!(value["seq"], json!(1));
        assert!(message.is_logged());
    }

    #[test]
    fn state_updates_stay_out_of_the_log() {
        let message = ProgressMessage {
            run_id: "r1".into(),
            thread_id: "t1".into(),
            seq: 2,
            at: Utc::now(),
            body: ProgressBody::StateUpdate { state: json!({}) },
        };
        assert!(!message.is_logged());
    }

    #[test]
    fn node_updates_keep_the_wire_vocabulary() {
        let message = ProgressMessage {
            run_id: "r1".into(),
            thread_id: "t1".into(),
            seq: 3,
            at: Utc::now(),
            body: ProgressBody::NodeUpdate {
                node: "generate".into(),
                summary: "produced draft v1".into(),
                signals: FxHashMap::default(),
                touched: vec!["drafts".into()],
                state: json!({"drafts": []}),
            },
        };
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["type"], json!("node_update"));
        assert_eq!(value["node"], json!("generate"));
        assert!(value["signals"].is_object());
        assert!(value["state"].is_object());
        assert_eq!(message.kind(), "node_update");
    }

    #[test]
    fn halts_carry_the_suspension_list() {
        let message = ProgressMessage {
            run_id: "r1".into(),
            thread_id: "t1".into(),
            seq: 9,
            at: Utc::now(),
            body: ProgressBody::HaltRequired {
                suspensions: vec![crate::suspend::Suspension {
                    kind: "human_approval".into(),
                    message: "please review".into(),
                    document: None,
                    reviews: FxHashMap::default(),
                    requested_at: Utc::now(),
                }],
            },
        };
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["type"], json!("halt_required"));
        assert_eq!(value["suspensions"].as_array().map(Vec::len), Some(1));
        assert_eq!(message.kind(), "halt_required");
    }

    #[test]
    fn decide_signals_cap_and_action() {
        let mut state = DocState::new("req");
        state
            .metrics
            .get_mut()
            .insert(ITERATION_KEY.into(), json!(3));
        *state.decision.get_mut() = Some(Decision::revise("keep going"));
        let signals = signals_for(StepKind::Decide, &state.snapshot(), 3);
        assert_eq!(signals.get("action"), Some(&json!("revise")));
        assert_eq!(signals.get("rationale"), Some(&json!("keep going")));
        assert_eq!(signals.get("max_iterations_reached"), Some(&json!(true)));
    }

    #[test]
    fn failed_safety_review_is_signalled() {
        let mut state = DocState::new("req");
        state
            .reviews
            .get_mut()
            .insert(SAFETY_REVIEW.into(), Review::failing(0.1));
        let signals = signals_for(StepKind::SafetyReview, &state.snapshot(), 3);
        assert_eq!(signals.get("pass"), Some(&json!(false)));
        assert_eq!(signals.get("score"), Some(&json!(0.1)));
    }

    #[test]
    fn generate_signals_iteration_and_draft_version() {
        let mut state = DocState::new("req");
        state.drafts.get_mut().push(crate::document::Draft {
            version: 2,
            created_at: Utc::now(),
            content: "d2".into(),
            data: Value::Null,
            provenance: "revision".into(),
        });
        state
            .metrics
            .get_mut()
            .insert(ITERATION_KEY.into(), json!(2));
        let signals = signals_for(StepKind::Generate, &state.snapshot(), 3);
        assert_eq!(signals.get("iteration"), Some(&json!(2)));
        assert_eq!(signals.get("draft_version"), Some(&json!(2)));
    }
}
