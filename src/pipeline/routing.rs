//! Routing: which step runs after the one that just merged.
//!
//! Routing is a pure function of the merged state snapshot plus the run's
//! approval flag, so a resumed run routes identically to one that never
//! suspended. The branch points are after `decide`, after `finalize`
//! (approval gate or straight to the end), and after `human_review`;
//! everything else is a fixed chain.

use crate::document::DecisionAction;
use crate::state::StateSnapshot;
use crate::types::StepKind;
use tracing::debug;

/// Decide the successor of `current` given the freshly merged state.
#[must_use]
pub fn next_step(
    current: StepKind,
    snapshot: &StateSnapshot,
    max_iterations: u64,
    approval_required: bool,
) -> StepKind {
    let next = match current {
        StepKind::Intake => StepKind::Generate,
        StepKind::Generate => StepKind::SafetyReview,
        StepKind::SafetyReview => StepKind::QualityReview,
        StepKind::QualityReview => StepKind::Decide,
        StepKind::Decide => after_decide(snapshot, max_iterations),
        StepKind::Finalize if approval_required => StepKind::HumanReview,
        StepKind::Finalize => StepKind::End,
        StepKind::HumanReview => after_human_review(snapshot),
        StepKind::End => StepKind::End,
    };
    debug!(current = %current, next = %next, "routed");
    next
}

/// Route after the decision step.
///
/// Precedence: the iteration cap wins over everything (a run can never loop
/// forever), then an explicit review failure forces a revision regardless
/// of what the decision step said, then the decision's own action.
#[must_use]
pub fn after_decide(snapshot: &StateSnapshot, max_iterations: u64) -> StepKind {
    if snapshot.iteration() >= max_iterations {
        return StepKind::Finalize;
    }
    let review_failed =
        snapshot.safety_pass() == Some(false) || snapshot.quality_pass() == Some(false);
    if review_failed {
        return StepKind::Generate;
    }
    match snapshot.decision.as_ref().map(|d| d.action) {
        Some(DecisionAction::Revise) => StepKind::Generate,
        // A missing decision record means the step produced nothing
        // actionable; finalizing is the conservative default.
        Some(DecisionAction::Finalize) | None => StepKind::Finalize,
    }
}

/// Route after the human review step has been resumed.
#[must_use]
pub fn after_human_review(snapshot: &StateSnapshot) -> StepKind {
    match snapshot.human_decision.as_ref() {
        Some(decision) if !decision.approved => StepKind::Generate,
        _ => StepKind::End,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Decision, Review, QUALITY_REVIEW, SAFETY_REVIEW};
    use crate::state::{DocState, ITERATION_KEY};
    use crate::suspend::{HumanDecision, ResumePayload};
    use serde_json::json;

    fn snapshot_with(
        iteration: u64,
        safety: Option<bool>,
        quality: Option<bool>,
        decision: Option<Decision>,
    ) -> crate::state::StateSnapshot {
        let mut state = DocState::new("req");
        state
            .metrics
            .get_mut()
            .insert(ITERATION_KEY.into(), json!(iteration));
        if let Some(pass) = safety {
            let review = if pass {
                Review::passing(0.9)
            } else {
                Review::failing(0.2)
            };
            state.reviews.get_mut().insert(SAFETY_REVIEW.into(), review);
        }
        if let Some(pass) = quality {
            let review = if pass {
                Review::passing(0.8)
            } else {
                Review::failing(0.3)
            };
            state
                .reviews
                .get_mut()
                .insert(QUALITY_REVIEW.into(), review);
        }
        if let Some(decision) = decision {
            *state.decision.get_mut() = Some(decision);
        }
        state.snapshot()
    }

    #[test]
    fn linear_chain_is_fixed() {
        let snap = snapshot_with(0, None, None, None);
        assert_eq!(
            next_step(StepKind::Intake, &snap, 3, true),
            StepKind::Generate
        );
        assert_eq!(
            next_step(StepKind::Generate, &snap, 3, true),
            StepKind::SafetyReview
        );
        assert_eq!(
            next_step(StepKind::SafetyReview, &snap, 3, true),
            StepKind::QualityReview
        );
        assert_eq!(
            next_step(StepKind::QualityReview, &snap, 3, true),
            StepKind::Decide
        );
        assert_eq!(
            next_step(StepKind::Finalize, &snap, 3, true),
            StepKind::HumanReview
        );
    }

    #[test]
    fn finalize_skips_the_gate_when_approval_is_not_required() {
        let snap = snapshot_with(1, Some(true), Some(true), None);
        assert_eq!(next_step(StepKind::Finalize, &snap, 3, false), StepKind::End);
    }

    #[test]
    fn iteration_cap_beats_failing_reviews() {
        let snap = snapshot_with(3, Some(false), Some(false), Some(Decision::revise("weak")));
        assert_eq!(after_decide(&snap, 3), StepKind::Finalize);
    }

    #[test]
    fn failing_review_beats_finalize_decision() {
        let snap = snapshot_with(1, Some(false), Some(true), Some(Decision::finalize("ok")));
        assert_eq!(after_decide(&snap, 3), StepKind::Generate);
    }

    #[test]
    fn passing_reviews_follow_the_decision() {
        let revise = snapshot_with(1, Some(true), Some(true), Some(Decision::revise("more")));
        assert_eq!(after_decide(&revise, 3), StepKind::Generate);

        let finalize = snapshot_with(2, Some(true), Some(true), Some(Decision::finalize("good")));
        assert_eq!(after_decide(&finalize, 3), StepKind::Finalize);
    }

    #[test]
    fn missing_decision_defaults_to_finalize() {
        let snap = snapshot_with(1, Some(true), Some(true), None);
        assert_eq!(after_decide(&snap, 3), StepKind::Finalize);
    }

    #[test]
    fn human_rejection_loops_back_to_generate() {
        let mut state = DocState::new("req");
        *state.human_decision.get_mut() =
            Some(HumanDecision::from_payload(&ResumePayload::reject("tone")));
        assert_eq!(after_human_review(&state.snapshot()), StepKind::Generate);

        *state.human_decision.get_mut() =
            Some(HumanDecision::from_payload(&ResumePayload::approve()));
        assert_eq!(after_human_review(&state.snapshot()), StepKind::End);
    }
}
