use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;

use crate::document::HumanEdit;
use crate::state::StateSnapshot;
use crate::step::{Step, StepContext, StepError, StepOutcome, StepUpdate};
use crate::suspend::{HumanDecision, ResumePayload, Suspension};
use crate::types::{FieldId, StepKind};

/// Suspension kind emitted by the approval gate.
pub const HUMAN_APPROVAL: &str = "human_approval";

/// The human-approval gate.
///
/// `run` always suspends: it packages the assembled document and review
/// verdicts into a [`Suspension`] and halts the run. `resume` applies the
/// approver's decision — an approval (optionally with an edited body)
/// completes the run, a rejection stores one-shot feedback and loops the
/// pipeline back to another revision.
pub struct HumanReviewStep;

#[async_trait]
impl Step for HumanReviewStep {
    fn kind(&self) -> StepKind {
        StepKind::HumanReview
    }

    fn writes(&self) -> &'static [FieldId] {
        &[
            FieldId::Document,
            FieldId::HumanDecision,
            FieldId::HumanFeedback,
            FieldId::Notes,
        ]
    }

    #[instrument(skip(self, snapshot, _ctx), fields(thread_id = %_ctx.thread_id))]
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: StepContext,
    ) -> Result<StepOutcome, StepError> {
        if snapshot.document.is_none() {
            return Err(StepError::MissingInput { what: "document" });
        }
        let suspension = Suspension {
            kind: HUMAN_APPROVAL.to_string(),
            message: "Document is ready for review. Approve, edit, or reject with feedback."
                .to_string(),
            document: snapshot.document.clone(),
            reviews: snapshot.reviews.clone(),
            requested_at: Utc::now(),
        };
        let update = StepUpdate::new().with_note("human_review", "awaiting approval");
        Ok(StepOutcome::Suspend { update, suspension })
    }

    #[instrument(skip(self, snapshot, _ctx, payload), fields(thread_id = %_ctx.thread_id, approved = payload.approved))]
    async fn resume(
        &self,
        snapshot: StateSnapshot,
        _ctx: StepContext,
        payload: ResumePayload,
    ) -> Result<StepOutcome, StepError> {
        let decision = HumanDecision::from_payload(&payload);
        let mut update = StepUpdate::new().with_human_decision(decision);

        if payload.approved {
            update = update.with_note("human_review", "approved");
            if let Some(edited) = payload.edited_content {
                let mut document = snapshot
                    .document
                    .clone()
                    .ok_or(StepError::MissingInput { what: "document" })?;
                document.content = edited;
                document.human_edit = Some(HumanEdit {
                    applied: true,
                    note: "content replaced by approver".to_string(),
                });
                update = update.with_document(document);
            }
        } else {
            let feedback = payload
                .feedback
                .unwrap_or_else(|| "rejected without feedback".to_string());
            update = update
                .with_note("human_review", format!("rejected: {feedback}"))
                .with_human_feedback(Some(feedback));
        }
        Ok(StepOutcome::Update(update))
    }
}
