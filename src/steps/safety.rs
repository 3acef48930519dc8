use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::instrument;

use crate::document::SAFETY_REVIEW;
use crate::state::{SAFETY_SCORE_KEY, StateSnapshot};
use crate::step::{Step, StepContext, StepError, StepOutcome, StepUpdate};
use crate::steps::provider::ContentProvider;
use crate::types::{FieldId, StepKind};

/// Reviews the latest draft for safety concerns. A failing verdict here
/// forces a revision loop regardless of what the decision step says.
pub struct SafetyReviewStep {
    provider: Arc<dyn ContentProvider>,
}

impl SafetyReviewStep {
    pub fn new(provider: Arc<dyn ContentProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Step for SafetyReviewStep {
    fn kind(&self) -> StepKind {
        StepKind::SafetyReview
    }

    fn writes(&self) -> &'static [FieldId] {
        &[FieldId::Reviews, FieldId::Metrics, FieldId::Notes]
    }

    #[instrument(skip(self, snapshot, _ctx), fields(thread_id = %_ctx.thread_id))]
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: StepContext,
    ) -> Result<StepOutcome, StepError> {
        let draft = snapshot
            .latest_draft()
            .ok_or(StepError::MissingInput { what: "draft" })?;
        let request = snapshot
            .request
            .as_ref()
            .ok_or(StepError::MissingInput { what: "request" })?;

        let review = self.provider.review_safety(draft, request).await?;
        let verdict = if review.pass { "pass" } else { "fail" };
        let mut update = StepUpdate::new()
            .with_note("safety_review", format!("draft v{}: {verdict}", draft.version))
            .with_review(SAFETY_REVIEW, review.clone());
        if let Some(score) = review.score {
            update = update.with_metric(SAFETY_SCORE_KEY, json!(score));
        }
        Ok(StepOutcome::Update(update))
    }
}
