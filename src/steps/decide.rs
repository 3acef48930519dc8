use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::state::StateSnapshot;
use crate::step::{Step, StepContext, StepError, StepOutcome, StepUpdate};
use crate::steps::provider::ContentProvider;
use crate::types::{FieldId, StepKind};

/// Chooses between another revision loop and finalization.
///
/// The decision is advisory: routing still enforces the iteration cap and
/// overrides a finalize decision when a review explicitly failed.
pub struct DecideStep {
    provider: Arc<dyn ContentProvider>,
}

impl DecideStep {
    pub fn new(provider: Arc<dyn ContentProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Step for DecideStep {
    fn kind(&self) -> StepKind {
        StepKind::Decide
    }

    fn writes(&self) -> &'static [FieldId] {
        &[FieldId::Decision, FieldId::Notes]
    }

    #[instrument(skip(self, snapshot, _ctx), fields(thread_id = %_ctx.thread_id))]
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: StepContext,
    ) -> Result<StepOutcome, StepError> {
        if snapshot.latest_draft().is_none() {
            return Err(StepError::MissingInput { what: "draft" });
        }
        let decision = self.provider.decide(&snapshot).await?;
        let update = StepUpdate::new()
            .with_note(
                "decide",
                format!("{:?}: {}", decision.action, decision.rationale),
            )
            .with_decision(decision);
        Ok(StepOutcome::Update(update))
    }
}
