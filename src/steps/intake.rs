use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::instrument;

use crate::document::RequestInfo;
use crate::state::{ITERATION_KEY, StateSnapshot};
use crate::step::{Step, StepContext, StepError, StepOutcome, StepUpdate};
use crate::types::{FieldId, StepKind};

/// Entry step: normalizes the raw request text into a structured record
/// and seeds the iteration counter for a thread that has never drafted.
pub struct IntakeStep;

#[async_trait]
impl Step for IntakeStep {
    fn kind(&self) -> StepKind {
        StepKind::Intake
    }

    fn writes(&self) -> &'static [FieldId] {
        &[FieldId::Request, FieldId::Metrics, FieldId::Notes]
    }

    #[instrument(skip(self, snapshot, _ctx), fields(thread_id = %_ctx.thread_id))]
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: StepContext,
    ) -> Result<StepOutcome, StepError> {
        let text = snapshot.input_text.trim();
        if text.is_empty() {
            return Err(StepError::ValidationFailed(
                "request text is empty".to_string(),
            ));
        }

        let request = RequestInfo {
            kind: "document_request".to_string(),
            received_at: Utc::now(),
            text: text.to_string(),
        };

        let mut update = StepUpdate::new()
            .with_request(request)
            .with_note("intake", format!("accepted request ({} chars)", text.len()));
        // Seed the counter only once; re-runs on the same thread keep the
        // accumulated draft count.
        if !snapshot.metrics.contains_key(ITERATION_KEY) {
            update = update.with_metric(ITERATION_KEY, json!(0));
        }
        Ok(StepOutcome::Update(update))
    }
}
