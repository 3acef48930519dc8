use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;

use crate::document::FinalDocument;
use crate::state::StateSnapshot;
use crate::step::{Step, StepContext, StepError, StepOutcome, StepUpdate};
use crate::types::{FieldId, StepKind};

/// Longest request prefix used as the document title.
const TITLE_MAX: usize = 80;

/// Assembles the final document from the accepted draft.
pub struct FinalizeStep;

fn title_from(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() <= TITLE_MAX {
        return first_line.to_string();
    }
    let mut title: String = first_line.chars().take(TITLE_MAX).collect();
    title.push('…');
    title
}

#[async_trait]
impl Step for FinalizeStep {
    fn kind(&self) -> StepKind {
        StepKind::Finalize
    }

    fn writes(&self) -> &'static [FieldId] {
        &[FieldId::Document, FieldId::Notes]
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
        let request_text = snapshot
            .request
            .as_ref()
            .map(|r| r.text.as_str())
            .unwrap_or(snapshot.input_text.as_str());

        let document = FinalDocument {
            title: title_from(request_text),
            created_at: Utc::now(),
            content: draft.content.clone(),
            data: draft.data.clone(),
            human_edit: None,
        };
        let update = StepUpdate::new()
            .with_note(
                "finalize",
                format!("assembled document from draft v{}", draft.version),
            )
            .with_document(document);
        Ok(StepOutcome::Update(update))
    }
}
