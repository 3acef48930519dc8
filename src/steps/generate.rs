use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::instrument;

use crate::document::Draft;
use crate::state::{ITERATION_KEY, StateSnapshot};
use crate::step::{Step, StepContext, StepError, StepOutcome, StepUpdate};
use crate::steps::provider::{ContentProvider, DraftRequest};
use crate::types::{FieldId, StepKind};

/// Produces or revises a draft via the content provider.
///
/// Consumes the one-shot human feedback: if the snapshot carries feedback,
/// it is passed to the provider and cleared in the same update, so exactly
/// one revision sees it.
pub struct GenerateStep {
    provider: Arc<dyn ContentProvider>,
}

impl GenerateStep {
    pub fn new(provider: Arc<dyn ContentProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Step for GenerateStep {
    fn kind(&self) -> StepKind {
        StepKind::Generate
    }

    fn writes(&self) -> &'static [FieldId] {
        &[
            FieldId::Drafts,
            FieldId::Metrics,
            FieldId::Notes,
            FieldId::HumanFeedback,
        ]
    }

    #[instrument(skip(self, snapshot, _ctx), fields(thread_id = %_ctx.thread_id))]
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: StepContext,
    ) -> Result<StepOutcome, StepError> {
        let request = snapshot
            .request
            .clone()
            .ok_or(StepError::MissingInput { what: "request" })?;

        let prior_draft = snapshot.latest_draft().cloned();
        let version = snapshot.drafts.len() as u32 + 1;
        let required_changes: Vec<String> = snapshot
            .reviews
            .values()
            .flat_map(|r| r.required_changes.iter().cloned())
            .collect();

        let content = self
            .provider
            .draft(DraftRequest {
                request,
                prior_draft,
                feedback: snapshot.human_feedback.clone(),
                required_changes,
                version,
            })
            .await?;

        let draft = Draft {
            version,
            created_at: Utc::now(),
            content: content.content,
            data: content.data,
            provenance: content.provenance,
        };

        let mut update = StepUpdate::new()
            .with_drafts(vec![draft])
            .with_metric(ITERATION_KEY, json!(u64::from(version)))
            .with_note("generate", format!("produced draft v{version}"));
        if snapshot.human_feedback.is_some() {
            update = update.with_human_feedback(None);
        }
        Ok(StepOutcome::Update(update))
    }
}
