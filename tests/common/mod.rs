//! Shared test fixtures: a scriptable content provider and engine setup.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;

use draftloom::document::{Decision, Draft, RequestInfo, Review};
use draftloom::engine::{Engine, EngineConfig};
use draftloom::pipeline::Pipeline;
use draftloom::state::StateSnapshot;
use draftloom::steps::{ContentProvider, DraftContent, DraftRequest, ProviderError};

/// Provider whose verdicts are scripted per draft version. Missing entries
/// default to passing, so most tests only script the interesting part.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    /// Safety verdict for draft v(N+1) at index N.
    pub safety_verdicts: Vec<bool>,
    /// Quality verdict for draft v(N+1) at index N.
    pub quality_verdicts: Vec<bool>,
    /// Fail the draft call for this version, simulating a provider outage.
    pub fail_draft_at: Option<u32>,
}

impl ScriptedProvider {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn quality_fails_first() -> Self {
        Self {
            quality_verdicts: vec![false],
            ..Self::default()
        }
    }
}

fn verdict(verdicts: &[bool], version: u32) -> bool {
    verdicts
        .get(version.saturating_sub(1) as usize)
        .copied()
        .unwrap_or(true)
}

#[async_trait]
impl ContentProvider for ScriptedProvider {
    async fn draft(&self, request: DraftRequest) -> Result<DraftContent, ProviderError> {
        if self.fail_draft_at == Some(request.version) {
            return Err(ProviderError::new("scripted", "simulated outage"));
        }
        let mut content = format!("draft v{}: {}", request.version, request.request.text);
        if let Some(feedback) = &request.feedback {
            content.push_str(&format!(" [feedback: {feedback}]"));
        }
        Ok(DraftContent {
            content,
            data: serde_json::json!({ "version": request.version }),
            provenance: if request.prior_draft.is_some() {
                "revision".into()
            } else {
                "fresh".into()
            },
        })
    }

    async fn review_safety(
        &self,
        draft: &Draft,
        _request: &RequestInfo,
    ) -> Result<Review, ProviderError> {
        Ok(if verdict(&self.safety_verdicts, draft.version) {
            Review::passing(1.0)
        } else {
            let mut review = Review::failing(0.1);
            review.required_changes = vec!["soften the claims".into()];
            review
        })
    }

    async fn review_quality(
        &self,
        draft: &Draft,
        _request: &RequestInfo,
    ) -> Result<Review, ProviderError> {
        Ok(if verdict(&self.quality_verdicts, draft.version) {
            Review::passing(0.9)
        } else {
            let mut review = Review::failing(0.3);
            review.required_changes = vec!["add more detail".into()];
            review
        })
    }

    async fn decide(&self, snapshot: &StateSnapshot) -> Result<Decision, ProviderError> {
        let both_pass =
            snapshot.safety_pass() == Some(true) && snapshot.quality_pass() == Some(true);
        Ok(if both_pass {
            Decision::finalize("reviews passed")
        } else {
            Decision::revise("reviews flagged the draft")
        })
    }
}

pub fn engine_with(provider: ScriptedProvider) -> Engine {
    Engine::in_memory(
        Pipeline::standard(Arc::new(provider)),
        EngineConfig::default(),
    )
}
