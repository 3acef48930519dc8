//! Content provider abstraction.
//!
//! Drafting, reviewing, and deciding are judgment calls an external system
//! (a model endpoint, a rules engine, a human-written service) makes on the
//! pipeline's behalf. [`ContentProvider`] is that seam: steps translate
//! state into provider calls and provider output back into state updates.

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::{Value, json};
use thiserror::Error;

use crate::document::{Decision, Draft, RequestInfo, Review};
use crate::state::StateSnapshot;
use crate::step::StepError;

/// What the generate step asks a provider for.
#[derive(Clone, Debug)]
pub struct DraftRequest {
    pub request: RequestInfo,
    /// The draft being revised, absent on the first pass.
    pub prior_draft: Option<Draft>,
    /// One-shot guidance from a rejecting human approver.
    pub feedback: Option<String>,
    /// Changes the reviewers required on the previous pass.
    pub required_changes: Vec<String>,
    /// 1-based version the new draft will carry.
    pub version: u32,
}

/// What a provider hands back for one draft.
#[derive(Clone, Debug)]
pub struct DraftContent {
    pub content: String,
    pub data: Value,
    /// Short note on how the draft was produced.
    pub provenance: String,
}

/// External judgment source backing the pipeline steps.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Produce or revise a draft.
    async fn draft(&self, request: DraftRequest) -> Result<DraftContent, ProviderError>;

    /// Review a draft for safety concerns.
    async fn review_safety(
        &self,
        draft: &Draft,
        request: &RequestInfo,
    ) -> Result<Review, ProviderError>;

    /// Review a draft for quality.
    async fn review_quality(
        &self,
        draft: &Draft,
        request: &RequestInfo,
    ) -> Result<Review, ProviderError>;

    /// Choose between another revision loop and finalization.
    async fn decide(&self, snapshot: &StateSnapshot) -> Result<Decision, ProviderError>;
}

/// Provider-side failure, tagged with the provider's name for diagnostics.
#[derive(Debug, Error, Diagnostic)]
#[error("provider `{provider}` failed: {message}")]
#[diagnostic(code(draftloom::provider::failed))]
pub struct ProviderError {
    pub provider: &'static str,
    pub message: String,
}

impl ProviderError {
    #[must_use]
    pub fn new(provider: &'static str, message: impl Into<String>) -> Self {
        Self {
            provider,
            message: message.into(),
        }
    }
}

impl From<ProviderError> for StepError {
    fn from(err: ProviderError) -> Self {
        StepError::Provider {
            provider: err.provider,
            message: err.message,
        }
    }
}

/// Deterministic built-in provider.
///
/// Useful as a default and in environments without an external judgment
/// service: drafting is templated from the request text, reviews apply
/// fixed lexical heuristics, and the decision follows the review verdicts.
#[derive(Clone, Debug)]
pub struct HeuristicProvider {
    /// Terms that fail the safety review when present in a draft.
    pub deny_terms: Vec<String>,
    /// Minimum draft length (chars) the quality review accepts.
    pub min_length: usize,
}

impl Default for HeuristicProvider {
    fn default() -> Self {
        Self {
            deny_terms: vec!["guaranteed cure".into(), "medical advice".into()],
            min_length: 40,
        }
    }
}

#[async_trait]
impl ContentProvider for HeuristicProvider {
    async fn draft(&self, request: DraftRequest) -> Result<DraftContent, ProviderError> {
        let mut body = format!("Draft v{}\n\n{}", request.version, request.request.text);
        if let Some(feedback) = &request.feedback {
            body.push_str("\n\nRevised per reviewer feedback: ");
            body.push_str(feedback);
        }
        for change in &request.required_changes {
            body.push_str("\n- addressed: ");
            body.push_str(change);
        }
        let provenance = if request.prior_draft.is_some() {
            "revision".to_string()
        } else {
            "fresh".to_string()
        };
        Ok(DraftContent {
            content: body,
            data: json!({ "version": request.version }),
            provenance,
        })
    }

    async fn review_safety(
        &self,
        draft: &Draft,
        _request: &RequestInfo,
    ) -> Result<Review, ProviderError> {
        let lowered = draft.content.to_lowercase();
        let hits: Vec<String> = self
            .deny_terms
            .iter()
            .filter(|term| lowered.contains(term.as_str()))
            .cloned()
            .collect();
        if hits.is_empty() {
            return Ok(Review::passing(1.0));
        }
        let mut review = Review::failing(0.0);
        review.issues = hits.iter().map(|t| format!("contains `{t}`")).collect();
        review.required_changes = hits.iter().map(|t| format!("remove `{t}`")).collect();
        Ok(review)
    }

    async fn review_quality(
        &self,
        draft: &Draft,
        _request: &RequestInfo,
    ) -> Result<Review, ProviderError> {
        if draft.content.len() >= self.min_length {
            Ok(Review::passing(0.8))
        } else {
            let mut review = Review::failing(0.4);
            review.issues = vec!["draft too short".into()];
            review.required_changes = vec!["expand the draft".into()];
            Ok(review)
        }
    }

    async fn decide(&self, snapshot: &StateSnapshot) -> Result<Decision, ProviderError> {
        let both_pass =
            snapshot.safety_pass() == Some(true) && snapshot.quality_pass() == Some(true);
        if both_pass {
            Ok(Decision::finalize("both reviews passed"))
        } else {
            Ok(Decision::revise("at least one review flagged the draft"))
        }
    }
}
