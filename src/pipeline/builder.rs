//! Pipeline construction and validation.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::step::Step;
use crate::steps::{
    ContentProvider, DecideStep, FinalizeStep, GenerateStep, HumanReviewStep, IntakeStep,
    QualityReviewStep, SafetyReviewStep,
};
use crate::types::StepKind;

/// Builder for assembling a review pipeline.
///
/// The topology is fixed; the builder registers an implementation for each
/// executable step and validates that nothing is missing or duplicated
/// before handing out a [`Pipeline`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use draftloom::pipeline::Pipeline;
/// use draftloom::steps::HeuristicProvider;
///
/// let pipeline = Pipeline::standard(Arc::new(HeuristicProvider::default()));
/// ```
pub struct PipelineBuilder {
    steps: FxHashMap<StepKind, Arc<dyn Step>>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: FxHashMap::default(),
        }
    }

    /// Register the implementation for one pipeline step. The step's own
    /// [`kind`](Step::kind) decides where it slots in.
    #[must_use]
    pub fn add_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.insert(step.kind(), Arc::new(step));
        self
    }

    /// Validate and build the pipeline.
    ///
    /// Every executable step must be registered exactly once, and nothing
    /// may be registered under the virtual terminal.
    pub fn build(self) -> Result<Pipeline, BuildError> {
        if self.steps.contains_key(&StepKind::End) {
            return Err(BuildError::VirtualStepRegistered);
        }
        for kind in StepKind::EXECUTABLE {
            if !self.steps.contains_key(&kind) {
                return Err(BuildError::MissingStep { step: kind });
            }
        }
        Ok(Pipeline { steps: self.steps })
    }
}

/// A validated, executable pipeline: one implementation per step.
#[derive(Clone)]
pub struct Pipeline {
    steps: FxHashMap<StepKind, Arc<dyn Step>>,
}

impl Pipeline {
    /// The standard pipeline with all seven steps backed by one content
    /// provider. Infallible: every executable step is registered here.
    #[must_use]
    pub fn standard(provider: Arc<dyn ContentProvider>) -> Self {
        let mut steps: FxHashMap<StepKind, Arc<dyn Step>> = FxHashMap::default();
        steps.insert(StepKind::Intake, Arc::new(IntakeStep));
        steps.insert(
            StepKind::Generate,
            Arc::new(GenerateStep::new(provider.clone())),
        );
        steps.insert(
            StepKind::SafetyReview,
            Arc::new(SafetyReviewStep::new(provider.clone())),
        );
        steps.insert(
            StepKind::QualityReview,
            Arc::new(QualityReviewStep::new(provider.clone())),
        );
        steps.insert(StepKind::Decide, Arc::new(DecideStep::new(provider)));
        steps.insert(StepKind::Finalize, Arc::new(FinalizeStep));
        steps.insert(StepKind::HumanReview, Arc::new(HumanReviewStep));
        Self { steps }
    }

    /// Look up the implementation of a step.
    pub fn step(&self, kind: StepKind) -> Result<&Arc<dyn Step>, BuildError> {
        self.steps
            .get(&kind)
            .ok_or(BuildError::MissingStep { step: kind })
    }
}

/// Errors surfaced by pipeline validation.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    /// An executable step has no registered implementation.
    #[error("no implementation registered for step `{step}`")]
    #[diagnostic(
        code(draftloom::pipeline::missing_step),
        help("Register every executable step with `add_step` before `build`.")
    )]
    MissingStep { step: StepKind },

    /// Something was registered under the virtual terminal.
    #[error("`end` is a virtual terminal and cannot carry an implementation")]
    #[diagnostic(code(draftloom::pipeline::virtual_step))]
    VirtualStepRegistered,
}
