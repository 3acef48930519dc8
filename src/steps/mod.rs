//! Built-in step implementations for the review pipeline.
//!
//! Content generation and judgment live behind [`ContentProvider`]; the
//! steps themselves own the state protocol — what gets read, what may be
//! written, and when the run suspends.

mod decide;
mod finalize;
mod generate;
mod human_review;
mod intake;
mod provider;
mod quality;
mod safety;

pub use decide::DecideStep;
pub use finalize::FinalizeStep;
pub use generate::GenerateStep;
pub use human_review::{HUMAN_APPROVAL, HumanReviewStep};
pub use intake::IntakeStep;
pub use provider::{ContentProvider, DraftContent, DraftRequest, HeuristicProvider, ProviderError};
pub use quality::QualityReviewStep;
pub use safety::SafetyReviewStep;
