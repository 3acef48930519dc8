//! Pipeline assembly and routing.
//!
//! The pipeline topology is fixed (intake, generate, the two reviews,
//! decide, finalize, human review) but the step implementations behind it
//! are pluggable. [`PipelineBuilder`] wires implementations together and
//! validates the result; [`routing`] decides which step runs next after
//! each merge.

mod builder;
pub mod routing;

pub use builder::{BuildError, Pipeline, PipelineBuilder};
