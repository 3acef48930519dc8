//! Reducers: the only code path that mutates shared pipeline state.
//!
//! Every state field has exactly one reducer kind. The engine collects a
//! [`StepUpdate`](crate::step::StepUpdate) from a step and hands it to the
//! [`ReducerRegistry`], which merges each touched field and bumps the
//! channel version. Steps never write state directly.

mod append_drafts;
mod map_merge;
mod merge_notes;
mod reducer_registry;
mod replace;

pub use append_drafts::AppendDrafts;
pub use map_merge::MapMerge;
pub use merge_notes::MergeNotes;
pub use reducer_registry::*;
pub use replace::ReplaceLatest;

use crate::state::DocState;
use crate::step::StepUpdate;
use crate::types::FieldId;
use std::fmt;

/// Unified reducer trait: a reducer merges one field of a [`StepUpdate`]
/// into [`DocState`], bumping the channel version when the merge changed it.
pub trait Reducer: Send + Sync {
    fn apply(&self, state: &mut DocState, update: &StepUpdate);
}

#[derive(Debug)]
pub enum ReducerError {
    UnknownField(FieldId),
}

impl fmt::Display for ReducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReducerError::UnknownField(field) => {
                write!(f, "no reducer registered for field: {field}")
            }
        }
    }
}

impl std::error::Error for ReducerError {}
