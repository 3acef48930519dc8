use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::{
    reducers::{AppendDrafts, MapMerge, MergeNotes, Reducer, ReducerError, ReplaceLatest},
    state::DocState,
    step::StepUpdate,
    types::FieldId,
};
use tracing::instrument;

/// Declared merge behavior of a state field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReducerKind {
    /// Last writer wins; previous value discarded.
    Replace,
    /// Incoming items append after existing ones.
    AppendList,
    /// Shallow map merge, incoming keys win.
    MergeMap,
    /// Grouped append with adjacent-duplicate suppression.
    MergeNotes,
}

#[derive(Clone)]
pub struct ReducerRegistry {
    reducer_map: FxHashMap<FieldId, Arc<dyn Reducer>>,
    kinds: FxHashMap<FieldId, ReducerKind>,
}

/// Guard that checks whether a StepUpdate actually has data for the given
/// field, so the registry can skip reducers with nothing to do.
fn field_guard(field: FieldId, update: &StepUpdate) -> bool {
    match field {
        FieldId::Request => update.request.is_some(),
        FieldId::Drafts => update.drafts.as_ref().is_some_and(|v| !v.is_empty()),
        FieldId::Reviews => update.reviews.as_ref().is_some_and(|m| !m.is_empty()),
        FieldId::Decision => update.decision.is_some(),
        FieldId::Metrics => update.metrics.as_ref().is_some_and(|m| !m.is_empty()),
        FieldId::Notes => update.notes.as_ref().is_some_and(|m| !m.is_empty()),
        FieldId::Document => update.document.is_some(),
        FieldId::HumanFeedback => update.human_feedback.is_some(),
        FieldId::HumanDecision => update.human_decision.is_some(),
        FieldId::Status => update.status.is_some(),
    }
}

impl Default for ReducerRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        for field in [
            FieldId::Request,
            FieldId::Decision,
            FieldId::Document,
            FieldId::HumanFeedback,
            FieldId::HumanDecision,
            FieldId::Status,
        ] {
            registry.register(field, ReducerKind::Replace, Arc::new(ReplaceLatest(field)));
        }
        registry
            .register(
                FieldId::Drafts,
                ReducerKind::AppendList,
                Arc::new(AppendDrafts),
            )
            .register(
                FieldId::Reviews,
                ReducerKind::MergeMap,
                Arc::new(MapMerge(FieldId::Reviews)),
            )
            .register(
                FieldId::Metrics,
                ReducerKind::MergeMap,
                Arc::new(MapMerge(FieldId::Metrics)),
            )
            .register(
                FieldId::Notes,
                ReducerKind::MergeNotes,
                Arc::new(MergeNotes),
            );
        registry
    }
}

impl ReducerRegistry {
    /// Creates a new empty reducer registry.
    pub fn new() -> Self {
        Self {
            reducer_map: FxHashMap::default(),
            kinds: FxHashMap::default(),
        }
    }

    /// Registers a reducer for a field, replacing any previous binding.
    pub fn register(
        &mut self,
        field: FieldId,
        kind: ReducerKind,
        reducer: Arc<dyn Reducer>,
    ) -> &mut Self {
        self.reducer_map.insert(field, reducer);
        self.kinds.insert(field, kind);
        self
    }

    /// Declared reducer kind for a field. Fields never registered fall back
    /// to last-writer-wins.
    #[must_use]
    pub fn kind_for(&self, field: FieldId) -> ReducerKind {
        self.kinds.get(&field).copied().unwrap_or(ReducerKind::Replace)
    }

    #[instrument(skip(self, state, update), err)]
    pub fn try_update(
        &self,
        field: FieldId,
        state: &mut DocState,
        update: &StepUpdate,
    ) -> Result<(), ReducerError> {
        // Skip when the update carries nothing for this field.
        if !field_guard(field, update) {
            return Ok(());
        }
        match self.reducer_map.get(&field) {
            Some(reducer) => {
                reducer.apply(state, update);
                Ok(())
            }
            None => Err(ReducerError::UnknownField(field)),
        }
    }

    /// Merge every touched field of the update into the state.
    #[instrument(skip(self, state, update), err)]
    pub fn apply_all(&self, state: &mut DocState, update: &StepUpdate) -> Result<(), ReducerError> {
        for field in update.touched() {
            self.try_update(field, state, update)?;
        }
        Ok(())
    }
}
