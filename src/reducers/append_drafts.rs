use super::Reducer;
use crate::state::DocState;
use crate::step::StepUpdate;

/// Append-list reducer for the drafts channel. Existing drafts are never
/// rewritten; the update's drafts land after them in order.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct AppendDrafts;

impl Reducer for AppendDrafts {
    fn apply(&self, state: &mut DocState, update: &StepUpdate) {
        if let Some(new_drafts) = &update.drafts
            && !new_drafts.is_empty()
        {
            state.drafts.get_mut().extend(new_drafts.iter().cloned());
            state.drafts.bump();
        }
    }
}
