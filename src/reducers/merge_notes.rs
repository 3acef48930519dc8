use super::Reducer;
use crate::state::DocState;
use crate::step::StepUpdate;

/// Grouped-append reducer for the notes channel.
///
/// Notes are grouped by step name; incoming notes append to their group in
/// order. A note identical to the group's current last entry is dropped, so
/// a retried step does not double-log. Duplicates elsewhere in the group are
/// kept.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct MergeNotes;

impl Reducer for MergeNotes {
    fn apply(&self, state: &mut DocState, update: &StepUpdate) {
        let Some(notes_update) = &update.notes else {
            return;
        };
        if notes_update.is_empty() {
            return;
        }
        let mut changed = false;
        let state_map = state.notes.get_mut();
        for (group, notes) in notes_update.iter() {
            let entry = state_map.entry(group.clone()).or_default();
            for note in notes {
                if entry.last() == Some(note) {
                    continue;
                }
                entry.push(note.clone());
                changed = true;
            }
        }
        if changed {
            state.notes.bump();
        }
    }
}
