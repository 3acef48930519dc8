use super::Reducer;
use crate::state::DocState;
use crate::step::StepUpdate;
use crate::types::FieldId;

/// Shallow right-biased map merge for one map channel: keys in the update
/// overwrite existing keys, other keys are untouched.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct MapMerge(pub FieldId);

impl Reducer for MapMerge {
    fn apply(&self, state: &mut DocState, update: &StepUpdate) {
        match self.0 {
            FieldId::Reviews => {
                if let Some(reviews_update) = &update.reviews
                    && !reviews_update.is_empty()
                {
                    let state_map = state.reviews.get_mut();
                    for (k, v) in reviews_update.iter() {
                        state_map.insert(k.clone(), v.clone());
                    }
                    state.reviews.bump();
                }
            }
            FieldId::Metrics => {
                if let Some(metrics_update) = &update.metrics
                    && !metrics_update.is_empty()
                {
                    let state_map = state.metrics.get_mut();
                    for (k, v) in metrics_update.iter() {
                        state_map.insert(k.clone(), v.clone());
                    }
                    state.metrics.bump();
                }
            }
            _ => {}
        }
    }
}
