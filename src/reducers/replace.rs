use super::Reducer;
use crate::state::DocState;
use crate::step::StepUpdate;
use crate::types::FieldId;

/// Last-writer-wins reducer for one scalar channel. The previous value is
/// discarded wholesale.
///
/// One instance is registered per replace-semantics field; the instance
/// only ever touches the channel it was constructed for.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct ReplaceLatest(pub FieldId);

impl Reducer for ReplaceLatest {
    fn apply(&self, state: &mut DocState, update: &StepUpdate) {
        match self.0 {
            FieldId::Request => {
                if let Some(request) = &update.request {
                    *state.request.get_mut() = Some(request.clone());
                    state.request.bump();
                }
            }
            FieldId::Decision => {
                if let Some(decision) = &update.decision {
                    *state.decision.get_mut() = Some(decision.clone());
                    state.decision.bump();
                }
            }
            FieldId::Document => {
                if let Some(document) = &update.document {
                    *state.document.get_mut() = Some(document.clone());
                    state.document.bump();
                }
            }
            // `Some(None)` is an explicit clear of the one-shot feedback.
            FieldId::HumanFeedback => {
                if let Some(feedback) = &update.human_feedback {
                    *state.human_feedback.get_mut() = feedback.clone();
                    state.human_feedback.bump();
                }
            }
            FieldId::HumanDecision => {
                if let Some(decision) = &update.human_decision {
                    *state.human_decision.get_mut() = Some(decision.clone());
                    state.human_decision.bump();
                }
            }
            FieldId::Status => {
                if let Some(status) = update.status {
                    *state.status.get_mut() = status;
                    state.status.bump();
                }
            }
            // List/map channels have dedicated reducers.
            FieldId::Drafts | FieldId::Reviews | FieldId::Metrics | FieldId::Notes => {}
        }
    }
}
