//! End-to-end engine runs against in-memory storage.

mod common;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use common::{ScriptedProvider, engine_with};
use draftloom::document::{DecisionAction, Review, SAFETY_REVIEW};
use draftloom::engine::{Engine, EngineConfig, EngineError};
use draftloom::pipeline::PipelineBuilder;
use draftloom::state::StateSnapshot;
use draftloom::step::{Step, StepContext, StepError, StepOutcome, StepUpdate};
use draftloom::steps::{
    DecideStep, FinalizeStep, GenerateStep, HumanReviewStep, IntakeStep, QualityReviewStep,
};
use draftloom::types::{FieldId, RunStatus, StepKind};

#[tokio::test]
async fn run_with_one_revision_loop_halts_at_approval() {
    let engine = engine_with(ScriptedProvider::quality_fails_first());

    let outcome = engine
        .start_run("t1", "write a short guide")
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Halted);
    let suspension = outcome.suspension.expect("suspension");
    assert_eq!(suspension.kind, "human_approval");
    assert!(suspension.document.is_some());

    // The failing quality review forced a second draft.
    assert_eq!(outcome.state.drafts.len(), 2);
    assert_eq!(outcome.state.iteration(), 2);
    assert_eq!(outcome.state.quality_pass(), Some(true));
    assert_eq!(
        outcome.state.decision.as_ref().map(|d| d.action),
        Some(DecisionAction::Finalize)
    );
    assert_eq!(outcome.state.status, RunStatus::Halted);

    // Ledger mirrors the halt and holds the pending suspension.
    let record = engine
        .ledger()
        .latest_run("t1")
        .await
        .expect("query")
        .expect("record");
    assert_eq!(record.run_id, outcome.run_id);
    assert_eq!(record.status, RunStatus::Halted);
    assert_eq!(record.iteration, 2);
    assert!(record.document.is_some());
    assert!(record.pending_suspension.is_some());
}

#[tokio::test]
async fn event_sequence_is_strictly_increasing() {
    let engine = engine_with(ScriptedProvider::passing());
    let outcome = engine.start_run("t1", "write a memo").await.expect("run");

    let events = engine
        .events()
        .events(&outcome.run_id, 500)
        .await
        .expect("events");
    assert_eq!(events.first().map(|e| e.kind.as_str()), Some("run_started"));
    assert_eq!(
        events.last().map(|e| e.kind.as_str()),
        Some("halt_required")
    );
    assert!(events.iter().any(|e| e.kind == "node_update"));
    for pair in events.windows(2) {
        assert!(pair[0].seq < pair[1].seq, "seq must strictly increase");
    }
}

#[tokio::test]
async fn provider_outage_fails_the_run() {
    let engine = engine_with(ScriptedProvider {
        fail_draft_at: Some(1),
        ..ScriptedProvider::default()
    });

    let err = engine.start_run("t1", "write a memo").await;
    assert!(matches!(
        err,
        Err(EngineError::StepFailure {
            step: StepKind::Generate,
            ..
        })
    ));

    let record = engine
        .ledger()
        .latest_run("t1")
        .await
        .expect("query")
        .expect("record");
    assert_eq!(record.status, RunStatus::Failed);
    assert!(
        record.error.as_deref().is_some_and(|e| e.contains("generate")),
        "failure text names the failing step"
    );

    let events = engine
        .events()
        .events(&record.run_id, 500)
        .await
        .expect("events");
    assert_eq!(events.last().map(|e| e.kind.as_str()), Some("run_failed"));
}

#[tokio::test]
async fn unattended_run_completes_without_halting() {
    let engine = engine_with(ScriptedProvider::passing());

    let outcome = engine
        .start_run_unattended("t1", "write a memo")
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.suspension.is_none());
    assert!(outcome.state.document.is_some());

    let record = engine
        .ledger()
        .latest_run("t1")
        .await
        .expect("query")
        .expect("record");
    assert_eq!(record.status, RunStatus::Completed);
    assert!(!record.approval_required);
    assert!(record.pending_suspension.is_none());

    let events = engine
        .events()
        .events(&outcome.run_id, 500)
        .await
        .expect("events");
    assert_eq!(
        events.last().map(|e| e.kind.as_str()),
        Some("run_completed")
    );
    assert!(!events.iter().any(|e| e.kind == "halt_required"));
}

#[tokio::test]
async fn unattended_safety_failure_completes_with_the_revised_draft() {
    // Safety fails draft v1, passes v2; no approval gate.
    let engine = engine_with(ScriptedProvider {
        safety_verdicts: vec![false],
        ..ScriptedProvider::default()
    });

    let outcome = engine
        .start_run_unattended("t1", "write a short guide")
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.suspension.is_none());
    assert_eq!(outcome.state.drafts.len(), 2);
    assert_eq!(outcome.state.safety_pass(), Some(true));
    let document = outcome.state.document.as_ref().expect("document");
    assert_eq!(
        document.content, outcome.state.drafts[1].content,
        "the revised draft becomes the final content"
    );
}

#[tokio::test]
async fn iteration_cap_forces_finalization() {
    // Quality never passes; without the cap this would loop forever.
    let engine = engine_with(ScriptedProvider {
        quality_verdicts: vec![false, false, false, false],
        ..ScriptedProvider::default()
    });

    let outcome = engine.start_run("t1", "write a memo").await.expect("run");
    assert_eq!(outcome.status, RunStatus::Halted);
    assert_eq!(outcome.state.drafts.len(), 3);
    assert_eq!(outcome.state.quality_pass(), Some(false));
    // The document was assembled from the best we had.
    assert!(outcome.state.document.is_some());
}

/// Safety review stand-in that never returns.
struct StalledReview;

#[async_trait]
impl Step for StalledReview {
    fn kind(&self) -> StepKind {
        StepKind::SafetyReview
    }

    fn writes(&self) -> &'static [FieldId] {
        &[FieldId::Reviews]
    }

    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: StepContext,
    ) -> Result<StepOutcome, StepError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(StepOutcome::Update(StepUpdate::new()))
    }
}

#[tokio::test]
async fn step_timeout_fails_the_run() {
    let provider = Arc::new(ScriptedProvider::passing());
    let pipeline = PipelineBuilder::new()
        .add_step(IntakeStep)
        .add_step(GenerateStep::new(provider.clone()))
        .add_step(StalledReview)
        .add_step(QualityReviewStep::new(provider.clone()))
        .add_step(DecideStep::new(provider))
        .add_step(FinalizeStep)
        .add_step(HumanReviewStep)
        .build()
        .expect("pipeline");
    let engine = Engine::in_memory(
        pipeline,
        EngineConfig::default().with_step_timeout(std::time::Duration::from_millis(50)),
    );

    let err = engine.start_run("t1", "write a memo").await;
    assert!(matches!(
        err,
        Err(EngineError::StepTimeout {
            step: StepKind::SafetyReview
        })
    ));

    let record = engine
        .ledger()
        .latest_run("t1")
        .await
        .expect("query")
        .expect("record");
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.error.is_some());
}

/// Safety review stand-in that cancels its own run mid-flight.
struct SelfCancellingReview {
    engine: Arc<OnceLock<Arc<Engine>>>,
}

#[async_trait]
impl Step for SelfCancellingReview {
    fn kind(&self) -> StepKind {
        StepKind::SafetyReview
    }

    fn writes(&self) -> &'static [FieldId] {
        &[FieldId::Reviews]
    }

    async fn run(
        &self,
        _snapshot: StateSnapshot,
        ctx: StepContext,
    ) -> Result<StepOutcome, StepError> {
        let engine = self.engine.get().expect("engine installed");
        assert!(engine.cancel(&ctx.run_id));
        Ok(StepOutcome::Update(
            StepUpdate::new().with_review(SAFETY_REVIEW, Review::passing(1.0)),
        ))
    }
}

#[tokio::test]
async fn cancellation_takes_effect_before_the_next_step() {
    let provider = Arc::new(ScriptedProvider::passing());
    let slot: Arc<OnceLock<Arc<Engine>>> = Arc::new(OnceLock::new());
    let pipeline = PipelineBuilder::new()
        .add_step(IntakeStep)
        .add_step(GenerateStep::new(provider.clone()))
        .add_step(SelfCancellingReview {
            engine: slot.clone(),
        })
        .add_step(QualityReviewStep::new(provider.clone()))
        .add_step(DecideStep::new(provider))
        .add_step(FinalizeStep)
        .add_step(HumanReviewStep)
        .build()
        .expect("pipeline");
    let engine = Arc::new(Engine::in_memory(pipeline, EngineConfig::default()));
    slot.set(engine.clone()).ok().expect("install engine");

    let err = engine.start_run("t1", "write a memo").await;
    assert!(matches!(err, Err(EngineError::Cancelled { .. })));

    let record = engine
        .ledger()
        .latest_run("t1")
        .await
        .expect("query")
        .expect("record");
    assert_eq!(record.status, RunStatus::Failed);
    // The safety review itself still merged before the cancellation hit.
    let events = engine
        .events()
        .events(&record.run_id, 500)
        .await
        .expect("events");
    assert!(events.iter().any(|e| e.kind == "node_update"));
    assert_eq!(events.last().map(|e| e.kind.as_str()), Some("run_failed"));
}

#[tokio::test]
async fn cancel_of_an_idle_run_reports_false() {
    let engine = engine_with(ScriptedProvider::passing());
    assert!(!engine.cancel("no-such-run"));
    let outcome = engine.start_run("t1", "write a memo").await.expect("run");
    // The run has halted; its flag is gone.
    assert!(!engine.cancel(&outcome.run_id));
}
