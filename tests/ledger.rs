//! Run ledger queries through the engine's public surface.

mod common;

use common::{ScriptedProvider, engine_with};
use draftloom::document::DecisionAction;
use draftloom::suspend::ResumePayload;
use draftloom::types::RunStatus;

#[tokio::test]
async fn run_records_reflect_merged_state() {
    let engine = engine_with(ScriptedProvider::quality_fails_first());
    let outcome = engine.start_run("t1", "write a memo").await.expect("run");
    engine
        .resume_run("t1", ResumePayload::approve())
        .await
        .expect("resume");

    let record = engine
        .ledger()
        .run(&outcome.run_id)
        .await
        .expect("query")
        .expect("record");
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.input_text, "write a memo");
    assert!(record.approval_required);
    assert_eq!(record.iteration, 2);
    assert!(record.error.is_none());
    assert_eq!(record.decision, Some(DecisionAction::Finalize));
    assert_eq!(record.safety_score, Some(1.0));
    assert_eq!(record.quality_score, Some(0.9));
    assert!(record.document.is_some());
    assert_eq!(record.reviews.len(), 2);
    assert_eq!(
        record.human_decision.as_ref().map(|d| d.approved),
        Some(true)
    );
    assert!(record.pending_suspension.is_none());
    assert!(record.updated_at >= record.created_at);
}

#[tokio::test]
async fn list_runs_returns_newest_first_with_clamped_limits() {
    let engine = engine_with(ScriptedProvider::passing());
    let mut run_ids = Vec::new();
    for i in 0..3 {
        let outcome = engine
            .start_run("t1", &format!("request {i}"))
            .await
            .expect("run");
        run_ids.push(outcome.run_id);
        engine
            .resume_run("t1", ResumePayload::approve())
            .await
            .expect("resume");
    }

    let listed = engine.ledger().list_runs("t1", 200).await.expect("list");
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].run_id, run_ids[2]);
    assert_eq!(listed[2].run_id, run_ids[0]);

    // A zero limit clamps up to one result rather than none.
    assert_eq!(engine.ledger().list_runs("t1", 0).await.expect("list").len(), 1);
    assert!(engine.ledger().list_runs("t-unknown", 10).await.expect("list").is_empty());
}

#[tokio::test]
async fn unknown_run_queries_return_none() {
    let engine = engine_with(ScriptedProvider::passing());
    assert!(engine.ledger().run("nope").await.expect("query").is_none());
    assert!(
        engine
            .ledger()
            .latest_halted_run("t-unknown")
            .await
            .expect("query")
            .is_none()
    );
    assert!(engine.events().events("nope", 10).await.expect("events").is_empty());
    assert_eq!(engine.events().last_seq("nope").await.expect("seq"), 0);
}

#[tokio::test]
async fn event_log_omits_state_dumps() {
    let engine = engine_with(ScriptedProvider::passing());
    let outcome = engine.start_run("t1", "write a memo").await.expect("run");
    let events = engine
        .events()
        .events(&outcome.run_id, 500)
        .await
        .expect("events");
    assert!(events.iter().all(|e| e.kind != "state_update"));
    // Gaps left by broadcast-only messages are expected.
    assert!(events.last().map(|e| e.seq).unwrap_or(0) > events.len() as u64);
}
