//! Live progress fan-out during engine runs.

mod common;

use std::sync::Arc;

use common::{ScriptedProvider, engine_with};
use draftloom::broadcast::ChannelObserver;
use draftloom::progress::{ProgressBody, ProgressMessage};
use draftloom::suspend::ResumePayload;

/// Collect everything delivered so far. The count round-trip queues behind
/// every pending broadcast in the room, so deliveries have finished by the
/// time it answers.
async fn drain(
    engine: &draftloom::engine::Engine,
    thread_id: &str,
    rx: &mut tokio::sync::mpsc::Receiver<ProgressMessage>,
) -> Vec<ProgressMessage> {
    engine.broadcaster().subscriber_count(thread_id).await;
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

#[tokio::test]
async fn observers_see_the_whole_run_in_order() {
    let engine = engine_with(ScriptedProvider::passing());
    let (observer, mut rx) = ChannelObserver::pair(256);
    engine
        .broadcaster()
        .subscribe("t1", Arc::new(observer))
        .await;

    engine.start_run("t1", "write a memo").await.expect("run");

    let messages = drain(&engine, "t1", &mut rx).await;
    assert!(matches!(messages[0].body, ProgressBody::RunStarted));
    assert!(
        matches!(
            messages.last().map(|m| &m.body),
            Some(ProgressBody::HaltRequired { .. })
        ),
        "halt is the last word"
    );
    // The broadcast stream includes state dumps the event log omits.
    assert!(
        messages
            .iter()
            .any(|m| matches!(m.body, ProgressBody::StateUpdate { .. }))
    );
    for pair in messages.windows(2) {
        assert!(pair[0].seq < pair[1].seq, "no reuse on the live stream");
    }
}

#[tokio::test]
async fn seq_does_not_repeat_across_a_resume() {
    let engine = engine_with(ScriptedProvider::passing());
    let (observer, mut rx) = ChannelObserver::pair(256);
    engine
        .broadcaster()
        .subscribe("t1", Arc::new(observer))
        .await;

    engine.start_run("t1", "write a memo").await.expect("run");
    engine
        .resume_run("t1", ResumePayload::approve())
        .await
        .expect("resume");

    let messages = drain(&engine, "t1", &mut rx).await;
    assert!(
        messages
            .iter()
            .any(|m| matches!(m.body, ProgressBody::ResumeStarted))
    );
    for pair in messages.windows(2) {
        assert!(pair[0].seq < pair[1].seq);
    }
}

#[tokio::test]
async fn late_subscribers_miss_nothing_that_follows() {
    let engine = engine_with(ScriptedProvider::passing());
    engine.start_run("t1", "write a memo").await.expect("run");

    // Subscribed after the halt: sees only the resume traffic.
    let (observer, mut rx) = ChannelObserver::pair(256);
    engine
        .broadcaster()
        .subscribe("t1", Arc::new(observer))
        .await;
    engine
        .resume_run("t1", ResumePayload::approve())
        .await
        .expect("resume");

    let messages = drain(&engine, "t1", &mut rx).await;
    assert!(matches!(messages[0].body, ProgressBody::ResumeStarted));
    assert!(matches!(
        messages.last().map(|m| &m.body),
        Some(ProgressBody::ResumeCompleted { .. })
    ));
}

#[tokio::test]
async fn threads_are_isolated() {
    let engine = engine_with(ScriptedProvider::passing());
    let (observer, mut rx) = ChannelObserver::pair(256);
    engine
        .broadcaster()
        .subscribe("t-other", Arc::new(observer))
        .await;

    engine.start_run("t1", "write a memo").await.expect("run");
    assert!(drain(&engine, "t1", &mut rx).await.is_empty());
}
