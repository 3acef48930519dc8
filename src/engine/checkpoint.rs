//! Checkpoint model and pluggable persistence.
//!
//! A checkpoint is written after every merged step, before routing hands
//! control onward, so a crash or suspension can always pick up from the
//! last merge. History is append-only per thread.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::state::DocState;
use crate::types::StepKind;

/// Durable record of one merged step.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub thread_id: String,
    /// Monotonic step number within the thread, starting at 1.
    pub step: u64,
    /// Full merged state after the step.
    pub state: DocState,
    /// The step that just ran.
    pub ran: StepKind,
    /// The step routing chose next. For a suspension this equals `ran`,
    /// so a resume re-enters the suspended step.
    pub next: StepKind,
    pub created_at: DateTime<Utc>,
}

/// Pluggable checkpoint persistence.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Append a checkpoint to the thread's history.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointerError>;

    /// The thread's most recent checkpoint, if any.
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointerError>;

    /// Full history for a thread, oldest first.
    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointerError>;
}

/// Errors surfaced by checkpoint backends.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointerError {
    /// Checkpoint could not be serialized or deserialized.
    #[error("checkpoint (de)serialization failed: {0}")]
    #[diagnostic(code(draftloom::checkpoint::persistence))]
    Persistence(#[from] crate::engine::persistence::PersistenceError),

    /// Backend storage failure.
    #[error("checkpoint backend error: {message}")]
    #[diagnostic(code(draftloom::checkpoint::backend))]
    Backend { message: String },
}

/// Volatile checkpointer for tests and development. Keeps every
/// checkpoint for every thread, in order.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    threads: RwLock<FxHashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointerError> {
        self.threads
            .write()
            .entry(checkpoint.thread_id.clone())
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointerError> {
        Ok(self
            .threads
            .read()
            .get(thread_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointerError> {
        Ok(self
            .threads
            .read()
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(thread_id: &str, step: u64) -> Checkpoint {
        Checkpoint {
            thread_id: thread_id.to_string(),
            step,
            state: DocState::new("req"),
            ran: StepKind::Intake,
            next: StepKind::Generate,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn history_is_append_only_and_ordered() {
        let cp = InMemoryCheckpointer::new();
        cp.save(checkpoint("t1", 1)).await.expect("save");
        cp.save(checkpoint("t1", 2)).await.expect("save");
        cp.save(checkpoint("t2", 1)).await.expect("save");

        let history = cp.history("t1").await.expect("history");
        assert_eq!(
            history.iter().map(|c| c.step).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(cp.latest("t1").await.expect("latest").map(|c| c.step), Some(2));
        assert_eq!(cp.latest("missing").await.expect("latest"), None);
    }
}
