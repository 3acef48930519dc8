/*!
Persistence primitives for serializing and deserializing checkpoints
(used by the SQLite store and any future durable backends).

Design goals:
- Explicit serde-friendly structs decoupled from in-memory representations.
- Conversion logic localized in From / TryFrom impls so backend code stays
  lean and declarative.
- Tolerance for hand-edited or partially corrupted stored state: malformed
  collection channels coerce to empty rather than failing the whole load.

This module performs no I/O.
*/

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::engine::checkpoint::Checkpoint;
use crate::state::DocState;
use crate::types::StepKind;

/// Full persisted checkpoint representation. Step history tables store one
/// row per instance of this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedCheckpoint {
    pub thread_id: String,
    pub step: u64,
    /// Full merged state as a JSON document.
    pub state: Value,
    /// Step kinds in their `StepKind::encode()` string form.
    pub ran: String,
    pub next: String,
    /// RFC3339 creation time (keeps `chrono` types out of the stored shape).
    pub created_at: String,
}

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            thread_id: checkpoint.thread_id.clone(),
            step: checkpoint.step,
            state: serde_json::to_value(&checkpoint.state).unwrap_or(Value::Null),
            ran: checkpoint.ran.encode().to_string(),
            next: checkpoint.next.encode().to_string(),
            created_at: checkpoint.created_at.to_rfc3339(),
        }
    }
}

impl TryFrom<PersistedCheckpoint> for Checkpoint {
    type Error = PersistenceError;

    fn try_from(persisted: PersistedCheckpoint) -> Result<Self, Self::Error> {
        let ran = StepKind::decode(&persisted.ran)
            .ok_or_else(|| PersistenceError::UnknownStep(persisted.ran.clone()))?;
        let next = StepKind::decode(&persisted.next)
            .ok_or_else(|| PersistenceError::UnknownStep(persisted.next.clone()))?;
        let created_at = DateTime::parse_from_rfc3339(&persisted.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|source| PersistenceError::Timestamp {
                raw: persisted.created_at.clone(),
                source,
            })?;
        let state = decode_state(persisted.state)?;
        Ok(Checkpoint {
            thread_id: persisted.thread_id,
            step: persisted.step,
            state,
            ran,
            next,
            created_at,
        })
    }
}

/// Deserialize stored state, coercing malformed collection channels to
/// empty instead of rejecting the whole checkpoint.
fn decode_state(mut raw: Value) -> Result<DocState, PersistenceError> {
    if let Some(root) = raw.as_object_mut() {
        coerce_channel(root, "drafts", Value::Array(Vec::new()));
        for field in ["reviews", "metrics", "notes"] {
            coerce_channel(root, field, Value::Object(serde_json::Map::new()));
        }
    }
    serde_json::from_value(raw).map_err(|source| PersistenceError::Serde { source })
}

/// Replace a channel value whose shape does not match its declared kind.
fn coerce_channel(root: &mut serde_json::Map<String, Value>, field: &str, empty: Value) {
    let Some(channel) = root.get_mut(field).and_then(Value::as_object_mut) else {
        return;
    };
    let malformed = match (&empty, channel.get("value")) {
        (Value::Array(_), Some(Value::Array(_))) => false,
        (Value::Object(_), Some(Value::Object(_))) => false,
        _ => true,
    };
    if malformed {
        channel.insert("value".to_string(), empty);
    }
}

/// Conversion and serialization errors for persistence models.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("serde (de)serialization failure: {source}")]
    #[diagnostic(code(draftloom::persistence::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    /// Stored step kind string no longer decodes.
    #[error("unknown step kind in stored checkpoint: `{0}`")]
    #[diagnostic(
        code(draftloom::persistence::unknown_step),
        help("The checkpoint was written by an incompatible version.")
    )]
    UnknownStep(String),

    #[error("invalid stored timestamp `{raw}`: {source}")]
    #[diagnostic(code(draftloom::persistence::timestamp))]
    Timestamp {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },
}
