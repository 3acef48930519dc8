/*!
SQLite store

Single-file durable backend implementing all three storage traits:
`Checkpointer`, `RunLedger`, and `EventLog`. One store instance can back
an entire engine, which keeps a run's checkpoint, ledger row, and events
in the same database file.

## Behavior

- The schema is created on connect (idempotent `CREATE TABLE IF NOT
  EXISTS`), so a fresh file is usable immediately.
- Checkpoints serialize through the persistence models (see
  `engine::persistence`); this module is database I/O only.
- `run_events` is keyed on `(run_id, seq)`, enforcing the per-run
  sequence contract at the storage layer.

## Storage growth

Complete checkpoint history is kept per thread. For long-lived
deployments, prune with plain SQL, e.g.:

```bash
sqlite3 draftloom.db "DELETE FROM checkpoints WHERE created_at < datetime('now', '-30 days')"
sqlite3 draftloom.db "VACUUM"
```
*/

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::sync::Arc;
use tracing::instrument;

use crate::document::DecisionAction;
use crate::engine::checkpoint::{Checkpoint, Checkpointer, CheckpointerError};
use crate::engine::ledger::{
    EventLog, LedgerError, MAX_EVENT_LIMIT, MAX_RUN_LIMIT, RunEvent, RunLedger, RunRecord,
    clamp_limit,
};
use crate::engine::persistence::PersistedCheckpoint;
use crate::progress::ProgressMessage;
use crate::state::{QUALITY_SCORE_KEY, SAFETY_SCORE_KEY, StateSnapshot};
use crate::suspend::Suspension;
use crate::types::RunStatus;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id   TEXT    NOT NULL,
    step        INTEGER NOT NULL,
    state_json  TEXT    NOT NULL,
    ran         TEXT    NOT NULL,
    next        TEXT    NOT NULL,
    created_at  TEXT    NOT NULL,
    PRIMARY KEY (thread_id, step)
);

CREATE TABLE IF NOT EXISTS runs (
    run_id                  TEXT PRIMARY KEY,
    thread_id               TEXT    NOT NULL,
    input_text              TEXT    NOT NULL,
    approval_required       INTEGER NOT NULL DEFAULT 1,
    status                  TEXT    NOT NULL,
    iteration               INTEGER NOT NULL DEFAULT 0,
    decision                TEXT,
    safety_score            REAL,
    quality_score           REAL,
    document_json           TEXT,
    reviews_json            TEXT    NOT NULL DEFAULT '{}',
    human_decision_json     TEXT,
    pending_suspension_json TEXT,
    error                   TEXT,
    created_at              TEXT    NOT NULL,
    updated_at              TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_runs_thread ON runs (thread_id);

CREATE TABLE IF NOT EXISTS run_events (
    run_id       TEXT    NOT NULL,
    seq          INTEGER NOT NULL,
    kind         TEXT    NOT NULL,
    message_json TEXT    NOT NULL,
    recorded_at  TEXT    NOT NULL,
    PRIMARY KEY (run_id, seq)
);
"#;

/// SQLite-backed checkpointer, run ledger, and event log.
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

impl SqliteStore {
    /// Connect to (or create) a SQLite database.
    /// Example URL: `sqlite://draftloom.db?mode=rwc`
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, CheckpointerError> {
        let pool = SqlitePool::connect(database_url).await.map_err(|e| {
            CheckpointerError::Backend {
                message: format!("connect error: {e}"),
            }
        })?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("schema setup: {e}"),
            })?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn backend<E: std::fmt::Display>(what: &str) -> impl Fn(E) -> LedgerError + '_ {
    move |e| LedgerError::Backend {
        message: format!("{what}: {e}"),
    }
}

fn cp_backend<E: std::fmt::Display>(what: &str) -> impl Fn(E) -> CheckpointerError + '_ {
    move |e| CheckpointerError::Backend {
        message: format!("{what}: {e}"),
    }
}

fn parse_timestamp(raw: &str, what: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Backend {
            message: format!("invalid {what} timestamp `{raw}`: {e}"),
        })
}

fn run_from_row(row: &SqliteRow) -> Result<RunRecord, LedgerError> {
    let status_raw: String = row.get("status");
    let status = match status_raw.as_str() {
        "RUNNING" => RunStatus::Running,
        "HALTED" => RunStatus::Halted,
        "COMPLETED" => RunStatus::Completed,
        "FAILED" => RunStatus::Failed,
        other => {
            return Err(LedgerError::Backend {
                message: format!("unknown stored run status `{other}`"),
            });
        }
    };
    let decision = match row.get::<Option<String>, _>("decision").as_deref() {
        Some("revise") => Some(DecisionAction::Revise),
        Some("finalize") => Some(DecisionAction::Finalize),
        _ => None,
    };
    let document = row
        .get::<Option<String>, _>("document_json")
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(backend("document decode"))?;
    let reviews_json: String = row.get("reviews_json");
    let reviews = serde_json::from_str(&reviews_json).map_err(backend("reviews decode"))?;
    let human_decision = row
        .get::<Option<String>, _>("human_decision_json")
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(backend("human decision decode"))?;
    let pending_suspension: Option<Suspension> = row
        .get::<Option<String>, _>("pending_suspension_json")
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(backend("pending suspension decode"))?;
    let created_raw: String = row.get("created_at");
    let updated_raw: String = row.get("updated_at");
    Ok(RunRecord {
        run_id: row.get("run_id"),
        thread_id: row.get("thread_id"),
        input_text: row.get("input_text"),
        approval_required: row.get::<i64, _>("approval_required") != 0,
        status,
        iteration: row.get::<i64, _>("iteration") as u64,
        decision,
        safety_score: row.get("safety_score"),
        quality_score: row.get("quality_score"),
        document,
        reviews,
        human_decision,
        pending_suspension,
        error: row.get("error"),
        created_at: parse_timestamp(&created_raw, "created_at")?,
        updated_at: parse_timestamp(&updated_raw, "updated_at")?,
    })
}

fn checkpoint_from_row(row: &SqliteRow) -> Result<Checkpoint, CheckpointerError> {
    let state_json: String = row.get("state_json");
    let persisted = PersistedCheckpoint {
        thread_id: row.get("thread_id"),
        step: row.get::<i64, _>("step") as u64,
        state: serde_json::from_str(&state_json)
            .map_err(cp_backend("checkpoint state decode"))?,
        ran: row.get("ran"),
        next: row.get("next"),
        created_at: row.get("created_at"),
    };
    Ok(Checkpoint::try_from(persisted)?)
}

#[async_trait]
impl Checkpointer for SqliteStore {
    #[instrument(skip(self, checkpoint), err)]
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointerError> {
        let persisted = PersistedCheckpoint::from(&checkpoint);
        let state_json =
            serde_json::to_string(&persisted.state).map_err(cp_backend("state encode"))?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints
                (thread_id, step, state_json, ran, next, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&persisted.thread_id)
        .bind(persisted.step as i64)
        .bind(&state_json)
        .bind(&persisted.ran)
        .bind(&persisted.next)
        .bind(&persisted.created_at)
        .execute(&*self.pool)
        .await
        .map_err(cp_backend("insert checkpoint"))?;
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointerError> {
        let row = sqlx::query(
            "SELECT * FROM checkpoints WHERE thread_id = ?1 ORDER BY step DESC LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(cp_backend("select latest checkpoint"))?;
        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointerError> {
        let rows =
            sqlx::query("SELECT * FROM checkpoints WHERE thread_id = ?1 ORDER BY step ASC")
                .bind(thread_id)
                .fetch_all(&*self.pool)
                .await
                .map_err(cp_backend("select checkpoint history"))?;
        rows.iter().map(checkpoint_from_row).collect()
    }
}

#[async_trait]
impl RunLedger for SqliteStore {
    #[instrument(skip(self, record), err)]
    async fn create_run(&self, record: RunRecord) -> Result<(), LedgerError> {
        let document_json = record
            .document
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(backend("document encode"))?;
        let reviews_json =
            serde_json::to_string(&record.reviews).map_err(backend("reviews encode"))?;
        let human_decision_json = record
            .human_decision
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(backend("human decision encode"))?;
        let pending_json = record
            .pending_suspension
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(backend("pending suspension encode"))?;
        let result = sqlx::query(
            r#"
            INSERT INTO runs
                (run_id, thread_id, input_text, approval_required, status,
                 iteration, decision, safety_score, quality_score,
                 document_json, reviews_json, human_decision_json,
                 pending_suspension_json, error, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&record.run_id)
        .bind(&record.thread_id)
        .bind(&record.input_text)
        .bind(i64::from(record.approval_required))
        .bind(record.status.as_str())
        .bind(record.iteration as i64)
        .bind(record.decision.map(|d| match d {
            DecisionAction::Revise => "revise",
            DecisionAction::Finalize => "finalize",
        }))
        .bind(record.safety_score)
        .bind(record.quality_score)
        .bind(document_json)
        .bind(&reviews_json)
        .bind(human_decision_json)
        .bind(pending_json)
        .bind(&record.error)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&*self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(LedgerError::DuplicateRun {
                    run_id: record.run_id,
                })
            }
            Err(e) => Err(LedgerError::Backend {
                message: format!("insert run: {e}"),
            }),
        }
    }

    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        snapshot: &StateSnapshot,
        error: Option<&str>,
    ) -> Result<(), LedgerError> {
        let document_json = snapshot
            .document
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(backend("document encode"))?;
        let reviews_json =
            serde_json::to_string(&snapshot.reviews).map_err(backend("reviews encode"))?;
        let human_decision_json = snapshot
            .human_decision
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(backend("human decision encode"))?;
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?2, iteration = ?3, decision = ?4,
                safety_score = ?5, quality_score = ?6, document_json = ?7,
                reviews_json = ?8, human_decision_json = ?9, error = ?10,
                updated_at = ?11
            WHERE run_id = ?1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(snapshot.iteration() as i64)
        .bind(snapshot.decision.as_ref().map(|d| match d.action {
            DecisionAction::Revise => "revise",
            DecisionAction::Finalize => "finalize",
        }))
        .bind(snapshot.metric_f64(SAFETY_SCORE_KEY))
        .bind(snapshot.metric_f64(QUALITY_SCORE_KEY))
        .bind(document_json)
        .bind(&reviews_json)
        .bind(human_decision_json)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.pool)
        .await
        .map_err(backend("update run"))?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::UnknownRun {
                run_id: run_id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_pending_suspension(
        &self,
        run_id: &str,
        suspension: Option<Suspension>,
    ) -> Result<(), LedgerError> {
        let pending_json = suspension
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(backend("pending suspension encode"))?;
        let result = sqlx::query(
            "UPDATE runs SET pending_suspension_json = ?2, updated_at = ?3 WHERE run_id = ?1",
        )
        .bind(run_id)
        .bind(pending_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.pool)
        .await
        .map_err(backend("set pending suspension"))?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::UnknownRun {
                run_id: run_id.to_string(),
            });
        }
        Ok(())
    }

    async fn run(&self, run_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        let row = sqlx::query("SELECT * FROM runs WHERE run_id = ?1")
            .bind(run_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend("select run"))?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn latest_run(&self, thread_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        let row =
            sqlx::query("SELECT * FROM runs WHERE thread_id = ?1 ORDER BY rowid DESC LIMIT 1")
                .bind(thread_id)
                .fetch_optional(&*self.pool)
                .await
                .map_err(backend("select latest run"))?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn latest_halted_run(&self, thread_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM runs
            WHERE thread_id = ?1 AND status = 'HALTED'
            ORDER BY rowid DESC LIMIT 1
            "#,
        )
        .bind(thread_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(backend("select latest halted run"))?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn list_runs(
        &self,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<RunRecord>, LedgerError> {
        let limit = clamp_limit(limit, MAX_RUN_LIMIT);
        let rows =
            sqlx::query("SELECT * FROM runs WHERE thread_id = ?1 ORDER BY rowid DESC LIMIT ?2")
                .bind(thread_id)
                .bind(limit as i64)
                .fetch_all(&*self.pool)
                .await
                .map_err(backend("list runs"))?;
        rows.iter().map(run_from_row).collect()
    }
}

#[async_trait]
impl EventLog for SqliteStore {
    async fn append(&self, message: ProgressMessage) -> Result<(), LedgerError> {
        let message_json =
            serde_json::to_string(&message).map_err(backend("event encode"))?;
        sqlx::query(
            r#"
            INSERT INTO run_events (run_id, seq, kind, message_json, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&message.run_id)
        .bind(message.seq as i64)
        .bind(message.kind())
        .bind(&message_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.pool)
        .await
        .map_err(backend("insert event"))?;
        Ok(())
    }

    async fn events(&self, run_id: &str, limit: usize) -> Result<Vec<RunEvent>, LedgerError> {
        let limit = clamp_limit(limit, MAX_EVENT_LIMIT);
        let rows = sqlx::query(
            "SELECT * FROM run_events WHERE run_id = ?1 ORDER BY seq ASC LIMIT ?2",
        )
        .bind(run_id)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(backend("select events"))?;
        rows.iter()
            .map(|row| {
                let message_json: String = row.get("message_json");
                let message: ProgressMessage =
                    serde_json::from_str(&message_json).map_err(backend("event decode"))?;
                let recorded_raw: String = row.get("recorded_at");
                Ok(RunEvent {
                    run_id: row.get("run_id"),
                    seq: row.get::<i64, _>("seq") as u64,
                    kind: row.get("kind"),
                    message,
                    recorded_at: parse_timestamp(&recorded_raw, "recorded_at")?,
                })
            })
            .collect()
    }

    async fn last_seq(&self, run_id: &str) -> Result<u64, LedgerError> {
        let row = sqlx::query("SELECT COALESCE(MAX(seq), 0) AS max_seq FROM run_events WHERE run_id = ?1")
            .bind(run_id)
            .fetch_one(&*self.pool)
            .await
            .map_err(backend("select last seq"))?;
        Ok(row.get::<i64, _>("max_seq") as u64)
    }
}
