//! Engine infrastructure: run orchestration, checkpointing, and the ledger.
//!
//! The engine layer drives the pipeline one step at a time with durable
//! progress. Key abstractions:
//!
//! - **[`Engine`]** - Main orchestrator for stepwise run execution
//! - **[`Checkpointer`]** - Trait for pluggable state persistence
//! - **[`RunLedger`] / [`EventLog`]** - Queryable run and event history
//! - **Persistence models** - Serde-friendly shapes for stored state
//!
//! # Persistence backends
//!
//! - **[`InMemoryCheckpointer`] / [`InMemoryLedger`]** - volatile, for tests
//!   and development
//! - **`SqliteStore`** (feature `sqlite`) - durable single-file storage
//!   backing all three traits

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod ledger;
pub mod persistence;
pub mod runner;
#[cfg(feature = "sqlite")]
pub mod store_sqlite;

pub use checkpoint::{Checkpoint, Checkpointer, CheckpointerError, InMemoryCheckpointer};
pub use config::EngineConfig;
pub use errors::EngineError;
pub use ledger::{
    EventLog, InMemoryLedger, LedgerError, RunEvent, RunLedger, RunRecord, MAX_EVENT_LIMIT,
    MAX_RUN_LIMIT,
};
pub use persistence::{PersistedCheckpoint, PersistenceError};
pub use runner::{Engine, RunOutcome};
#[cfg(feature = "sqlite")]
pub use store_sqlite::SqliteStore;
