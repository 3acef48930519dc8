//! # Draftloom: Resumable Review-Pipeline Workflow Engine
//!
//! Draftloom drives a document request through a fixed review pipeline —
//! produce, safety-check, quality-check, decide, finalize — with a human
//! approval gate at the end, durable progress, and live fan-out.
//!
//! ## Core concepts
//!
//! - **Steps**: Async units of work that read a state snapshot and return
//!   a typed partial update (or a suspension)
//! - **Reducers**: The only code path that mutates shared state; every
//!   field has a declared merge behavior
//! - **Checkpoints**: Full merged state persisted after every step, so
//!   runs survive crashes and suspensions
//! - **Ledger**: Queryable run records and a per-run event log
//! - **Broadcast**: Per-thread rooms delivering progress messages with
//!   bounded latency
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use draftloom::engine::{Engine, EngineConfig};
//! use draftloom::pipeline::Pipeline;
//! use draftloom::steps::HeuristicProvider;
//! use draftloom::suspend::ResumePayload;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = Pipeline::standard(Arc::new(HeuristicProvider::default()));
//! let engine = Engine::in_memory(pipeline, EngineConfig::default());
//!
//! // Drive until the approval gate suspends the run.
//! let halted = engine.start_run("thread-1", "Write a short onboarding guide").await?;
//! assert!(halted.suspension.is_some());
//!
//! // An approver signs off; the run completes.
//! let done = engine.resume_run("thread-1", ResumePayload::approve()).await?;
//! assert!(done.state.document.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Watching progress
//!
//! ```no_run
//! use std::sync::Arc;
//! use draftloom::broadcast::ChannelObserver;
//! # use draftloom::engine::{Engine, EngineConfig};
//! # use draftloom::pipeline::Pipeline;
//! # use draftloom::steps::HeuristicProvider;
//! # async fn example() {
//! # let engine = Engine::in_memory(
//! #     Pipeline::standard(Arc::new(HeuristicProvider::default())),
//! #     EngineConfig::default(),
//! # );
//! let (observer, mut rx) = ChannelObserver::pair(64);
//! engine.broadcaster().subscribe("thread-1", Arc::new(observer)).await;
//! tokio::spawn(async move {
//!     while let Some(message) = rx.recv().await {
//!         println!("[{}] {}", message.seq, message.kind());
//!     }
//! });
//! # }
//! ```

pub mod broadcast;
pub mod channels;
pub mod document;
pub mod engine;
pub mod pipeline;
pub mod progress;
pub mod reducers;
pub mod state;
pub mod step;
pub mod steps;
pub mod suspend;
pub mod telemetry;
pub mod types;

pub use broadcast::{Broadcaster, ChannelObserver, Observer, SubscriberId};
pub use engine::{Engine, EngineConfig, EngineError, RunOutcome};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use progress::{ProgressBody, ProgressMessage};
pub use state::{DocState, StateSnapshot};
pub use step::{Step, StepContext, StepError, StepOutcome, StepUpdate};
pub use suspend::{HumanDecision, ResumePayload, Suspension};
pub use types::{FieldId, RunStatus, StepKind};
