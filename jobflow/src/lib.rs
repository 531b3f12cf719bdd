//! # Jobflow
//!
//! The job execution core of a worker-node agent.
//!
//! A job runs through a fixed pipeline of states, each bound to one stage:
//!
//! - **State machine**: strict pipeline order, per-state retries with linear
//!   backoff, and a descriptor table saying which states are critical
//! - **Failure taxonomy**: stages return retryable, fatal or unexpected
//!   failures; nothing escapes `run()`, everything lands in the audit trail
//! - **Cooperative kills**: a kill from any thread takes effect at the next
//!   state or retry boundary, never mid-attempt
//! - **Listeners**: every transition is broadcast to observers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use jobflow::prelude::*;
//!
//! let machine = JobExecutionStateMachine::builder()
//!     .stage(JobState::ResolveSpec, ResolveSpecStage::new(client))
//!     .stage(JobState::Launch, LaunchStage::new())
//!     .listener(LoggingListener::default())
//!     .build(ExecutionContext::new())?;
//!
//! let kill = machine.kill_handle();
//! let ctx = machine.run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{KillHandle, KillSource, KillSwitch};
    pub use crate::config::ExecutionConfig;
    pub use crate::context::{
        CleanupStrategy, ExecutionContext, JobSpecification, ProcessHandle, ProcessResult,
        TransitionErrorRecord,
    };
    pub use crate::core::{JobState, JobStatus};
    pub use crate::errors::{AgentError, PipelineValidationError, StatusServiceError};
    pub use crate::events::{
        CollectingListener, ExecutionEvent, ExecutionListener, FnListener, LoggingListener,
    };
    pub use crate::observability::{init_tracing, ExecutionReport, LogFormat, StateTimingListener};
    pub use crate::pipeline::{
        JobExecutionStateMachine, PipelineBuilder, RetryPolicy, StateDescriptor, StateTable,
    };
    pub use crate::stages::{
        FatalExecutionError, FinalStatusStage, FnStage, HandleErrorStage, JobStatusService,
        NoOpStage, Stage, StageFailure, StageResult,
    };
}
