//! Pipeline building and execution.
//!
//! This module provides:
//! - The per-state descriptor table
//! - Linear retry backoff
//! - The pipeline builder with validation
//! - The job execution state machine

mod builder;
mod machine;
mod retry;
mod table;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use machine::JobExecutionStateMachine;
pub use retry::{Backoff, RetryPolicy};
pub use table::{StateDescriptor, StateTable};
