//! Context management for job execution.
//!
//! This module provides:
//! - The mutable execution context passed to every stage
//! - Audit records of failed attempts
//! - Artifacts produced by stages

mod artifacts;
mod execution;
mod records;

pub use artifacts::{CleanupStrategy, JobSpecification, ProcessHandle, ProcessResult};
pub use execution::ExecutionContext;
pub use records::TransitionErrorRecord;
