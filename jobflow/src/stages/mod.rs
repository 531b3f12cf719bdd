//! Stage trait and implementations.
//!
//! A stage is the unit of work bound to one pipeline state. The state
//! machine only relies on [`Stage::attempt`]: `Ok(())` is success, and the
//! [`StageFailure`] variants say whether another attempt is worthwhile.

mod builtin;
mod failure;
mod ports;

pub use builtin::{resolve_final_status, FinalStatusStage, HandleErrorStage};
pub use failure::{
    classify, into_cause, Cause, Escalation, FatalExecutionError, StageFailure, StagePanic,
};
pub use ports::JobStatusService;
#[cfg(test)]
pub use ports::MockJobStatusService;

use crate::context::ExecutionContext;
use async_trait::async_trait;
use std::fmt::Debug;

/// Result of a single stage attempt.
pub type StageResult = Result<(), StageFailure>;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Attempts the stage's work once.
    ///
    /// Attempts are never interrupted: a kill requested meanwhile is only
    /// observed after this returns.
    async fn attempt(&self, ctx: &mut ExecutionContext) -> StageResult;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&mut ExecutionContext) -> StageResult + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&mut ExecutionContext) -> StageResult + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&mut ExecutionContext) -> StageResult + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&mut ExecutionContext) -> StageResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, ctx: &mut ExecutionContext) -> StageResult {
        (self.func)(ctx)
    }
}

/// A stage that does nothing and always succeeds.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, _ctx: &mut ExecutionContext) -> StageResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobStatus;

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("reserve", |ctx: &mut ExecutionContext| {
            ctx.reserved_job_id = Some("job-42".to_string());
            ctx.current_job_status = JobStatus::Reserved;
            Ok(())
        });

        assert_eq!(stage.name(), "reserve");

        let mut ctx = ExecutionContext::new();
        assert!(stage.attempt(&mut ctx).await.is_ok());
        assert_eq!(ctx.reserved_job_id.as_deref(), Some("job-42"));
        assert_eq!(ctx.current_job_status, JobStatus::Reserved);
    }

    #[tokio::test]
    async fn test_fn_stage_failure_passthrough() {
        let stage = FnStage::new("flaky", |_ctx: &mut ExecutionContext| {
            Err(StageFailure::retryable("server unavailable"))
        });

        let mut ctx = ExecutionContext::new();
        let failure = stage.attempt(&mut ctx).await.unwrap_err();
        assert!(failure.is_retryable());
    }

    #[test]
    fn test_noop_stage() {
        let stage = NoOpStage::new("noop");
        assert_eq!(stage.name(), "noop");

        let mut ctx = ExecutionContext::new();
        let result = tokio_test::block_on(stage.attempt(&mut ctx));
        assert!(result.is_ok());
    }
}
