//! Built-in stages for the error-handling and status-reporting tail.

use super::{JobStatusService, Stage, StageResult};
use crate::context::ExecutionContext;
use crate::core::JobStatus;
use crate::pipeline::StateTable;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Computes the status and message the job should end with.
///
/// A kill takes precedence over a fatal abort, which takes precedence over
/// the job process outcome.
#[must_use]
pub fn resolve_final_status(ctx: &ExecutionContext, table: &StateTable) -> (JobStatus, String) {
    if let Some(source) = ctx.kill_source() {
        return (JobStatus::Killed, format!("Job killed ({source})"));
    }

    if let Some(error) = ctx.execution_aborted_error() {
        let message = table
            .descriptor(error.state)
            .fatal_status_message
            .clone()
            .unwrap_or_else(|| error.message.clone());
        return (JobStatus::Failed, message);
    }

    if let Some(result) = &ctx.process_result {
        return (result.final_status, result.final_status_message.clone());
    }

    (JobStatus::Succeeded, "Job execution completed".to_string())
}

/// Prepares the failure status after a critical state failed fatally.
///
/// Leaves the status untouched on a killed job so the kill is reported.
#[derive(Debug, Clone)]
pub struct HandleErrorStage {
    table: Arc<StateTable>,
}

impl HandleErrorStage {
    /// Creates a new error-handling stage.
    #[must_use]
    pub fn new(table: Arc<StateTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl Stage for HandleErrorStage {
    fn name(&self) -> &str {
        "handle-error"
    }

    async fn attempt(&self, ctx: &mut ExecutionContext) -> StageResult {
        let Some(error) = ctx.execution_aborted_error() else {
            debug!("Execution not aborted, nothing to handle");
            return Ok(());
        };

        if ctx.is_killed() {
            info!(
                state = %error.state,
                error = %error,
                "Job killed after fatal error, deferring to kill status"
            );
            return Ok(());
        }

        let message = self
            .table
            .descriptor(error.state)
            .fatal_status_message
            .clone()
            .unwrap_or_else(|| error.message.clone());

        warn!(
            state = %error.state,
            error = %error,
            status_message = %message,
            "Handling fatal execution error"
        );

        ctx.next_job_status = JobStatus::Failed;
        ctx.next_job_status_message = Some(message);
        Ok(())
    }
}

/// Publishes the job's final status to the server.
///
/// Skipped when the server already finalized the job, when no job id was
/// reserved, or when the current status is already final.
pub struct FinalStatusStage {
    service: Arc<dyn JobStatusService>,
    table: Arc<StateTable>,
}

impl FinalStatusStage {
    /// Creates a new final status stage.
    #[must_use]
    pub fn new(service: Arc<dyn JobStatusService>, table: Arc<StateTable>) -> Self {
        Self { service, table }
    }
}

impl fmt::Debug for FinalStatusStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalStatusStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for FinalStatusStage {
    fn name(&self) -> &str {
        "final-status"
    }

    async fn attempt(&self, ctx: &mut ExecutionContext) -> StageResult {
        if ctx.next_job_status == JobStatus::Invalid {
            let (status, message) = resolve_final_status(ctx, &self.table);
            ctx.next_job_status = status;
            ctx.next_job_status_message = Some(message);
        }

        if ctx.skip_final_status_update() {
            info!("Final status already set by the server, skipping update");
            return Ok(());
        }

        let Some(job_id) = ctx.reserved_job_id.clone() else {
            debug!("No job id reserved, skipping final status update");
            return Ok(());
        };

        if ctx.current_job_status.is_finished() {
            debug!(
                status = %ctx.current_job_status,
                "Job status already final, skipping update"
            );
            return Ok(());
        }

        let message = ctx.next_job_status_message.clone().unwrap_or_default();
        self.service
            .change_job_status(&job_id, ctx.current_job_status, ctx.next_job_status, &message)
            .await?;

        info!(
            job_id = %job_id,
            from = %ctx.current_job_status,
            to = %ctx.next_job_status,
            "Published final job status"
        );
        ctx.current_job_status = ctx.next_job_status;
        Ok(())
    }
}
