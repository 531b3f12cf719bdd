//! Ports to remote collaborators used by the built-in stages.

use crate::core::JobStatus;
use crate::errors::StatusServiceError;
use async_trait::async_trait;

/// Client for the server's job status endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStatusService: Send + Sync {
    /// Asks the server to move a job from `current` to `next`.
    async fn change_job_status(
        &self,
        job_id: &str,
        current: JobStatus,
        next: JobStatus,
        message: &str,
    ) -> Result<(), StatusServiceError>;
}
