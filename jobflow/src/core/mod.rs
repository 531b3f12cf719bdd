//! Core domain model types for jobflow.
//!
//! This module contains the fundamental vocabulary shared by every layer:
//! - Job execution states, in pipeline order
//! - Server-side job statuses

mod state;
mod status;

pub use state::JobState;
pub use status::JobStatus;
