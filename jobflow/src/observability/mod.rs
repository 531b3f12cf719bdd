//! Observability utilities.

mod logging;
mod report;
mod timing;

pub use logging::{init_tracing, LogFormat, DEFAULT_FILTER};
pub use report::{AbortReason, ExecutionReport, FailureEntry};
pub use timing::StateTimingListener;
