//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::core::JobState;
use crate::stages::{Stage, StageFailure, StageResult};

/// What a scripted stage does on one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Succeed.
    Succeed,
    /// Fail with a retryable failure.
    Retryable(String),
    /// Fail with a fatal failure.
    Fatal(String),
    /// Fail with an unclassified error.
    Unexpected(String),
    /// Panic inside the attempt.
    Panic(String),
}

impl Outcome {
    /// Shorthand for [`Outcome::Retryable`].
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    /// Shorthand for [`Outcome::Fatal`].
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    fn play(&self) -> StageResult {
        match self {
            Self::Succeed => Ok(()),
            Self::Retryable(message) => Err(StageFailure::retryable(message.clone())),
            Self::Fatal(message) => Err(StageFailure::fatal(message.clone())),
            Self::Unexpected(message) => {
                Err(StageFailure::unexpected(anyhow::anyhow!(message.clone())))
            }
            Self::Panic(message) => panic!("{message}"),
        }
    }
}

/// A stage that plays a script of outcomes, one per attempt.
///
/// The last outcome repeats once the script is exhausted; an empty script
/// always succeeds.
#[derive(Debug)]
pub struct ScriptedStage {
    name: String,
    script: Vec<Outcome>,
    attempts: AtomicU32,
}

impl ScriptedStage {
    /// Creates a stage playing the given script.
    #[must_use]
    pub fn new(name: impl Into<String>, script: Vec<Outcome>) -> Self {
        Self {
            name: name.into(),
            script,
            attempts: AtomicU32::new(0),
        }
    }

    /// A stage that always succeeds.
    #[must_use]
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::new(name, vec![Outcome::Succeed])
    }

    /// A stage that always fails with the same outcome.
    #[must_use]
    pub fn always(name: impl Into<String>, outcome: Outcome) -> Self {
        Self::new(name, vec![outcome])
    }

    /// Number of attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, _ctx: &mut ExecutionContext) -> StageResult {
        let index = self.attempts.fetch_add(1, Ordering::SeqCst) as usize;
        match self.script.get(index).or_else(|| self.script.last()) {
            Some(outcome) => outcome.play(),
            None => Ok(()),
        }
    }
}

/// A stage that takes a while before succeeding.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
}

impl SlowStage {
    /// Creates a new slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, _ctx: &mut ExecutionContext) -> StageResult {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// A stage that records the context state of every attempt in a shared log.
#[derive(Debug, Clone)]
pub struct RecordingStage {
    name: String,
    log: Arc<Mutex<Vec<RecordedAttempt>>>,
}

/// One attempt seen by a [`RecordingStage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAttempt {
    /// Stage name.
    pub stage: String,
    /// State the context was in.
    pub state: JobState,
    /// Attempts left after this one.
    pub attempts_left: u32,
    /// Whether the execution was aborted.
    pub aborted: bool,
}

impl RecordingStage {
    /// Creates a recording stage writing into `log`.
    #[must_use]
    pub fn new(name: impl Into<String>, log: Arc<Mutex<Vec<RecordedAttempt>>>) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, ctx: &mut ExecutionContext) -> StageResult {
        self.log.lock().push(RecordedAttempt {
            stage: self.name.clone(),
            state: ctx.current_state(),
            attempts_left: ctx.attempts_left(),
            aborted: ctx.is_execution_aborted(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_stage_plays_in_order() {
        let stage = ScriptedStage::new(
            "resolve",
            vec![Outcome::retryable("503"), Outcome::Succeed],
        );
        let mut ctx = ExecutionContext::new();

        assert!(stage.attempt(&mut ctx).await.unwrap_err().is_retryable());
        assert!(stage.attempt(&mut ctx).await.is_ok());
        assert!(stage.attempt(&mut ctx).await.is_ok());
        assert_eq!(stage.attempts(), 3);
    }

    #[tokio::test]
    async fn test_scripted_stage_unexpected() {
        let stage = ScriptedStage::always("setup", Outcome::Unexpected("bad path".into()));
        let mut ctx = ExecutionContext::new();

        let failure = stage.attempt(&mut ctx).await.unwrap_err();
        assert_eq!(failure.kind(), "unexpected");
    }

    #[tokio::test]
    async fn test_empty_script_succeeds() {
        let stage = ScriptedStage::new("noop", Vec::new());
        let mut ctx = ExecutionContext::new();
        assert!(stage.attempt(&mut ctx).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_stage() {
        let stage = SlowStage::new("slow", Duration::from_secs(5));
        let mut ctx = ExecutionContext::new();

        let started = tokio::time::Instant::now();
        stage.attempt(&mut ctx).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_recording_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stage = RecordingStage::new("cleanup", log.clone());
        let mut ctx = ExecutionContext::new();

        stage.attempt(&mut ctx).await.unwrap();
        let recorded = log.lock().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].stage, "cleanup");
        assert_eq!(recorded[0].state, JobState::Ready);
        assert!(!recorded[0].aborted);
    }
}
