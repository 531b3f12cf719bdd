//! Test fixtures for pipeline testing.

use std::sync::Arc;

use crate::config::ExecutionConfig;
use crate::context::ExecutionContext;
use crate::core::JobState;
use crate::errors::AgentError;
use crate::events::{CollectingListener, ExecutionListener};
use crate::pipeline::{JobExecutionStateMachine, PipelineBuilder, StateTable};
use crate::stages::Stage;

use super::ScriptedStage;

/// A pipeline wired with a [`CollectingListener`], for asserting on events.
#[derive(Debug)]
pub struct TestPipeline {
    builder: PipelineBuilder,
    context: ExecutionContext,
    collector: Arc<CollectingListener>,
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPipeline {
    /// A pipeline whose states all run an always-succeeding stage.
    #[must_use]
    pub fn new() -> Self {
        let collector = Arc::new(CollectingListener::new());
        let builder = JobState::PIPELINE.iter().fold(
            PipelineBuilder::new().listener_arc(collector.clone()),
            |builder, state| builder.stage(*state, ScriptedStage::succeeding(state.as_str())),
        );
        Self {
            builder,
            context: ExecutionContext::new(),
            collector,
        }
    }

    /// Replaces the stage of one state.
    #[must_use]
    pub fn stage(mut self, state: JobState, stage: Arc<dyn Stage>) -> Self {
        self.builder = self.builder.stage_arc(state, stage);
        self
    }

    /// Sets the execution configuration.
    #[must_use]
    pub fn config(mut self, config: ExecutionConfig) -> Self {
        self.builder = self.builder.config(config);
        self
    }

    /// Registers an extra listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.builder = self.builder.listener_arc(listener);
        self
    }

    /// Uses an explicit state table.
    #[must_use]
    pub fn table(mut self, table: StateTable) -> Self {
        self.builder = self.builder.table(Arc::new(table));
        self
    }

    /// Uses the given context.
    #[must_use]
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Builds the state machine.
    pub fn build(self) -> Result<(JobExecutionStateMachine, Arc<CollectingListener>), AgentError> {
        let machine = self.builder.build(self.context)?;
        Ok((machine, self.collector))
    }

    /// Builds and runs the pipeline.
    pub async fn run(self) -> Result<(ExecutionContext, Arc<CollectingListener>), AgentError> {
        let (machine, collector) = self.build()?;
        let context = machine.run().await?;
        Ok((context, collector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_pipeline_succeeds() {
        let (ctx, collector) = TestPipeline::new().run().await.unwrap();

        assert_eq!(ctx.current_state(), JobState::Done);
        assert_eq!(collector.count("before-attempt"), 8);
        assert_eq!(collector.count("state-skipped"), 1);
    }
}
