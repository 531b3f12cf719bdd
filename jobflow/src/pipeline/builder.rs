//! Pipeline builder with validation.

use super::{JobExecutionStateMachine, RetryPolicy, StateTable};
use crate::config::ExecutionConfig;
use crate::context::ExecutionContext;
use crate::core::JobState;
use crate::errors::{AgentError, PipelineValidationError};
use crate::events::{ExecutionListener, ListenerSet};
use crate::stages::{NoOpStage, Stage};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Builder for [`JobExecutionStateMachine`].
///
/// Pipeline states without a registered stage run a [`NoOpStage`].
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    stages: BTreeMap<JobState, Arc<dyn Stage>>,
    listeners: ListenerSet,
    table: Option<Arc<StateTable>>,
    config: ExecutionConfig,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a stage to a state, replacing any previous one.
    #[must_use]
    pub fn stage(self, state: JobState, stage: impl Stage + 'static) -> Self {
        self.stage_arc(state, Arc::new(stage))
    }

    /// Binds a shared stage to a state.
    #[must_use]
    pub fn stage_arc(mut self, state: JobState, stage: Arc<dyn Stage>) -> Self {
        self.stages.insert(state, stage);
        self
    }

    /// Registers a listener.
    #[must_use]
    pub fn listener(self, listener: impl ExecutionListener + 'static) -> Self {
        self.listener_arc(Arc::new(listener))
    }

    /// Registers a shared listener.
    #[must_use]
    pub fn listener_arc(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.add(listener);
        self
    }

    /// Uses an explicit state table instead of the default one.
    ///
    /// Retry overrides from the config still apply on top of it.
    #[must_use]
    pub fn table(mut self, table: Arc<StateTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Sets the execution configuration.
    #[must_use]
    pub fn config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the pipeline and binds it to a context.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or table is invalid, a stage is
    /// bound to READY or DONE, or the context was already started.
    pub fn build(
        mut self,
        context: ExecutionContext,
    ) -> Result<JobExecutionStateMachine, AgentError> {
        self.config.validate()?;

        let table = match self.table.take() {
            Some(table) if self.config.state_retries.is_empty() => {
                table.validate()?;
                table
            }
            Some(table) => Arc::new((*table).clone().with_retry_overrides(&self.config)?),
            None => Arc::new(StateTable::from_config(&self.config)?),
        };

        let misplaced: Vec<JobState> = self
            .stages
            .keys()
            .copied()
            .filter(|state| state.is_pseudo_state())
            .collect();
        if !misplaced.is_empty() {
            return Err(PipelineValidationError::new(
                "Stages cannot be bound to the READY or DONE pseudo-states",
            )
            .with_states(misplaced)
            .into());
        }

        if context.is_started() {
            return Err(AgentError::AlreadyStarted);
        }

        for state in JobState::PIPELINE {
            self.stages.entry(state).or_insert_with(|| {
                debug!(state = %state, "No stage bound, using no-op");
                let stage: Arc<dyn Stage> = Arc::new(NoOpStage::new(state.as_str()));
                stage
            });
        }

        Ok(JobExecutionStateMachine::new(
            self.stages,
            table,
            RetryPolicy::from_config(&self.config),
            self.listeners,
            context,
        ))
    }
}
