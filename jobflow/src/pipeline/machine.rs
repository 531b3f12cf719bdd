//! The job execution state machine.

use super::{Backoff, PipelineBuilder, RetryPolicy, StateDescriptor, StateTable};
use crate::cancellation::{KillHandle, KillSource, KillSwitch};
use crate::context::ExecutionContext;
use crate::core::JobState;
use crate::errors::AgentError;
use crate::events::{ExecutionEvent, ListenerSet};
use crate::stages::{classify, Escalation, Stage, StageFailure};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drives one job execution through the fixed pipeline of states.
///
/// Each state's stage is attempted up to `1 + retries` times. Failures never
/// escape [`run`](Self::run): they are recorded in the context and reported to
/// listeners, and the pipeline always continues to its tail so cleanup and
/// status reporting happen.
///
/// Kills are delivered through [`kill`](Self::kill) or a [`KillHandle`] from
/// any thread and take effect at the next state or retry boundary.
pub struct JobExecutionStateMachine {
    stages: BTreeMap<JobState, Arc<dyn Stage>>,
    table: Arc<StateTable>,
    retry_policy: RetryPolicy,
    listeners: ListenerSet,
    kill_switch: Arc<KillSwitch>,
    context: Mutex<Option<ExecutionContext>>,
}

impl JobExecutionStateMachine {
    /// Starts building a state machine.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub(crate) fn new(
        stages: BTreeMap<JobState, Arc<dyn Stage>>,
        table: Arc<StateTable>,
        retry_policy: RetryPolicy,
        listeners: ListenerSet,
        context: ExecutionContext,
    ) -> Self {
        Self {
            stages,
            table,
            retry_policy,
            listeners,
            kill_switch: context.kill_switch().clone(),
            context: Mutex::new(Some(context)),
        }
    }

    /// The state table in use.
    #[must_use]
    pub fn table(&self) -> &StateTable {
        &self.table
    }

    /// The stage bound to each pipeline state, in pipeline order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<(JobState, String)> {
        JobState::PIPELINE
            .iter()
            .filter_map(|state| {
                self.stages
                    .get(state)
                    .map(|stage| (*state, stage.name().to_string()))
            })
            .collect()
    }

    /// Requests the job be killed. Returns true for the first request.
    pub fn kill(&self, source: KillSource) -> bool {
        self.kill_switch.kill(source)
    }

    /// A cloneable handle for delivering kills from other tasks or threads.
    #[must_use]
    pub fn kill_handle(&self) -> KillHandle {
        KillHandle::new(self.kill_switch.clone())
    }

    /// Returns whether a kill was requested.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.kill_switch.is_killed()
    }

    /// Runs the whole pipeline and returns the terminal context.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::AlreadyStarted`] if called more than once.
    pub async fn run(&self) -> Result<ExecutionContext, AgentError> {
        let mut ctx = self
            .context
            .lock()
            .take()
            .ok_or(AgentError::AlreadyStarted)?;
        if !ctx.mark_started() {
            return Err(AgentError::AlreadyStarted);
        }

        let execution_id = ctx.execution_id();
        info!(execution_id = %execution_id, "Job execution started");
        self.emit(&ExecutionEvent::StateMachineStarted);

        for state in JobState::PIPELINE {
            self.run_state(state, &mut ctx).await;
        }

        ctx.set_current_state(JobState::Done);
        ctx.set_attempts_left(0);
        self.emit(&ExecutionEvent::StateMachineStopped);

        info!(
            execution_id = %execution_id,
            aborted = ctx.is_execution_aborted(),
            killed = ctx.is_killed(),
            failures = ctx.transition_errors().len(),
            "Job execution finished"
        );
        Ok(ctx)
    }

    async fn run_state(&self, state: JobState, ctx: &mut ExecutionContext) {
        ctx.set_current_state(state);
        self.emit(&ExecutionEvent::StateEntered(state));

        let descriptor = self.table.descriptor(state);
        if should_skip(&descriptor, ctx) {
            debug!(state = %state, "Skipping state");
            self.emit(&ExecutionEvent::StateSkipped(state));
        } else {
            self.attempt_state(&descriptor, ctx).await;
        }

        self.emit(&ExecutionEvent::StateExited(state));
    }

    async fn attempt_state(&self, descriptor: &StateDescriptor, ctx: &mut ExecutionContext) {
        let state = descriptor.state;
        let Some(stage) = self.stages.get(&state) else {
            debug!(state = %state, "No stage bound");
            return;
        };

        ctx.set_attempts_left(descriptor.max_attempts());
        let mut backoff = Backoff::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.emit(&ExecutionEvent::BeforeAttempt { state, attempt });

            let attempts_left = ctx.consume_attempt();
            let result = AssertUnwindSafe(stage.attempt(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(StageFailure::from_panic(payload)));

            self.emit(&ExecutionEvent::AfterAttempt {
                state,
                attempt,
                failure: result.as_ref().err().cloned(),
            });

            let Err(failure) = result else {
                debug!(state = %state, attempt, stage = stage.name(), "Stage succeeded");
                return;
            };
            ctx.record_transition_error(state, attempt, failure.clone());

            match classify(state, &failure, attempts_left) {
                Escalation::Retry => {
                    let delay = backoff.advance(&self.retry_policy);
                    self.emit(&ExecutionEvent::DelayedRetry { state, delay });
                    self.backoff_sleep(descriptor, delay).await;

                    if should_skip(descriptor, ctx) {
                        info!(
                            state = %state,
                            attempts_left,
                            "Execution aborted between retries, abandoning state"
                        );
                        self.emit(&ExecutionEvent::StateSkipped(state));
                        return;
                    }
                }
                Escalation::Fatal(error) => {
                    if descriptor.critical
                        && !ctx.is_execution_aborted()
                        && ctx.set_execution_aborted(error.clone())
                    {
                        self.emit(&ExecutionEvent::ExecutionAborted {
                            state,
                            error: error.clone(),
                        });
                    }
                    self.emit(&ExecutionEvent::FatalException { state, error });
                    return;
                }
            }
        }
    }

    /// Sleeps out a retry delay. Only states abandoned on abort wake early
    /// on a kill; every other state waits the full delay.
    async fn backoff_sleep(&self, descriptor: &StateDescriptor, delay: Duration) {
        if !descriptor.skippable_when_aborted {
            tokio::time::sleep(delay).await;
            return;
        }

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = self.kill_switch.killed() => {
                warn!(state = %descriptor.state, "Retry delay interrupted by kill");
            }
        }
    }

    fn emit(&self, event: &ExecutionEvent) {
        self.listeners.broadcast(event);
    }
}

fn should_skip(descriptor: &StateDescriptor, ctx: &ExecutionContext) -> bool {
    (descriptor.skippable_when_aborted && ctx.is_execution_aborted())
        || (descriptor.runs_only_on_fatal_abort && ctx.execution_aborted_error().is_none())
}

impl fmt::Debug for JobExecutionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecutionStateMachine")
            .field("stages", &self.stages.len())
            .field("retry_policy", &self.retry_policy)
            .field("listeners", &self.listeners)
            .field("killed", &self.is_killed())
            .field("started", &self.context.lock().is_none())
            .finish()
    }
}
