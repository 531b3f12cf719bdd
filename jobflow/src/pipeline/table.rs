//! Static per-state metadata.

use crate::config::ExecutionConfig;
use crate::core::JobState;
use crate::errors::PipelineValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the state machine treats one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDescriptor {
    /// The state described.
    pub state: JobState,
    /// A fatal failure here aborts the job.
    pub critical: bool,
    /// The stage is not attempted once the execution is aborted.
    pub skippable_when_aborted: bool,
    /// Attempts beyond the first.
    pub retries: u32,
    /// The stage is only attempted after a fatal abort.
    pub runs_only_on_fatal_abort: bool,
    /// Status message reported when this state fails fatally.
    pub fatal_status_message: Option<String>,
}

impl StateDescriptor {
    /// A descriptor with every flag off.
    #[must_use]
    pub const fn new(state: JobState) -> Self {
        Self {
            state,
            critical: false,
            skippable_when_aborted: false,
            retries: 0,
            runs_only_on_fatal_abort: false,
            fatal_status_message: None,
        }
    }

    /// Total attempts allowed for the state.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

// (state, critical, skippable_when_aborted, retries, runs_only_on_fatal_abort, fatal message)
type Row = (JobState, bool, bool, u32, bool, Option<&'static str>);

const DEFAULT_ROWS: [Row; 11] = [
    (JobState::Ready, false, false, 0, false, None),
    (JobState::Initialize, true, true, 0, false, Some("Failed to initialize agent")),
    (JobState::Configure, true, true, 0, false, Some("Failed to configure job execution")),
    (JobState::ResolveSpec, true, true, 3, false, Some("Failed to resolve job specification")),
    (JobState::Setup, true, true, 0, false, Some("Failed to set up job")),
    (JobState::Launch, true, true, 0, false, Some("Failed to launch job")),
    (JobState::Monitor, true, true, 0, false, Some("Failed to monitor job")),
    (JobState::Cleanup, false, false, 0, false, None),
    (JobState::HandleError, false, false, 0, true, None),
    (JobState::Shutdown, false, false, 3, false, None),
    (JobState::Done, false, false, 0, false, None),
];

/// Total mapping from [`JobState`] to its [`StateDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTable {
    descriptors: BTreeMap<JobState, StateDescriptor>,
}

impl Default for StateTable {
    fn default() -> Self {
        let descriptors = DEFAULT_ROWS
            .iter()
            .map(|&(state, critical, skippable, retries, on_abort, message)| {
                (
                    state,
                    StateDescriptor {
                        state,
                        critical,
                        skippable_when_aborted: skippable,
                        retries,
                        runs_only_on_fatal_abort: on_abort,
                        fatal_status_message: message.map(str::to_string),
                    },
                )
            })
            .collect();
        Self { descriptors }
    }
}

impl StateTable {
    /// Builds a table from a list of descriptors.
    ///
    /// States missing from the list get an inert descriptor.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = StateDescriptor>,
    ) -> Result<Self, PipelineValidationError> {
        let mut map: BTreeMap<JobState, StateDescriptor> = JobState::ALL
            .iter()
            .map(|&state| (state, StateDescriptor::new(state)))
            .collect();
        for descriptor in descriptors {
            map.insert(descriptor.state, descriptor);
        }

        let table = Self { descriptors: map };
        table.validate()?;
        Ok(table)
    }

    /// The default table with the configured retry overrides applied.
    pub fn from_config(config: &ExecutionConfig) -> Result<Self, PipelineValidationError> {
        Self::default().with_retry_overrides(config)
    }

    /// Applies the per-state retry overrides of `config` to this table.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting table is invalid.
    pub fn with_retry_overrides(
        mut self,
        config: &ExecutionConfig,
    ) -> Result<Self, PipelineValidationError> {
        for (&state, &retries) in &config.state_retries {
            if let Some(descriptor) = self.descriptors.get_mut(&state) {
                descriptor.retries = retries;
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Looks up the descriptor of a state.
    #[must_use]
    pub fn get(&self, state: JobState) -> Option<&StateDescriptor> {
        self.descriptors.get(&state)
    }

    /// Looks up the descriptor of a state, falling back to an inert one.
    #[must_use]
    pub fn descriptor(&self, state: JobState) -> StateDescriptor {
        self.get(state)
            .cloned()
            .unwrap_or_else(|| StateDescriptor::new(state))
    }

    /// Iterates descriptors in state order.
    pub fn iter(&self) -> impl Iterator<Item = &StateDescriptor> {
        self.descriptors.values()
    }

    /// Checks the table is total and the pseudo-states carry no behavior.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        let missing: Vec<JobState> = JobState::ALL
            .iter()
            .copied()
            .filter(|state| !self.descriptors.contains_key(state))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineValidationError::new("State table has no entry for some states")
                .with_states(missing));
        }

        let active_pseudo: Vec<JobState> = self
            .iter()
            .filter(|d| d.state.is_pseudo_state())
            .filter(|d| d.critical || d.retries > 0 || d.runs_only_on_fatal_abort)
            .map(|d| d.state)
            .collect();
        if !active_pseudo.is_empty() {
            return Err(PipelineValidationError::new(
                "READY and DONE must not be critical, retried or conditional",
            )
            .with_states(active_pseudo));
        }

        let mismatched: Vec<JobState> = self
            .descriptors
            .iter()
            .filter(|(state, d)| **state != d.state)
            .map(|(state, _)| *state)
            .collect();
        if !mismatched.is_empty() {
            return Err(PipelineValidationError::new("Descriptor filed under the wrong state")
                .with_states(mismatched));
        }

        Ok(())
    }
}
