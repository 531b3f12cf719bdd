//! Execution configuration.
//!
//! Loaded from JSON or from the environment (a `.env` file is honoured when
//! present). Values override the defaults of the state table and the retry
//! policy; they are read once when the state machine is built.

use crate::core::JobState;
use crate::errors::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

/// Prefix shared by every environment variable read by [`ExecutionConfig::from_env`].
pub const ENV_PREFIX: &str = "JOBFLOW_";

static DOTENV_LOADED: OnceLock<()> = OnceLock::new();

/// Tunables for a job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Increment added to the backoff delay on every retry, in milliseconds.
    #[serde(default = "default_retry_delay_step_ms")]
    pub retry_delay_step_ms: u64,
    /// Upper bound for a single backoff delay, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_delay_ms: Option<u64>,
    /// Per-state retry counts overriding the state table.
    #[serde(default)]
    pub state_retries: BTreeMap<JobState, u32>,
}

const fn default_retry_delay_step_ms() -> u64 {
    250
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            retry_delay_step_ms: default_retry_delay_step_ms(),
            max_retry_delay_ms: None,
            state_retries: BTreeMap::new(),
        }
    }
}

impl ExecutionConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backoff step.
    #[must_use]
    pub fn with_retry_delay_step_ms(mut self, step_ms: u64) -> Self {
        self.retry_delay_step_ms = step_ms;
        self
    }

    /// Caps a single backoff delay.
    #[must_use]
    pub fn with_max_retry_delay_ms(mut self, max_ms: u64) -> Self {
        self.max_retry_delay_ms = Some(max_ms);
        self
    }

    /// Overrides the retry count of one state.
    #[must_use]
    pub fn with_state_retries(mut self, state: JobState, retries: u32) -> Self {
        self.state_retries.insert(state, retries);
        self
    }

    /// The backoff step as a duration.
    #[must_use]
    pub const fn retry_delay_step(&self) -> Duration {
        Duration::from_millis(self.retry_delay_step_ms)
    }

    /// Parses a JSON document.
    pub fn from_json(json: &str) -> Result<Self, AgentError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the configuration from `JOBFLOW_*` environment variables.
    ///
    /// Recognised variables are `JOBFLOW_RETRY_DELAY_MS`,
    /// `JOBFLOW_MAX_RETRY_DELAY_MS` and `JOBFLOW_RETRIES_<STATE>`.
    pub fn from_env() -> Result<Self, AgentError> {
        DOTENV_LOADED.get_or_init(|| {
            // A missing .env file is not an error.
            let _ = dotenvy::dotenv();
        });
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(&format!("{ENV_PREFIX}RETRY_DELAY_MS")) {
            config.retry_delay_step_ms = parse_var("RETRY_DELAY_MS", &value)?;
        }

        if let Some(value) = lookup(&format!("{ENV_PREFIX}MAX_RETRY_DELAY_MS")) {
            config.max_retry_delay_ms = Some(parse_var("MAX_RETRY_DELAY_MS", &value)?);
        }

        for state in JobState::PIPELINE {
            let name = format!("RETRIES_{state}");
            if let Some(value) = lookup(&format!("{ENV_PREFIX}{name}")) {
                config.state_retries.insert(state, parse_var(&name, &value)?);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the values are usable.
    pub fn validate(&self) -> Result<(), AgentError> {
        if let Some(state) = self
            .state_retries
            .keys()
            .find(|state| state.is_pseudo_state())
        {
            return Err(AgentError::Config(format!(
                "State {state} has no stage and cannot be retried"
            )));
        }

        if let Some(max) = self.max_retry_delay_ms {
            if max < self.retry_delay_step_ms {
                return Err(AgentError::Config(format!(
                    "max_retry_delay_ms ({max}) is smaller than retry_delay_step_ms ({})",
                    self.retry_delay_step_ms
                )));
            }
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, AgentError> {
    value.trim().parse().map_err(|_| {
        AgentError::Config(format!("Invalid value for {ENV_PREFIX}{name}: '{value}'"))
    })
}
