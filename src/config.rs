//! Scheduler configuration
//!
//! The configuration is the external collaborator that selects how each
//! scheduler context behaves: whether task names are retained, how runaway
//! task detection reacts, whether uncaught-error handlers are consulted, and
//! which concrete tick-source variants a host binding should prefer. The core
//! consumes these values once, at context construction, and exposes read-only
//! accessors mirroring each of them.

use anyhow::{bail, Context as _};
use serde::{Deserialize, Serialize};
use std::env;

/// Deployment mode, affecting default diagnostics verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Environment {
    /// Names and uncaught-error handlers enabled by default.
    #[default]
    Development,
    /// Lean defaults: no names, no handler dispatch.
    Production,
}

impl Environment {
    /// True in development mode.
    #[inline]
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    /// True in production mode.
    #[inline]
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Scheduler configuration.
///
/// `Default` yields the development profile. Builder-style `with_*` setters
/// override individual options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Deployment mode.
    pub environment: Environment,
    /// Whether task and VPU names are retained for diagnostics.
    pub enable_names: bool,
    /// Drop tasks enqueued after runaway detection instead of deferring them.
    pub purge_tasks_when_runaway_detected: bool,
    /// Number of reentrant enqueues tolerated within a single flush.
    pub runaway_threshold: usize,
    /// Whether uncaught-error handlers are dispatched at all.
    pub enable_uncaught_error_handlers: bool,
    /// Hint for host bindings: schedule macro tasks via a message channel.
    pub use_message_channel_to_schedule_tasks: bool,
    /// Hint for host bindings: run delayed-task timers on a dedicated worker.
    pub use_worker_to_schedule_delayed_tasks: bool,
    /// Emit trace logging for timer/worker interactions.
    pub log_worker_interactions: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl SchedulerConfig {
    /// Development profile: names and uncaught-error handlers enabled.
    pub fn development() -> Self {
        Self::for_environment(Environment::Development)
    }

    /// Production profile: names and uncaught-error handlers disabled.
    pub fn production() -> Self {
        Self::for_environment(Environment::Production)
    }

    /// Profile defaults for the given environment.
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            enable_names: environment.is_development(),
            purge_tasks_when_runaway_detected: true,
            runaway_threshold: 100,
            enable_uncaught_error_handlers: environment.is_development(),
            use_message_channel_to_schedule_tasks: true,
            use_worker_to_schedule_delayed_tasks: true,
            log_worker_interactions: false,
        }
    }

    /// Load configuration from `TICKLINE_*` environment variables, starting
    /// from the profile selected by `TICKLINE_ENVIRONMENT` (defaults to
    /// development).
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = match env::var("TICKLINE_ENVIRONMENT") {
            Ok(value) => match value.as_str() {
                "development" => Environment::Development,
                "production" => Environment::Production,
                other => bail!("invalid TICKLINE_ENVIRONMENT value: {other:?}"),
            },
            Err(_) => Environment::default(),
        };
        let mut config = Self::for_environment(environment);
        config.enable_names = env_bool("TICKLINE_ENABLE_NAMES", config.enable_names)?;
        config.purge_tasks_when_runaway_detected = env_bool(
            "TICKLINE_PURGE_TASKS_WHEN_RUNAWAY_DETECTED",
            config.purge_tasks_when_runaway_detected,
        )?;
        if let Ok(value) = env::var("TICKLINE_RUNAWAY_THRESHOLD") {
            config.runaway_threshold = value
                .parse()
                .with_context(|| format!("invalid TICKLINE_RUNAWAY_THRESHOLD value: {value:?}"))?;
        }
        config.enable_uncaught_error_handlers = env_bool(
            "TICKLINE_ENABLE_UNCAUGHT_ERROR_HANDLERS",
            config.enable_uncaught_error_handlers,
        )?;
        config.use_message_channel_to_schedule_tasks = env_bool(
            "TICKLINE_USE_MESSAGE_CHANNEL_TO_SCHEDULE_TASKS",
            config.use_message_channel_to_schedule_tasks,
        )?;
        config.use_worker_to_schedule_delayed_tasks = env_bool(
            "TICKLINE_USE_WORKER_TO_SCHEDULE_DELAYED_TASKS",
            config.use_worker_to_schedule_delayed_tasks,
        )?;
        config.log_worker_interactions = env_bool(
            "TICKLINE_LOG_WORKER_INTERACTIONS",
            config.log_worker_interactions,
        )?;
        Ok(config)
    }

    /// Override the environment.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Override name retention.
    pub fn with_names(mut self, enable: bool) -> Self {
        self.enable_names = enable;
        self
    }

    /// Override the runaway purge policy.
    pub fn with_purge_on_runaway(mut self, purge: bool) -> Self {
        self.purge_tasks_when_runaway_detected = purge;
        self
    }

    /// Override the runaway threshold.
    pub fn with_runaway_threshold(mut self, threshold: usize) -> Self {
        self.runaway_threshold = threshold;
        self
    }

    /// Override uncaught-error handler dispatch.
    pub fn with_uncaught_error_handlers(mut self, enable: bool) -> Self {
        self.enable_uncaught_error_handlers = enable;
        self
    }
}

fn env_bool(key: &str, default: bool) -> anyhow::Result<bool> {
    match env::var(key) {
        Ok(value) => match value.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => bail!("invalid {key} value: {other:?}"),
        },
        Err(_) => Ok(default),
    }
}
