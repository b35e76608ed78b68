//! Runtime configuration types.
//!
//! Every section carries `#[serde(default)]` so a partial TOML file (or no
//! file at all) yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::agent::ChatMode;
use crate::error::ConfigError;

/// Smallest stack handed to a worker thread, whatever the config says.
pub const MIN_WORKER_STACK_SIZE: usize = 128 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    pub scheduler: SchedulerConfig,
    pub agent_manager: AgentManagerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            scheduler: SchedulerConfig::default(),
            agent_manager: AgentManagerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Reject configurations the runtime cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        if self.agent_manager.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "agent_manager.event_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One worker loop of the task scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    /// Stack budget in bytes.
    #[serde(default = "default_stack_size")]
    pub stack_size: usize,
}

impl WorkerConfig {
    pub fn new(name: &str, stack_size: usize) -> Self {
        Self {
            name: name.to_string(),
            stack_size,
        }
    }
}

fn default_stack_size() -> usize {
    512 * 1024
}

/// Task scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often an idle worker re-checks the queue and its restart timers.
    pub poll_interval_ms: u64,
    pub workers: Vec<WorkerConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            workers: vec![
                WorkerConfig::new("worker-0", default_stack_size()),
                WorkerConfig::new("worker-1", default_stack_size()),
            ],
        }
    }
}

impl SchedulerConfig {
    /// A config with `count` identically sized workers.
    pub fn with_workers(count: usize, poll_interval_ms: u64) -> Self {
        Self {
            poll_interval_ms,
            workers: (0..count)
                .map(|i| WorkerConfig::new(&format!("worker-{i}"), default_stack_size()))
                .collect(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.is_empty() {
            return Err(ConfigError::Invalid(
                "scheduler.workers must list at least one worker".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Agent manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentManagerConfig {
    pub default_chat_mode: ChatMode,
    /// Bound for scheduled calls when the caller gives no timeout.
    pub call_timeout_ms: u64,
    /// Deadline of the TimeSync action.
    pub time_sync_timeout_ms: u64,
    /// Restart interval of the time-sync probe job.
    pub time_sync_check_interval_ms: u64,
    /// Per-subscriber hand-off capacity.
    pub event_buffer: usize,
    /// Occurrences retained in the event history.
    pub event_history: usize,
}

impl Default for AgentManagerConfig {
    fn default() -> Self {
        Self {
            default_chat_mode: ChatMode::RealTime,
            call_timeout_ms: 10_000,
            time_sync_timeout_ms: 1_000,
            time_sync_check_interval_ms: 1_000,
            event_buffer: 64,
            event_history: 256,
        }
    }
}

impl AgentManagerConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn time_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.time_sync_timeout_ms)
    }

    pub fn time_sync_check_interval(&self) -> Duration {
        Duration::from_millis(self.time_sync_check_interval_ms)
    }
}
