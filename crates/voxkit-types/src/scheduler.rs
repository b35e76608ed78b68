//! Job identity and health types for the task scheduler.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl JobId {
    pub fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// How a job is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobMode {
    /// Runs once, then discarded.
    Once,
    /// Re-enqueued no sooner than `interval` after each execution started.
    Periodic {
        #[serde(with = "crate::serde_compat::duration_ms")]
        interval: Duration,
    },
}

impl JobMode {
    pub fn is_periodic(&self) -> bool {
        matches!(self, JobMode::Periodic { .. })
    }
}

/// Health report from the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerHealth {
    pub workers: usize,
    pub is_shutting_down: bool,
    /// Jobs waiting in the ready queue.
    pub queued: usize,
    /// Periodic jobs waiting for their restart timer.
    pub waiting_timers: usize,
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub rescheduled: u64,
}
