//! Interfaces the agent manager consumes: agent backends and the wall clock.

use async_trait::async_trait;
use chrono::Datelike;
use std::sync::Weak;
use std::time::{Duration, Instant};
use voxkit_types::agent::{GeneralAction, GeneralEvent};

use super::ManagerInner;

/// A conversational agent implementation.
///
/// `apply` performs one lifecycle action and returns the matching event.
/// It must honor `deadline`; the manager gives up on it when the deadline
/// passes regardless.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, action: GeneralAction, deadline: Instant) -> Result<GeneralEvent, String>;

    /// Receive the channel for pushing status and text back to the manager.
    /// Called once when the backend is registered.
    fn attach(&self, _notifier: AgentNotifier) {}

    async fn interrupt_speaking(&self) -> Result<(), String> {
        Ok(())
    }

    async fn start_listening(&self) -> Result<(), String> {
        Ok(())
    }

    async fn stop_listening(&self) -> Result<(), String> {
        Ok(())
    }

    async fn suspend(&self) -> Result<(), String> {
        Ok(())
    }

    async fn resume(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Asynchronous notifications pushed by a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendSignal {
    Speaking(bool),
    Listening(bool),
    AgentText(String),
    UserText(String),
    Emote(String),
}

/// Handle a backend uses to push notifications. Signals from an agent that
/// is not the active one are discarded.
#[derive(Clone)]
pub struct AgentNotifier {
    agent: String,
    manager: Weak<ManagerInner>,
}

impl AgentNotifier {
    pub(super) fn new(agent: &str, manager: Weak<ManagerInner>) -> Self {
        Self {
            agent: agent.to_string(),
            manager,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn signal(&self, signal: BackendSignal) {
        if let Some(manager) = self.manager.upgrade() {
            manager.handle_signal(&self.agent, signal);
        }
    }

    pub fn speaking_changed(&self, speaking: bool) {
        self.signal(BackendSignal::Speaking(speaking));
    }

    pub fn listening_changed(&self, listening: bool) {
        self.signal(BackendSignal::Listening(listening));
    }

    pub fn agent_text(&self, text: impl Into<String>) {
        self.signal(BackendSignal::AgentText(text.into()));
    }

    pub fn user_text(&self, text: impl Into<String>) {
        self.signal(BackendSignal::UserText(text.into()));
    }

    pub fn emote(&self, emote: impl Into<String>) {
        self.signal(BackendSignal::Emote(emote.into()));
    }
}

impl std::fmt::Debug for AgentNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentNotifier")
            .field("agent", &self.agent)
            .finish()
    }
}

/// Source of wall-clock synchronization for agents that need it.
#[async_trait]
pub trait TimeSource: Send + Sync {
    fn is_synced(&self) -> bool;

    /// Wait until the clock is synced or `deadline` passes.
    async fn sync(&self, deadline: Instant) -> Result<(), String>;
}

/// Treats the system clock as synced once it reports a plausible date.
/// Devices without an RTC boot at the epoch until NTP corrects them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

const SYNCED_AFTER_YEAR: i32 = 2024;
const SYNC_POLL: Duration = Duration::from_millis(50);

#[async_trait]
impl TimeSource for SystemClock {
    fn is_synced(&self) -> bool {
        chrono::Utc::now().year() >= SYNCED_AFTER_YEAR
    }

    async fn sync(&self, deadline: Instant) -> Result<(), String> {
        loop {
            if self.is_synced() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err("system clock not synchronized".to_string());
            }
            tokio::time::sleep(SYNC_POLL.min(deadline - now)).await;
        }
    }
}
