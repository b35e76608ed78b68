//! An in-process agent backend that answers every action after a short delay
//! and echoes canned speech back through its notifier.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use voxkit_kernel::agent_manager::lifecycle::event_for;
use voxkit_kernel::agent_manager::{AgentBackend, AgentNotifier};
use voxkit_types::agent::{
    AgentAttributes, AgentGeneralEvent, AgentGeneralFunction, GeneralAction, GeneralEvent,
};

pub const NAME: &str = "loopback";

const LATENCY: Duration = Duration::from_millis(20);

#[derive(Default)]
pub struct LoopbackBackend {
    notifier: Mutex<Option<AgentNotifier>>,
}

impl LoopbackBackend {
    /// Attributes declaring every optional function and event.
    pub fn attributes() -> AgentAttributes {
        let mut attrs = AgentAttributes::new(NAME);
        attrs.general_functions = AgentGeneralFunction::ALL.to_vec();
        attrs.general_events = AgentGeneralEvent::ALL.to_vec();
        attrs
    }

    fn notify(&self, f: impl FnOnce(&AgentNotifier)) {
        let notifier = match self.notifier.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(notifier) = notifier {
            f(&notifier);
        }
    }
}

#[async_trait]
impl AgentBackend for LoopbackBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn apply(&self, action: GeneralAction, deadline: Instant) -> Result<GeneralEvent, String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(LATENCY.min(remaining)).await;
        if action == GeneralAction::Start {
            self.notify(|n| {
                n.speaking_changed(true);
                n.agent_text("Hello, I am listening.");
                n.emote("smile");
                n.speaking_changed(false);
            });
        }
        Ok(event_for(action))
    }

    fn attach(&self, notifier: AgentNotifier) {
        match self.notifier.lock() {
            Ok(mut slot) => *slot = Some(notifier),
            Err(poisoned) => *poisoned.into_inner() = Some(notifier),
        }
    }

    async fn interrupt_speaking(&self) -> Result<(), String> {
        self.notify(|n| n.speaking_changed(false));
        Ok(())
    }

    async fn start_listening(&self) -> Result<(), String> {
        self.notify(|n| {
            n.listening_changed(true);
            n.user_text("What time is it?");
        });
        Ok(())
    }

    async fn stop_listening(&self) -> Result<(), String> {
        self.notify(|n| n.listening_changed(false));
        Ok(())
    }
}
