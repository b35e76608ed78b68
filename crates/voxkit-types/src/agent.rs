//! Agent lifecycle vocabulary and per-agent attributes.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ServiceError;

/// Generate `Display`, `FromStr` and `ALL` for a fieldless enum whose wire
/// names equal the variant names.
macro_rules! named_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $ty {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// Wire name of this variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => stringify!($variant)),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ServiceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok($ty::$variant),)+
                    other => Err(ServiceError::InvalidArgument(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

/// Lifecycle state of the active agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeneralState {
    TimeSyncing,
    Ready,
    Activating,
    Activated,
    Starting,
    Started,
    Sleeping,
    Slept,
    WakingUp,
    Stopping,
}

named_enum!(GeneralState {
    TimeSyncing,
    Ready,
    Activating,
    Activated,
    Starting,
    Started,
    Sleeping,
    Slept,
    WakingUp,
    Stopping,
});

/// A request to move the lifecycle forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeneralAction {
    TimeSync,
    Activate,
    Start,
    Sleep,
    WakeUp,
    Stop,
}

named_enum!(GeneralAction {
    TimeSync,
    Activate,
    Start,
    Sleep,
    WakeUp,
    Stop,
});

/// Completion notification for a `GeneralAction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeneralEvent {
    TimeSynced,
    Activated,
    Started,
    Slept,
    Awake,
    Stopped,
}

named_enum!(GeneralEvent {
    TimeSynced,
    Activated,
    Started,
    Slept,
    Awake,
    Stopped,
});

/// How listening is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChatMode {
    /// Listening starts automatically.
    #[default]
    RealTime,
    /// Listening must be started and stopped explicitly.
    Manual,
}

named_enum!(ChatMode { RealTime, Manual });

/// Optional agent functions that a backend may or may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentGeneralFunction {
    InterruptSpeaking,
    ManualStartListening,
    ManualStopListening,
}

named_enum!(AgentGeneralFunction {
    InterruptSpeaking,
    ManualStartListening,
    ManualStopListening,
});

/// Optional agent notifications that a backend may or may not produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentGeneralEvent {
    SpeakingStatusChanged,
    ListeningStatusChanged,
    AgentSpeakingTextGot,
    UserSpeakingTextGot,
    EmoteGot,
}

named_enum!(AgentGeneralEvent {
    SpeakingStatusChanged,
    ListeningStatusChanged,
    AgentSpeakingTextGot,
    UserSpeakingTextGot,
    EmoteGot,
});

const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 1000;

fn default_operation_timeout() -> Duration {
    Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS)
}

/// Per-action deadlines for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentOperationTimeout {
    #[serde(with = "crate::serde_compat::duration_ms")]
    pub activate: Duration,
    #[serde(with = "crate::serde_compat::duration_ms")]
    pub start: Duration,
    #[serde(with = "crate::serde_compat::duration_ms")]
    pub sleep: Duration,
    #[serde(with = "crate::serde_compat::duration_ms")]
    pub wake_up: Duration,
    #[serde(with = "crate::serde_compat::duration_ms")]
    pub stop: Duration,
}

impl Default for AgentOperationTimeout {
    fn default() -> Self {
        Self {
            activate: default_operation_timeout(),
            start: default_operation_timeout(),
            sleep: default_operation_timeout(),
            wake_up: default_operation_timeout(),
            stop: default_operation_timeout(),
        }
    }
}

impl AgentOperationTimeout {
    /// The deadline for `action`. `TimeSync` is not agent-specific and has
    /// no entry here.
    pub fn for_action(&self, action: GeneralAction) -> Option<Duration> {
        match action {
            GeneralAction::TimeSync => None,
            GeneralAction::Activate => Some(self.activate),
            GeneralAction::Start => Some(self.start),
            GeneralAction::Sleep => Some(self.sleep),
            GeneralAction::WakeUp => Some(self.wake_up),
            GeneralAction::Stop => Some(self.stop),
        }
    }
}

/// Registration record for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAttributes {
    pub name: String,
    #[serde(default)]
    pub operation_timeout: AgentOperationTimeout,
    #[serde(default)]
    pub general_functions: Vec<AgentGeneralFunction>,
    #[serde(default)]
    pub general_events: Vec<AgentGeneralEvent>,
    #[serde(default)]
    pub require_time_sync: bool,
}

impl AgentAttributes {
    /// Attributes with default timeouts and no optional capabilities.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            operation_timeout: AgentOperationTimeout::default(),
            general_functions: Vec::new(),
            general_events: Vec::new(),
            require_time_sync: false,
        }
    }

    pub fn supports_function(&self, function: AgentGeneralFunction) -> bool {
        self.general_functions.contains(&function)
    }

    pub fn supports_event(&self, event: AgentGeneralEvent) -> bool {
        self.general_events.contains(&event)
    }
}
