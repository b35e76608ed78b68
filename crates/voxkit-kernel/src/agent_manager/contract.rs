//! Function and event contract of the agent manager service.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use voxkit_types::agent::{AgentAttributes, ChatMode, GeneralAction};
use voxkit_types::error::{ServiceError, ServiceResult};
use voxkit_types::schema::{EventSchema, FunctionSchema, ItemSchema, ParameterSchema};
use voxkit_types::value::{TypedValue, ValueMap, ValueType};

use super::{ManagerInner, TRANSITION_WAIT_MARGIN};
use crate::service::{handler, Handler, ServiceContractBuilder};

/// Function names.
pub mod function {
    pub const SET_AGENT_INFO: &str = "SetAgentInfo";
    pub const SET_CHAT_MODE: &str = "SetChatMode";
    pub const GET_CHAT_MODE: &str = "GetChatMode";
    pub const ACTIVATE_AGENT: &str = "ActivateAgent";
    pub const GET_AGENT_ATTRIBUTES: &str = "GetAgentAttributes";
    pub const GET_ACTIVE_AGENT: &str = "GetActiveAgent";
    pub const TRIGGER_GENERAL_ACTION: &str = "TriggerGeneralAction";
    pub const SUSPEND: &str = "Suspend";
    pub const RESUME: &str = "Resume";
    pub const INTERRUPT_SPEAKING: &str = "InterruptSpeaking";
    pub const MANUAL_START_LISTENING: &str = "ManualStartListening";
    pub const MANUAL_STOP_LISTENING: &str = "ManualStopListening";
    pub const GET_GENERAL_STATE: &str = "GetGeneralState";
    pub const GET_SUSPEND_STATUS: &str = "GetSuspendStatus";
    pub const GET_SPEAKING_STATUS: &str = "GetSpeakingStatus";
    pub const GET_LISTENING_STATUS: &str = "GetListeningStatus";
    pub const RESET_DATA: &str = "ResetData";
}

/// Event names.
pub mod event {
    pub const GENERAL_ACTION_TRIGGERED: &str = "GeneralActionTriggered";
    pub const GENERAL_EVENT_HAPPENED: &str = "GeneralEventHappened";
    pub const SUSPEND_STATUS_CHANGED: &str = "SuspendStatusChanged";
    pub const SPEAKING_STATUS_CHANGED: &str = "SpeakingStatusChanged";
    pub const LISTENING_STATUS_CHANGED: &str = "ListeningStatusChanged";
    pub const AGENT_SPEAKING_TEXT_GOT: &str = "AgentSpeakingTextGot";
    pub const USER_SPEAKING_TEXT_GOT: &str = "UserSpeakingTextGot";
    pub const EMOTE_GOT: &str = "EmoteGot";
}

/// Parameter and item names.
pub mod field {
    pub const INFO: &str = "Info";
    pub const MODE: &str = "Mode";
    pub const NAME: &str = "Name";
    pub const ACTION: &str = "Action";
    pub const EVENT: &str = "Event";
    pub const IS_UNEXPECTED: &str = "IsUnexpected";
    pub const STATUS: &str = "Status";
    pub const TEXT: &str = "Text";
    pub const EMOTE: &str = "Emote";
}

pub fn function_schemas() -> Vec<FunctionSchema> {
    use function::*;
    vec![
        FunctionSchema::new(SET_AGENT_INFO, "Register or replace an agent's attributes")
            .param(ParameterSchema::required(
                field::INFO,
                "Agent attributes: name, operation_timeout (ms per action), general_functions, general_events, require_time_sync",
                ValueType::Object,
            )),
        FunctionSchema::new(SET_CHAT_MODE, "Set how listening is started")
            .param(ParameterSchema::required(
                field::MODE,
                "One of: RealTime, Manual",
                ValueType::String,
            )),
        FunctionSchema::new(GET_CHAT_MODE, "Current chat mode"),
        FunctionSchema::new(
            ACTIVATE_AGENT,
            "Select the active agent; an empty name re-selects the last active agent",
        )
        .param(ParameterSchema::optional(
            field::NAME,
            "Agent name",
            ValueType::String,
            "",
        ))
        .scheduled(),
        FunctionSchema::new(
            GET_AGENT_ATTRIBUTES,
            "Attributes of one agent, or of all agents when the name is empty",
        )
        .param(ParameterSchema::optional(
            field::NAME,
            "Agent name",
            ValueType::String,
            "",
        )),
        FunctionSchema::new(GET_ACTIVE_AGENT, "Name of the active agent, empty if none"),
        FunctionSchema::new(TRIGGER_GENERAL_ACTION, "Drive the agent lifecycle")
            .param(ParameterSchema::required(
                field::ACTION,
                "One of: TimeSync, Activate, Start, Sleep, WakeUp, Stop",
                ValueType::String,
            ))
            .scheduled(),
        FunctionSchema::new(SUSPEND, "Pause speaking and listening without leaving the current state")
            .scheduled(),
        FunctionSchema::new(RESUME, "Undo Suspend").scheduled(),
        FunctionSchema::new(INTERRUPT_SPEAKING, "Cut the agent off mid-utterance").scheduled(),
        FunctionSchema::new(MANUAL_START_LISTENING, "Start listening (Manual chat mode only)")
            .scheduled(),
        FunctionSchema::new(MANUAL_STOP_LISTENING, "Stop listening (Manual chat mode only)")
            .scheduled(),
        FunctionSchema::new(GET_GENERAL_STATE, "Current lifecycle state"),
        FunctionSchema::new(GET_SUSPEND_STATUS, "Whether the agent is suspended"),
        FunctionSchema::new(GET_SPEAKING_STATUS, "Whether the agent is speaking"),
        FunctionSchema::new(GET_LISTENING_STATUS, "Whether the agent is listening"),
        FunctionSchema::new(RESET_DATA, "Forget every registered agent and return to the initial state")
            .scheduled(),
    ]
}

pub fn event_schemas() -> Vec<EventSchema> {
    use event::*;
    let status = |name: &str, description: &str| {
        EventSchema::new(name, description).item(ItemSchema::new(
            field::STATUS,
            "New status",
            ValueType::Boolean,
        ))
    };
    let text = |name: &str, description: &str| {
        EventSchema::new(name, description).item(ItemSchema::new(
            field::TEXT,
            "Recognized text",
            ValueType::String,
        ))
    };
    vec![
        EventSchema::new(GENERAL_ACTION_TRIGGERED, "A lifecycle action was accepted").item(
            ItemSchema::new(field::ACTION, "The action", ValueType::String),
        ),
        EventSchema::new(GENERAL_EVENT_HAPPENED, "A lifecycle action finished")
            .item(ItemSchema::new(field::EVENT, "The lifecycle event", ValueType::String))
            .item(ItemSchema::new(
                field::IS_UNEXPECTED,
                "Set when the action failed, timed out or was refused",
                ValueType::Boolean,
            )),
        status(SUSPEND_STATUS_CHANGED, "Suspend flag changed"),
        status(SPEAKING_STATUS_CHANGED, "Agent started or stopped speaking"),
        status(LISTENING_STATUS_CHANGED, "Agent started or stopped listening"),
        text(AGENT_SPEAKING_TEXT_GOT, "Text the agent is speaking"),
        text(USER_SPEAKING_TEXT_GOT, "Text recognized from the user"),
        EventSchema::new(EMOTE_GOT, "Emote requested by the agent").item(ItemSchema::new(
            field::EMOTE,
            "Emote name",
            ValueType::String,
        )),
    ]
}

fn string_param(params: &ValueMap, name: &str) -> ServiceResult<String> {
    params
        .get(name)
        .and_then(TypedValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| ServiceError::InvalidArgument(format!("parameter '{name}' must be a string")))
}

/// Decode an `Info` object into attributes.
pub fn attributes_from_value(value: &TypedValue) -> ServiceResult<AgentAttributes> {
    let attrs: AgentAttributes = serde_json::from_value(value.to_json())
        .map_err(|e| ServiceError::InvalidArgument(format!("invalid agent info: {e}")))?;
    if attrs.name.trim().is_empty() {
        return Err(ServiceError::InvalidArgument("agent name must not be empty".to_string()));
    }
    Ok(attrs)
}

/// Encode attributes as an `Object` value.
pub fn attributes_to_value(attrs: &AgentAttributes) -> ServiceResult<TypedValue> {
    let json = serde_json::to_value(attrs).map_err(|e| ServiceError::Internal(e.to_string()))?;
    TypedValue::from_json(&json)
}

fn bound<F, Fut>(inner: &Arc<ManagerInner>, f: F) -> Handler
where
    F: Fn(Arc<ManagerInner>, ValueMap) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServiceResult<Option<TypedValue>>> + Send + 'static,
{
    let inner = inner.clone();
    handler(move |params| f(inner.clone(), params))
}

fn handler_for(name: &str, inner: &Arc<ManagerInner>) -> Option<Handler> {
    use function::*;
    let h = match name {
        SET_AGENT_INFO => bound(inner, |m, p| async move {
            let info = p
                .get(field::INFO)
                .ok_or_else(|| ServiceError::InvalidArgument("missing Info".to_string()))?;
            m.set_agent_info(attributes_from_value(info)?);
            Ok(None)
        }),
        SET_CHAT_MODE => bound(inner, |m, p| async move {
            let mode: ChatMode = string_param(&p, field::MODE)?.parse()?;
            m.set_chat_mode(mode);
            Ok(None)
        }),
        GET_CHAT_MODE => bound(inner, |m, _p| async move {
            Ok(Some(TypedValue::from(m.chat_mode().as_str())))
        }),
        ACTIVATE_AGENT => bound(inner, |m, p| async move {
            let name = string_param(&p, field::NAME)?;
            m.activate_agent(&name).await?;
            Ok(None)
        }),
        GET_AGENT_ATTRIBUTES => bound(inner, |m, p| async move {
            let name = string_param(&p, field::NAME)?;
            if name.is_empty() {
                let all = m
                    .all_attributes()
                    .iter()
                    .map(attributes_to_value)
                    .collect::<ServiceResult<Vec<_>>>()?;
                Ok(Some(TypedValue::Array(all)))
            } else {
                Ok(Some(attributes_to_value(&m.attributes(&name)?)?))
            }
        }),
        GET_ACTIVE_AGENT => bound(inner, |m, _p| async move {
            Ok(Some(TypedValue::from(m.active_agent().unwrap_or_default())))
        }),
        TRIGGER_GENERAL_ACTION => bound(inner, |m, p| async move {
            let action: GeneralAction = string_param(&p, field::ACTION)?.parse()?;
            let event = m.trigger(action).await?;
            Ok(Some(TypedValue::from(event.as_str())))
        }),
        SUSPEND => bound(inner, |m, _p| async move {
            m.suspend().await?;
            Ok(None)
        }),
        RESUME => bound(inner, |m, _p| async move {
            m.resume().await?;
            Ok(None)
        }),
        INTERRUPT_SPEAKING => bound(inner, |m, _p| async move {
            m.interrupt_speaking().await?;
            Ok(None)
        }),
        MANUAL_START_LISTENING => bound(inner, |m, _p| async move {
            m.manual_listening(true).await?;
            Ok(None)
        }),
        MANUAL_STOP_LISTENING => bound(inner, |m, _p| async move {
            m.manual_listening(false).await?;
            Ok(None)
        }),
        GET_GENERAL_STATE => bound(inner, |m, _p| async move {
            Ok(Some(TypedValue::from(m.general_state().as_str())))
        }),
        GET_SUSPEND_STATUS => bound(inner, |m, _p| async move {
            Ok(Some(TypedValue::from(m.is_suspended())))
        }),
        GET_SPEAKING_STATUS => bound(inner, |m, _p| async move {
            Ok(Some(TypedValue::from(m.is_speaking())))
        }),
        GET_LISTENING_STATUS => bound(inner, |m, _p| async move {
            Ok(Some(TypedValue::from(m.is_listening())))
        }),
        RESET_DATA => bound(inner, |m, _p| async move {
            m.reset_data().await;
            Ok(None)
        }),
        _ => return None,
    };
    Some(h)
}

/// How long a caller waits for `TriggerGeneralAction`: the action's own
/// deadline for the active agent plus queueing margin.
fn transition_wait(inner: &ManagerInner, params: &ValueMap) -> Option<Duration> {
    let action: GeneralAction = params.get(field::ACTION)?.as_str()?.parse().ok()?;
    inner
        .action_timeout(action)
        .map(|timeout| timeout + TRANSITION_WAIT_MARGIN)
}

/// Attach a handler to every function schema.
pub(super) fn bind(
    mut builder: ServiceContractBuilder,
    inner: &Arc<ManagerInner>,
) -> ServiceContractBuilder {
    for schema in function_schemas() {
        if let Some(h) = handler_for(&schema.name, inner) {
            builder = builder.function(schema, h);
        }
    }
    let waiter = inner.clone();
    builder.timeout_for(function::TRIGGER_GENERAL_ACTION, move |params| {
        transition_wait(&waiter, params)
    })
}
