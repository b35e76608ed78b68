//! Function and event contract descriptors.
//!
//! Schemas are plain data assembled by hand when a service is built; they are
//! read-only afterwards and can be serialized for introspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, ServiceError};
use crate::value::{TypedValue, ValueMap, ValueType};

/// Declaration of one function parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// A parameter without a default is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<TypedValue>,
}

impl ParameterSchema {
    /// A required parameter.
    pub fn required(name: &str, description: &str, value_type: ValueType) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            value_type,
            default: None,
        }
    }

    /// An optional parameter filled from `default` when absent.
    pub fn optional(
        name: &str,
        description: &str,
        value_type: ValueType,
        default: impl Into<TypedValue>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            value_type,
            default: Some(default.into()),
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Declaration of one event item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSchema {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

impl ItemSchema {
    pub fn new(name: &str, description: &str, value_type: ValueType) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            value_type,
        }
    }
}

/// Declaration of a callable function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSchema>,
    /// When set, invocations run on the task scheduler instead of inline.
    pub require_scheduling: bool,
}

impl FunctionSchema {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
            require_scheduling: false,
        }
    }

    pub fn param(mut self, parameter: ParameterSchema) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn scheduled(mut self) -> Self {
        self.require_scheduling = true;
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSchema> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Declaration of an emittable event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSchema {
    pub name: String,
    pub description: String,
    pub items: Vec<ItemSchema>,
    pub require_scheduling: bool,
}

impl EventSchema {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            items: Vec::new(),
            require_scheduling: false,
        }
    }

    pub fn item(mut self, item: ItemSchema) -> Self {
        self.items.push(item);
        self
    }

    pub fn scheduled(mut self) -> Self {
        self.require_scheduling = true;
        self
    }
}

/// Outcome of a function call. Every call yields one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<TypedValue>,
}

impl FunctionResult {
    /// A successful result without payload.
    pub fn ok() -> Self {
        Self {
            success: true,
            error_kind: None,
            error_message: None,
            data: None,
        }
    }

    /// A successful result carrying `data`.
    pub fn with_data(data: impl Into<TypedValue>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::ok()
        }
    }

    /// A failed result built from a service error.
    pub fn from_error(err: &ServiceError) -> Self {
        Self {
            success: false,
            error_kind: Some(err.kind()),
            error_message: Some(err.to_string()),
            data: None,
        }
    }

    /// Whether the optional payload is present.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

impl From<Result<Option<TypedValue>, ServiceError>> for FunctionResult {
    fn from(result: Result<Option<TypedValue>, ServiceError>) -> Self {
        match result {
            Ok(Some(data)) => FunctionResult::with_data(data),
            Ok(None) => FunctionResult::ok(),
            Err(e) => FunctionResult::from_error(&e),
        }
    }
}

/// Unique identifier for an event occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One validated emission of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOccurrence {
    pub id: EventId,
    pub service: String,
    pub event: String,
    pub items: ValueMap,
    pub timestamp: DateTime<Utc>,
}

impl EventOccurrence {
    pub fn new(service: &str, event: &str, items: ValueMap) -> Self {
        Self {
            id: EventId::new(),
            service: service.to_string(),
            event: event.to_string(),
            items,
            timestamp: Utc::now(),
        }
    }

    pub fn item(&self, name: &str) -> Option<&TypedValue> {
        self.items.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_required_flag() {
        let req = ParameterSchema::required("Name", "agent name", ValueType::String);
        let opt = ParameterSchema::optional("Name", "agent name", ValueType::String, "");
        assert!(req.is_required());
        assert!(!opt.is_required());
    }

    #[test]
    fn test_result_has_data_only_with_payload() {
        assert!(!FunctionResult::ok().has_data());
        assert!(FunctionResult::with_data("Ready").has_data());
        let failed = FunctionResult::from_error(&ServiceError::NotFound("x".into()));
        assert!(!failed.success);
        assert!(!failed.has_data());
        assert_eq!(failed.error_kind, Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_schema_serializes_type_field() {
        let schema = FunctionSchema::new("SetChatMode", "set chat mode")
            .param(ParameterSchema::required("Mode", "mode", ValueType::String))
            .scheduled();
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["parameters"][0]["type"], "string");
        assert_eq!(json["require_scheduling"], true);
    }
}
