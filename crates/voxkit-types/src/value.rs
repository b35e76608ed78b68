//! The closed value type carried by function parameters and event items.
//!
//! A `TypedValue` is one of six variants. Schema compatibility is a pure tag
//! comparison: a value fits a slot if and only if its `ValueType` equals the
//! slot's declared type.

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::error::ServiceError;

/// Parameter or item map keyed by name.
pub type ValueMap = BTreeMap<String, TypedValue>;

/// The runtime tag of a `TypedValue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Boolean,
    Number,
    String,
    Object,
    Array,
    RawBuffer,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Number => write!(f, "number"),
            ValueType::String => write!(f, "string"),
            ValueType::Object => write!(f, "object"),
            ValueType::Array => write!(f, "array"),
            ValueType::RawBuffer => write!(f, "raw_buffer"),
        }
    }
}

/// A value exchanged through a service contract.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Boolean(bool),
    Number(f64),
    String(String),
    Object(ValueMap),
    Array(Vec<TypedValue>),
    RawBuffer(Vec<u8>),
}

impl TypedValue {
    /// The runtime tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            TypedValue::Boolean(_) => ValueType::Boolean,
            TypedValue::Number(_) => ValueType::Number,
            TypedValue::String(_) => ValueType::String,
            TypedValue::Object(_) => ValueType::Object,
            TypedValue::Array(_) => ValueType::Array,
            TypedValue::RawBuffer(_) => ValueType::RawBuffer,
        }
    }

    /// Whether this value may occupy a slot declared as `ty`.
    pub fn is_compatible(&self, ty: ValueType) -> bool {
        self.value_type() == ty
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            TypedValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ValueMap> {
        match self {
            TypedValue::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[TypedValue]> {
        match self {
            TypedValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            TypedValue::RawBuffer(b) => Some(b),
            _ => None,
        }
    }

    /// Convert to JSON. Raw buffers become base64 strings, non-finite
    /// numbers become `null`, and integral numbers are emitted as integers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TypedValue::Boolean(b) => serde_json::Value::Bool(*b),
            TypedValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            TypedValue::String(s) => serde_json::Value::String(s.clone()),
            TypedValue::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            TypedValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(TypedValue::to_json).collect())
            }
            TypedValue::RawBuffer(bytes) => serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(bytes),
            ),
        }
    }

    /// Convert from JSON. `null` has no variant and is rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ServiceError> {
        Ok(match value {
            serde_json::Value::Null => {
                return Err(ServiceError::InvalidArgument(
                    "null has no typed value representation".to_string(),
                ))
            }
            serde_json::Value::Bool(b) => TypedValue::Boolean(*b),
            serde_json::Value::Number(n) => TypedValue::Number(n.as_f64().ok_or_else(|| {
                ServiceError::InvalidArgument(format!("number {n} is not representable"))
            })?),
            serde_json::Value::String(s) => TypedValue::String(s.clone()),
            serde_json::Value::Array(items) => TypedValue::Array(
                items
                    .iter()
                    .map(TypedValue::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(map) => {
                let mut out = ValueMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), TypedValue::from_json(v)?);
                }
                TypedValue::Object(out)
            }
        })
    }

    /// Decode a base64 string into a raw buffer value.
    pub fn raw_from_base64(encoded: &str) -> Result<Self, ServiceError> {
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(TypedValue::RawBuffer)
            .map_err(|e| ServiceError::InvalidArgument(format!("invalid base64 buffer: {e}")))
    }
}

impl std::fmt::Display for TypedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypedValue::RawBuffer(bytes) => write!(f, "<{} bytes>", bytes.len()),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for TypedValue {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(s)
    }
}

impl<'de> Deserialize<'de> for TypedValue {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(d)?;
        TypedValue::from_json(&raw).map_err(serde::de::Error::custom)
    }
}

impl From<bool> for TypedValue {
    fn from(v: bool) -> Self {
        TypedValue::Boolean(v)
    }
}

impl From<f64> for TypedValue {
    fn from(v: f64) -> Self {
        TypedValue::Number(v)
    }
}

impl From<f32> for TypedValue {
    fn from(v: f32) -> Self {
        TypedValue::Number(v as f64)
    }
}

macro_rules! number_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for TypedValue {
                fn from(v: $t) -> Self {
                    TypedValue::Number(v as f64)
                }
            }
        )*
    };
}

number_from!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl From<String> for TypedValue {
    fn from(v: String) -> Self {
        TypedValue::String(v)
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        TypedValue::String(v.to_string())
    }
}

impl From<ValueMap> for TypedValue {
    fn from(v: ValueMap) -> Self {
        TypedValue::Object(v)
    }
}

impl From<Vec<TypedValue>> for TypedValue {
    fn from(v: Vec<TypedValue>) -> Self {
        TypedValue::Array(v)
    }
}

impl From<Vec<u8>> for TypedValue {
    fn from(v: Vec<u8>) -> Self {
        TypedValue::RawBuffer(v)
    }
}
