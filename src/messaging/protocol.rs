//! Wire shapes exchanged between contexts.
//!
//! ```text
//! Request:  { action: "getState", key?: string, keys?: string[] }
//! Response: { [key]: value } for each requested key | full state mapping
//! Request:  { action: "updateState", payload: object }
//! Response: { success: boolean, error?: string }
//! Broadcast:{ action: "stateUpdated", state: object }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const INVALID_PAYLOAD: &str = "Invalid payload";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    /// A selector of the wrong type is ignored rather than failing the
    /// request, so the caller still gets an answer.
    GetState {
        #[serde(
            default,
            deserialize_with = "string_or_none",
            skip_serializing_if = "Option::is_none"
        )]
        key: Option<String>,
        #[serde(
            default,
            deserialize_with = "string_list_or_none",
            skip_serializing_if = "Option::is_none"
        )]
        keys: Option<Vec<String>>,
    },
    UpdateState {
        /// Left untyped so a missing or non-object payload can be answered
        /// with an error instead of being treated as an unknown message.
        #[serde(default)]
        payload: Value,
    },
}

fn string_or_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(key) => Some(key),
        _ => None,
    })
}

/// Any array is a selector; its non-string entries name no field.
fn string_list_or_none<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<String>>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(key) => Some(key),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    })
}

impl Request {
    pub fn get_all() -> Self {
        Request::GetState {
            key: None,
            keys: None,
        }
    }

    pub fn get_key(key: impl Into<String>) -> Self {
        Request::GetState {
            key: Some(key.into()),
            keys: None,
        }
    }

    pub fn get_keys(keys: Vec<String>) -> Self {
        Request::GetState {
            key: None,
            keys: Some(keys),
        }
    }

    pub fn update(payload: Map<String, Value>) -> Self {
        Request::UpdateState {
            payload: Value::Object(payload),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Unsolicited message sent to every context after a committed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Notification {
    /// `state` holds only the fields that changed.
    StateUpdated { state: Map<String, Value> },
}

impl Notification {
    pub fn state_updated(delta: Map<String, Value>) -> Self {
        Notification::StateUpdated { state: delta }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
