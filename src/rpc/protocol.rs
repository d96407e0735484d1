//! Request/response envelopes for correlated API calls

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Status codes the platform uses to signal success (`ok` and `async`).
pub const SUCCESS_CODES: [i64; 2] = [0, 1];

/// Outbound API request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Platform action name
    pub action: String,
    /// Action parameters
    #[serde(default)]
    pub params: Value,
    /// Correlation token echoed back by the platform
    pub echo: String,
}

impl ApiRequest {
    /// Create a new request with a fresh correlation token
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        Self {
            action: action.into(),
            params,
            echo: new_echo(),
        }
    }
}

/// Generate a time-ordered, globally unique correlation token.
pub fn new_echo() -> String {
    Uuid::now_v7().to_string()
}

/// Inbound API response envelope.
///
/// The envelope is kept as the raw object the platform sent. Field lookups
/// through [`ApiResponse::get`] see a merged view: the nested `data`
/// payload first, then the envelope itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiResponse {
    envelope: Map<String, Value>,
}

impl ApiResponse {
    /// Build a response from a JSON value. Fails unless the value is an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(envelope) => Ok(Self { envelope }),
            other => Err(Error::Transport(format!(
                "Response is not an object: {}",
                other
            ))),
        }
    }

    /// Correlation token, if the frame carries one
    pub fn echo(&self) -> Option<String> {
        match self.envelope.get("echo")? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Platform status code, if the frame carries an integer one
    pub fn retcode(&self) -> Option<i64> {
        self.envelope.get("retcode").and_then(Value::as_i64)
    }

    /// Whether the status code is one of the success codes. A missing or
    /// non-integer code is a failure.
    pub fn is_success(&self) -> bool {
        self.retcode()
            .is_some_and(|code| SUCCESS_CODES.contains(&code))
    }

    /// Human-readable failure message (`msg`, then `wording`)
    pub fn message(&self) -> Option<&str> {
        ["msg", "wording"]
            .iter()
            .filter_map(|key| self.envelope.get(*key).and_then(Value::as_str))
            .find(|s| !s.is_empty())
    }

    /// Nested `data` payload, if present and non-null
    pub fn data(&self) -> Option<&Value> {
        self.envelope.get("data").filter(|v| !v.is_null())
    }

    /// Merged lookup: `data[key]` when present and non-null, otherwise the
    /// envelope's own `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data()
            .and_then(|data| data.get(key))
            .filter(|v| !v.is_null())
            .or_else(|| self.envelope.get(key))
    }

    /// Merged lookup deserialized into `T`
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// The raw envelope
    pub fn envelope(&self) -> &Map<String, Value> {
        &self.envelope
    }

    /// Consume the response, returning the raw envelope as a value
    pub fn into_value(self) -> Value {
        Value::Object(self.envelope)
    }
}
