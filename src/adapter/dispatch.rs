//! Send dispatcher
//!
//! Composes the message compiler with a target's direct and forward send
//! operations and folds their results into one [`SendResult`].

use crate::error::Result;
use crate::segment::{MessageCompiler, OutboundMessage, Segment};
use async_trait::async_trait;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

/// Platform send operations for one delivery target
#[async_trait]
pub trait SendTarget: Send + Sync {
    /// Send inline segments as one message
    async fn send_direct(&self, segments: Vec<Segment>) -> Result<Value>;

    /// Send segments as a forward bundle. May return one result or an array.
    async fn send_forward(&self, items: Vec<Segment>) -> Result<Value>;
}

/// Outcome of a send.
///
/// A send that made exactly one platform call yields that call's result
/// unchanged; anything else yields the aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    /// Result of the only underlying call
    Single(Value),
    /// Every call's result plus the message ids found among them
    Batch {
        data: Vec<Value>,
        message_ids: Vec<String>,
    },
}

impl SendResult {
    /// Fold per-call results
    pub fn from_results(mut results: Vec<Value>) -> Self {
        if results.len() == 1 {
            return SendResult::Single(results.remove(0));
        }
        let message_ids = results.iter().filter_map(message_id).collect();
        SendResult::Batch {
            data: results,
            message_ids,
        }
    }

    /// All message ids carried by the result
    pub fn message_ids(&self) -> Vec<String> {
        match self {
            SendResult::Single(value) => message_id(value).into_iter().collect(),
            SendResult::Batch { message_ids, .. } => message_ids.clone(),
        }
    }

    /// Caller-facing JSON shape
    pub fn into_value(self) -> Value {
        match self {
            SendResult::Single(value) => value,
            SendResult::Batch { data, message_ids } => {
                json!({ "data": data, "message_id": message_ids })
            }
        }
    }
}

impl Serialize for SendResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.clone().into_value().serialize(serializer)
    }
}

/// Extract a non-empty `message_id` as a string
pub(crate) fn message_id(value: &Value) -> Option<String> {
    match value.get("message_id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Compile `message` and deliver it through `target`.
///
/// Forward bundles go first, then the inline segments. Failures from the
/// compiler or either send propagate unchanged.
pub async fn dispatch(
    compiler: &MessageCompiler,
    message: impl Into<OutboundMessage>,
    target: &dyn SendTarget,
) -> Result<SendResult> {
    let batch = compiler.compile(message).await?;
    let mut results = Vec::new();

    if !batch.forward.is_empty() {
        match target.send_forward(batch.forward).await? {
            Value::Array(items) => results.extend(items),
            single => results.push(single),
        }
    }

    if !batch.segments.is_empty() {
        results.push(target.send_direct(batch.segments).await?);
    }

    Ok(SendResult::from_results(results))
}
