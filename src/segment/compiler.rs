//! Outbound message compiler
//!
//! Turns whatever the caller hands in (a string, a segment, a loose JSON
//! object, or a list of those) into the ordered segments for a direct send
//! and the flattened contents of any forward bundles.

use super::file::{FileMaterializer, FileRef};
use super::model::Segment;
use crate::error::Result;
use futures::future::try_join_all;
use serde_json::Value;

/// One caller-supplied message item
#[derive(Debug, Clone, PartialEq)]
pub enum MessageItem {
    /// Plain text
    Text(String),
    /// Already-typed segment
    Segment(Segment),
    /// Loose JSON, possibly missing its `data` wrapper
    Json(Value),
}

impl MessageItem {
    /// Normalize into a segment
    pub fn into_segment(self) -> Segment {
        match self {
            MessageItem::Text(text) => Segment::text(text),
            MessageItem::Segment(segment) => segment,
            MessageItem::Json(value) => Segment::from_wire(value),
        }
    }
}

/// An outbound message: one or more items, in order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    items: Vec<MessageItem>,
    /// Given as one value rather than a list
    single: bool,
}

impl OutboundMessage {
    /// A message built from a list of items
    pub fn new(items: Vec<MessageItem>) -> Self {
        Self {
            items,
            single: false,
        }
    }

    fn single(item: MessageItem) -> Self {
        Self {
            items: vec![item],
            single: true,
        }
    }

    pub fn items(&self) -> &[MessageItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<MessageItem> {
        self.items
    }

    /// The poke target if this message is a lone poke given on its own:
    /// a bare `{"type": "poke", "qq": ...}` object or a poke segment.
    /// Pokes inside a list or a `data` wrapper are sent as segments.
    pub fn as_poke(&self) -> Option<String> {
        if !self.single {
            return None;
        }
        let qq = match self.items.first()? {
            MessageItem::Segment(Segment::Poke { qq, .. }) => qq.clone(),
            MessageItem::Json(Value::Object(obj))
                if obj.get("type").and_then(Value::as_str) == Some("poke")
                    && !obj.contains_key("data") =>
            {
                match obj.get("qq")? {
                    Value::String(qq) => qq.clone(),
                    Value::Null => return None,
                    other => other.to_string(),
                }
            }
            _ => return None,
        };
        (!qq.is_empty()).then_some(qq)
    }
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        OutboundMessage::single(MessageItem::Text(text.to_string()))
    }
}

impl From<String> for OutboundMessage {
    fn from(text: String) -> Self {
        OutboundMessage::single(MessageItem::Text(text))
    }
}

impl From<Segment> for OutboundMessage {
    fn from(segment: Segment) -> Self {
        OutboundMessage::single(MessageItem::Segment(segment))
    }
}

impl From<Vec<Segment>> for OutboundMessage {
    fn from(segments: Vec<Segment>) -> Self {
        OutboundMessage::new(segments.into_iter().map(MessageItem::Segment).collect())
    }
}

impl From<Vec<MessageItem>> for OutboundMessage {
    fn from(items: Vec<MessageItem>) -> Self {
        OutboundMessage::new(items)
    }
}

impl From<Value> for OutboundMessage {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => OutboundMessage::new(items.into_iter().map(MessageItem::Json).collect()),
            other => OutboundMessage::single(MessageItem::Json(other)),
        }
    }
}

/// Result of compiling an outbound message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledBatch {
    /// Segments for a direct send, in input order
    pub segments: Vec<Segment>,
    /// Flattened contents of every forward bundle, in input order
    pub forward: Vec<Segment>,
}

impl CompiledBatch {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.forward.is_empty()
    }
}

/// Compiles outbound messages into sendable segments
#[derive(Debug, Clone)]
pub struct MessageCompiler {
    files: FileMaterializer,
}

impl MessageCompiler {
    pub fn new(files: FileMaterializer) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &FileMaterializer {
        &self.files
    }

    /// Compile `message`.
    ///
    /// Buttons are dropped, forward bundles are flattened into
    /// [`CompiledBatch::forward`], and file references are materialized.
    /// Unknown kinds pass through. The only failures come from file
    /// materialization.
    pub async fn compile(&self, message: impl Into<OutboundMessage>) -> Result<CompiledBatch> {
        let mut shaped = Vec::new();
        let mut forward = Vec::new();

        for item in message.into().into_items() {
            match item.into_segment() {
                Segment::Button(_) => {
                    tracing::debug!("Dropping unsupported button segment");
                }
                Segment::Node(items) => forward.extend(items),
                segment => shaped.push(segment),
            }
        }

        // Files resolve concurrently; try_join_all keeps input order
        let segments = try_join_all(shaped.into_iter().map(|s| self.materialize(s))).await?;

        Ok(CompiledBatch { segments, forward })
    }

    async fn materialize(&self, segment: Segment) -> Result<Segment> {
        match segment {
            Segment::Media { kind, file, extra } => {
                let file = FileRef::Reference(self.files.materialize(&file).await?);
                Ok(Segment::Media { kind, file, extra })
            }
            Segment::Other { kind, mut data } => {
                if let Some(file) = data.get("file").and_then(FileRef::from_value) {
                    let resolved = self.files.materialize(&file).await?;
                    data.insert("file".to_string(), Value::String(resolved));
                }
                Ok(Segment::Other { kind, data })
            }
            other => Ok(other),
        }
    }
}
