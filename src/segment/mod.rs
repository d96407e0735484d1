//! Message segments
//!
//! The typed segment model, the outbound compiler that shapes caller input
//! into platform segments, and the file materializer it uses.

mod compiler;
mod file;
mod model;

pub use compiler::{CompiledBatch, MessageCompiler, MessageItem, OutboundMessage};
pub use file::{encode, FileMaterializer, FileOptions, FileRef, BASE64_PREFIX, DEFAULT_MAX_BYTES};
pub use model::{MediaKind, Segment};

use serde_json::Value;

/// Parse an inbound platform message into segments.
///
/// Accepts a plain string, a single segment object, or an array mixing
/// strings and segment objects.
pub fn parse_inbound(message: &Value) -> Vec<Segment> {
    match message {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().cloned().map(Segment::from_wire).collect(),
        other => vec![Segment::from_wire(other.clone())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_string() {
        assert_eq!(parse_inbound(&json!("hello")), vec![Segment::text("hello")]);
    }

    #[test]
    fn test_parse_mixed_array() {
        let segments = parse_inbound(&json!([
            "hi ",
            { "type": "at", "data": { "qq": "10001" } },
            { "type": "image", "data": { "file": "abc.image", "url": "https://x/abc" } }
        ]));

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::text("hi "));
        assert_eq!(segments[1], Segment::at("10001"));
        assert_eq!(segments[2].kind(), "image");
    }

    #[test]
    fn test_parse_single_object() {
        let segments = parse_inbound(&json!({ "type": "face", "data": { "id": "14" } }));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].kind(), "face");
    }

    #[test]
    fn test_parse_null() {
        assert!(parse_inbound(&Value::Null).is_empty());
    }
}
