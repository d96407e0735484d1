//! Message segment types
//!
//! On the wire a segment is `{"type": <kind>, "data": {...}}`. In memory it
//! is a closed enum with one variant per kind the adapter understands.
//! `Raw` carries a fully platform-native object that is emitted verbatim,
//! and `Other` keeps any unrecognised kind as a passthrough.

use super::file::FileRef;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

/// Media segment kinds that carry a file reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Record,
    Video,
    File,
}

impl MediaKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Record => "record",
            MediaKind::Video => "video",
            MediaKind::File => "file",
        }
    }

    fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "image" => Some(MediaKind::Image),
            "record" => Some(MediaKind::Record),
            "video" => Some(MediaKind::Video),
            "file" => Some(MediaKind::File),
            _ => None,
        }
    }
}

/// One unit of message content
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Plain text
    Text {
        text: String,
        extra: Map<String, Value>,
    },
    /// Mention of a user
    At {
        qq: String,
        extra: Map<String, Value>,
    },
    /// Reference to the message being replied to
    Reply {
        id: String,
        extra: Map<String, Value>,
    },
    /// Poke (nudge) interaction
    Poke {
        qq: String,
        extra: Map<String, Value>,
    },
    /// Image, voice, video or generic file
    Media {
        kind: MediaKind,
        file: FileRef,
        extra: Map<String, Value>,
    },
    /// Interactive button; platforms here cannot render it
    Button(Value),
    /// Forward bundle of nested segments
    Node(Vec<Segment>),
    /// Platform-native object, emitted verbatim
    Raw(Value),
    /// Any other kind, passed through untouched
    Other {
        kind: String,
        data: Map<String, Value>,
    },
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text {
            text: text.into(),
            extra: Map::new(),
        }
    }

    pub fn at(qq: impl ToString) -> Self {
        Segment::At {
            qq: qq.to_string(),
            extra: Map::new(),
        }
    }

    pub fn reply(id: impl ToString) -> Self {
        Segment::Reply {
            id: id.to_string(),
            extra: Map::new(),
        }
    }

    pub fn poke(qq: impl ToString) -> Self {
        Segment::Poke {
            qq: qq.to_string(),
            extra: Map::new(),
        }
    }

    pub fn media(kind: MediaKind, file: FileRef) -> Self {
        Segment::Media {
            kind,
            file,
            extra: Map::new(),
        }
    }

    pub fn image(file: FileRef) -> Self {
        Self::media(MediaKind::Image, file)
    }

    pub fn node(items: Vec<Segment>) -> Self {
        Segment::Node(items)
    }

    /// Wire kind of this segment. `Raw` reports the inner object's `type`
    /// when it has one.
    pub fn kind(&self) -> &str {
        match self {
            Segment::Text { .. } => "text",
            Segment::At { .. } => "at",
            Segment::Reply { .. } => "reply",
            Segment::Poke { .. } => "poke",
            Segment::Media { kind, .. } => kind.as_str(),
            Segment::Button(_) => "button",
            Segment::Node(_) => "node",
            Segment::Raw(value) => value.get("type").and_then(Value::as_str).unwrap_or("raw"),
            Segment::Other { kind, .. } => kind.as_str(),
        }
    }

    /// Build a segment from its kind and `data` payload.
    ///
    /// Never fails: identifiers are coerced to strings, and payloads that
    /// do not fit a typed variant fall back to [`Segment::Other`]. Fields a
    /// typed variant does not model are kept in its `extra` map.
    pub fn from_parts(kind: &str, data: Value) -> Self {
        match kind {
            "text" => {
                let (text, extra) = split_field(data, "text");
                Segment::Text { text, extra }
            }
            "at" => {
                let (qq, extra) = split_field(data, "qq");
                Segment::At { qq, extra }
            }
            "reply" => {
                let (id, extra) = split_field(data, "id");
                Segment::Reply { id, extra }
            }
            "poke" => {
                let (qq, extra) = split_field(data, "qq");
                Segment::Poke { qq, extra }
            }
            "button" => Segment::Button(data),
            "node" => Segment::Node(match data {
                Value::Array(items) => items.into_iter().map(Segment::from_wire).collect(),
                Value::Null => Vec::new(),
                other => vec![Segment::from_wire(other)],
            }),
            "raw" => Segment::Raw(data),
            _ => {
                let mut data = into_map(data);
                if let Some(media) = MediaKind::from_kind(kind) {
                    if let Some(file) = data.get("file").and_then(FileRef::from_value) {
                        data.remove("file");
                        return Segment::Media {
                            kind: media,
                            file,
                            extra: data,
                        };
                    }
                }
                Segment::Other {
                    kind: kind.to_string(),
                    data,
                }
            }
        }
    }

    /// Build a segment from any JSON value.
    ///
    /// Objects without a `data` wrapper use their own fields (minus the
    /// `type` discriminator) as `data`. Non-objects become text.
    pub fn from_wire(value: Value) -> Self {
        match value {
            Value::Object(mut obj) => {
                let kind = ["type", "kind"]
                    .iter()
                    .find_map(|key| obj.get(*key).and_then(Value::as_str))
                    .unwrap_or("unknown")
                    .to_string();
                let data = match obj.remove("data") {
                    Some(data) => data,
                    None => {
                        obj.remove("type");
                        obj.remove("kind");
                        Value::Object(obj)
                    }
                };
                Segment::from_parts(&kind, data)
            }
            Value::String(text) => Segment::text(text),
            Value::Null => Segment::text(""),
            other => Segment::text(other.to_string()),
        }
    }

    /// Platform wire representation
    pub fn to_wire(&self) -> Value {
        match self {
            Segment::Text { text, extra } => with_field("text", "text", text, extra),
            Segment::At { qq, extra } => with_field("at", "qq", qq, extra),
            Segment::Reply { id, extra } => with_field("reply", "id", id, extra),
            Segment::Poke { qq, extra } => with_field("poke", "qq", qq, extra),
            Segment::Media { kind, file, extra } => {
                let mut data = extra.clone();
                data.insert("file".to_string(), Value::String(file.to_wire_string()));
                json!({ "type": kind.as_str(), "data": data })
            }
            Segment::Button(data) => json!({ "type": "button", "data": data }),
            Segment::Node(items) => json!({
                "type": "node",
                "data": items.iter().map(Segment::to_wire).collect::<Vec<_>>(),
            }),
            Segment::Raw(value) => value.clone(),
            Segment::Other { kind, data } => json!({ "type": kind, "data": data }),
        }
    }

    /// Text content if this is a text segment
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for Segment {
    fn from(text: &str) -> Self {
        Segment::text(text)
    }
}

impl From<String> for Segment {
    fn from(text: String) -> Self {
        Segment::text(text)
    }
}

impl Serialize for Segment {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Segment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Segment::from_wire)
    }
}

/// Take `data[key]` coerced to a string, plus the remaining fields.
/// Missing and null become empty.
fn split_field(data: Value, key: &str) -> (String, Map<String, Value>) {
    let mut data = into_map(data);
    let value = match data.remove(key) {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    (value, data)
}

fn with_field(kind: &str, key: &str, value: &str, extra: &Map<String, Value>) -> Value {
    let mut data = extra.clone();
    data.insert(key.to_string(), Value::String(value.to_string()));
    json!({ "type": kind, "data": data })
}

fn into_map(data: Value) -> Map<String, Value> {
    match data {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
