//! The tagged value model passed through the engine and across the bridge.
//!
//! A [`Value`] pairs a variant (`null`, `bool`, `int`, `float`, `string`,
//! `bytes`, `list`, `map`, `handle`) with [`ValueMeta`]: a process-unique id,
//! a type tag consistent with the variant, monotonic creation/modification
//! stamps, and a best-effort payload size.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use serde::{Deserialize, Serialize};

static OBJECT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate the next process-unique object id. Ids start at 1; 0 is never
/// assigned.
pub fn next_object_id() -> u64 {
    OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Nanoseconds elapsed since the first call in this process. Monotonic,
/// unrelated to wall-clock time.
pub fn monotonic_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Metadata carried by every [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMeta {
    /// Process-unique, monotonically assigned id.
    pub id: u64,
    /// Type tag, always consistent with the variant (`"string"`, `"list"`, ...).
    pub type_tag: String,
    /// Monotonic nanosecond stamp at creation.
    pub created_at: u64,
    /// Monotonic nanosecond stamp of the last mutation.
    pub modified_at: u64,
    /// Best-effort payload size in bytes.
    pub size: u64,
}

/// The variants a value can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Opaque id referring to a native resource pinned by the bridge's
    /// handle table until explicitly released.
    Handle(u64),
}

impl ValueKind {
    /// The type tag for this variant.
    pub fn tag(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool(_) => "bool",
            ValueKind::Int(_) => "int",
            ValueKind::Float(_) => "float",
            ValueKind::Str(_) => "string",
            ValueKind::Bytes(_) => "bytes",
            ValueKind::List(_) => "list",
            ValueKind::Map(_) => "map",
            ValueKind::Handle(_) => "handle",
        }
    }

    /// Best-effort payload size in bytes.
    pub fn payload_size(&self) -> u64 {
        match self {
            ValueKind::Null => 0,
            ValueKind::Bool(_) => 1,
            ValueKind::Int(_) | ValueKind::Float(_) | ValueKind::Handle(_) => 8,
            ValueKind::Str(s) => s.len() as u64,
            ValueKind::Bytes(b) => b.len() as u64,
            ValueKind::List(items) => items.iter().map(|v| v.meta.size).sum(),
            ValueKind::Map(entries) => entries
                .iter()
                .map(|(k, v)| k.len() as u64 + v.meta.size)
                .sum(),
        }
    }
}

/// A tagged, metadata-carrying datum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub meta: ValueMeta,
    pub kind: ValueKind,
}

impl Value {
    /// Wrap a variant with fresh metadata.
    pub fn new(kind: ValueKind) -> Self {
        let now = monotonic_ns();
        let meta = ValueMeta {
            id: next_object_id(),
            type_tag: kind.tag().to_string(),
            created_at: now,
            modified_at: now,
            size: kind.payload_size(),
        };
        Self { meta, kind }
    }

    pub fn null() -> Self {
        Self::new(ValueKind::Null)
    }

    pub fn bool(b: bool) -> Self {
        Self::new(ValueKind::Bool(b))
    }

    pub fn int(n: i64) -> Self {
        Self::new(ValueKind::Int(n))
    }

    pub fn float(f: f64) -> Self {
        Self::new(ValueKind::Float(f))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::new(ValueKind::Str(s.into()))
    }

    pub fn bytes(b: Vec<u8>) -> Self {
        Self::new(ValueKind::Bytes(b))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::new(ValueKind::List(items))
    }

    pub fn map(entries: BTreeMap<String, Value>) -> Self {
        Self::new(ValueKind::Map(entries))
    }

    pub fn handle(id: u64) -> Self {
        Self::new(ValueKind::Handle(id))
    }

    /// Record a mutation: refresh `modified_at` and recompute `size`.
    pub fn touch(&mut self) {
        self.meta.modified_at = monotonic_ns();
        self.meta.size = self.kind.payload_size();
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ValueKind::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.kind {
            ValueKind::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            ValueKind::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match &self.kind {
            ValueKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match &self.kind {
            ValueKind::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a key in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Render the payload as JSON, dropping metadata. Bytes become a list of
    /// integers; handles become `{"handle": id}`.
    pub fn to_json(&self) -> serde_json::Value {
        match &self.kind {
            ValueKind::Null => serde_json::Value::Null,
            ValueKind::Bool(b) => serde_json::Value::Bool(*b),
            ValueKind::Int(n) => serde_json::Value::from(*n),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::Str(s) => serde_json::Value::String(s.clone()),
            ValueKind::Bytes(b) => {
                serde_json::Value::Array(b.iter().map(|byte| serde_json::Value::from(*byte)).collect())
            }
            ValueKind::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            ValueKind::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            ValueKind::Handle(id) => {
                let mut obj = serde_json::Map::new();
                obj.insert("handle".to_string(), serde_json::Value::from(*id));
                serde_json::Value::Object(obj)
            }
        }
    }

    /// Build a value from plain JSON. Numbers become `int` when integral,
    /// `float` otherwise; objects become maps; arrays become lists.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::null(),
            serde_json::Value::Bool(b) => Value::bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::int(i)
                } else {
                    Value::float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::string(s.clone()),
            serde_json::Value::Array(items) => {
                Value::list(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => Value::map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Human-readable one-line rendering used by the shell printer.
    pub fn display_string(&self) -> String {
        match &self.kind {
            ValueKind::Null => String::new(),
            ValueKind::Bool(b) => b.to_string(),
            ValueKind::Int(n) => n.to_string(),
            ValueKind::Float(f) => f.to_string(),
            ValueKind::Str(s) => s.clone(),
            ValueKind::Bytes(b) => format!("<{} bytes>", b.len()),
            ValueKind::Handle(id) => format!("<handle {id}>"),
            other => serde_json::to_string(&Value::to_json(self))
                .unwrap_or_else(|_| format!("<{}>", other.tag())),
        }
    }
}

/// Build a map value from key/value pairs without spelling out the BTreeMap.
pub fn map_value(entries: Vec<(&str, Value)>) -> Value {
    Value::map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let a = Value::null();
        let b = Value::int(1);
        let c = Value::string("x");
        assert!(a.meta.id < b.meta.id);
        assert!(b.meta.id < c.meta.id);
        assert_ne!(a.meta.id, 0);
    }

    #[test]
    fn type_tag_matches_variant() {
        assert_eq!(Value::null().meta.type_tag, "null");
        assert_eq!(Value::bool(true).meta.type_tag, "bool");
        assert_eq!(Value::int(7).meta.type_tag, "int");
        assert_eq!(Value::float(1.5).meta.type_tag, "float");
        assert_eq!(Value::string("s").meta.type_tag, "string");
        assert_eq!(Value::bytes(vec![1]).meta.type_tag, "bytes");
        assert_eq!(Value::list(vec![]).meta.type_tag, "list");
        assert_eq!(Value::handle(3).meta.type_tag, "handle");
    }

    #[test]
    fn size_is_best_effort_recursive() {
        let v = Value::list(vec![Value::string("abc"), Value::bytes(vec![0; 10])]);
        assert_eq!(v.meta.size, 13);

        let mut entries = BTreeMap::new();
        entries.insert("k".to_string(), Value::string("vv"));
        let m = Value::map(entries);
        assert_eq!(m.meta.size, 3);
    }

    #[test]
    fn touch_updates_modified_and_size() {
        let mut v = Value::string("ab");
        let before = v.meta.modified_at;
        if let ValueKind::Str(s) = &mut v.kind {
            s.push_str("cdef");
        }
        v.touch();
        assert!(v.meta.modified_at >= before);
        assert_eq!(v.meta.size, 6);
    }

    #[test]
    fn json_round_trip_preserves_payload() {
        let v = map_value(vec![
            ("code", Value::int(0)),
            ("stdout", Value::string("6\n")),
            ("success", Value::bool(true)),
        ]);
        let json = v.to_json();
        let back = Value::from_json(&json);
        assert_eq!(back.get("code").and_then(Value::as_int), Some(0));
        assert_eq!(
            back.get("stdout").and_then(|s| s.as_str()),
            Some("6\n")
        );
        assert_eq!(back.get("success").and_then(Value::as_bool), Some(true));
    }
}
