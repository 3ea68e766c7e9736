//! Value marshalling between native land and the scripted runtime.
//!
//! Primitive scalars map directly, strings are UTF-8, byte buffers map to
//! the runtime's blob container, lists and maps recurse. Anything without a
//! native representation is parked in the handle table and travels as an
//! opaque [`HandleRef`] whose identity survives the round trip.
//!
//! Marshalling never executes script; depth is bounded so cyclic or
//! pathologically nested scripted structures surface as errors instead of
//! hanging the bridge.

use rhai::Dynamic;

use nexus_types::{NexusError, Value};
use nexus_types::value::ValueKind;

use crate::handles::NativeResource;
use crate::ObjectBridge;

/// Recursion bound for nested lists/maps; beyond this the structure is
/// treated as cyclic.
const MAX_MARSHAL_DEPTH: usize = 64;

/// Opaque scripted-side identity for a native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRef {
    pub id: u64,
}

impl ObjectBridge {
    /// Native → scripted.
    pub fn to_scripted(&self, value: &Value) -> Dynamic {
        match &value.kind {
            ValueKind::Null => Dynamic::UNIT,
            ValueKind::Bool(b) => Dynamic::from(*b),
            ValueKind::Int(n) => Dynamic::from(*n),
            ValueKind::Float(f) => Dynamic::from(*f),
            ValueKind::Str(s) => Dynamic::from(s.clone()),
            ValueKind::Bytes(b) => Dynamic::from_blob(b.clone()),
            ValueKind::List(items) => {
                let arr: rhai::Array = items.iter().map(|v| self.to_scripted(v)).collect();
                Dynamic::from_array(arr)
            }
            ValueKind::Map(entries) => {
                let mut map = rhai::Map::new();
                for (k, v) in entries {
                    map.insert(k.as_str().into(), self.to_scripted(v));
                }
                Dynamic::from_map(map)
            }
            ValueKind::Handle(id) => Dynamic::from(HandleRef { id: *id }),
        }
    }

    /// Scripted → native.
    ///
    /// Checks memory headroom for the materialised payload; unknown scripted
    /// types are pinned as opaque handles.
    pub fn to_native(&self, value: &Dynamic) -> Result<Value, NexusError> {
        let native = self.to_native_at(value, 0)?;
        self.memory().check_headroom(native.meta.size)?;
        Ok(native)
    }

    fn to_native_at(&self, value: &Dynamic, depth: usize) -> Result<Value, NexusError> {
        if depth > MAX_MARSHAL_DEPTH {
            return Err(NexusError::InvalidArgument(
                "cyclic or overly nested scripted value".to_string(),
            ));
        }

        if value.is_unit() {
            return Ok(Value::null());
        }
        if let Ok(b) = value.as_bool() {
            return Ok(Value::bool(b));
        }
        if let Ok(n) = value.as_int() {
            return Ok(Value::int(n));
        }
        if let Ok(f) = value.as_float() {
            return Ok(Value::float(f));
        }
        if value.is_string() {
            let s = value
                .clone()
                .into_immutable_string()
                .map_err(|t| NexusError::Internal(format!("string cast failed for {t}")))?;
            return Ok(Value::string(s.to_string()));
        }
        if value.is_blob() {
            let blob = value
                .clone()
                .try_cast::<rhai::Blob>()
                .ok_or_else(|| NexusError::Internal("blob cast failed".to_string()))?;
            return Ok(Value::bytes(blob));
        }
        if value.is_array() {
            let arr = value
                .clone()
                .try_cast::<rhai::Array>()
                .ok_or_else(|| NexusError::Internal("array cast failed".to_string()))?;
            let mut items = Vec::with_capacity(arr.len());
            for item in &arr {
                items.push(self.to_native_at(item, depth + 1)?);
            }
            return Ok(Value::list(items));
        }
        if value.is_map() {
            let map = value
                .clone()
                .try_cast::<rhai::Map>()
                .ok_or_else(|| NexusError::Internal("map cast failed".to_string()))?;
            let mut entries = std::collections::BTreeMap::new();
            for (k, v) in &map {
                entries.insert(k.to_string(), self.to_native_at(v, depth + 1)?);
            }
            return Ok(Value::map(entries));
        }
        if let Some(handle) = value.clone().try_cast::<HandleRef>() {
            return Ok(Value::handle(handle.id));
        }

        // No native representation: park the scripted value so its identity
        // survives and hand back a handle.
        let id = self.handles().pin(
            NativeResource::Opaque {
                value: value.clone(),
            },
            None,
        );
        Ok(Value::handle(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::bridge;
    use nexus_types::value::map_value;

    #[test]
    fn scalars_round_trip() {
        let b = bridge();
        for v in [
            Value::null(),
            Value::bool(true),
            Value::int(-42),
            Value::float(2.5),
            Value::string("héllo"),
            Value::bytes(vec![0, 1, 2, 255]),
        ] {
            let scripted = b.to_scripted(&v);
            let back = b.to_native(&scripted).unwrap();
            assert_eq!(back.kind, v.kind, "variant {}", v.meta.type_tag);
        }
    }

    #[test]
    fn collections_round_trip() {
        let b = bridge();
        let v = map_value(vec![
            ("names", Value::list(vec![Value::string("a"), Value::string("b")])),
            ("count", Value::int(2)),
            ("nested", map_value(vec![("ok", Value::bool(true))])),
        ]);
        let back = b.to_native(&b.to_scripted(&v)).unwrap();
        assert_eq!(back.kind, v.kind);
    }

    #[test]
    fn double_round_trip_is_identity() {
        let b = bridge();
        let v = Value::list(vec![Value::int(1), Value::string("x")]);
        let once = b.to_native(&b.to_scripted(&v)).unwrap();
        let twice = b.to_native(&b.to_scripted(&once)).unwrap();
        assert_eq!(once.kind, twice.kind);
    }

    #[test]
    fn handle_identity_is_preserved() {
        let b = bridge();
        let id = b.handles().pin(
            NativeResource::File {
                path: "/tmp/f".into(),
            },
            None,
        );
        let v = Value::handle(id);
        let back = b.to_native(&b.to_scripted(&v)).unwrap();
        assert_eq!(back.kind, ValueKind::Handle(id));
    }

    #[test]
    fn unknown_scripted_type_becomes_opaque_handle() {
        #[derive(Debug, Clone)]
        struct Widget;

        let b = bridge();
        // A custom scripted type has no native representation.
        let v = b.to_native(&Dynamic::from(Widget)).unwrap();
        match v.kind {
            ValueKind::Handle(id) => {
                assert!(b.handles().contains(id));
                let kind = b.handles().with(id, |r| r.kind()).unwrap();
                assert_eq!(kind, "opaque");
            }
            other => panic!("expected handle, got {}", other.tag()),
        }
    }

    #[test]
    fn oversized_value_is_rejected() {
        let caps = std::sync::Arc::new(nexus_caps::CapabilityStore::new(10, None));
        caps.apply_policy(nexus_types::PolicyName::Developer);
        let b = ObjectBridge::new(caps, 16);
        let big = Dynamic::from("a string that is longer than sixteen bytes".to_string());
        let err = b.to_native(&big).unwrap_err();
        assert_eq!(err.kind(), nexus_types::ErrorKind::MemoryExceeded);
    }

    #[test]
    fn deep_nesting_is_detected() {
        let b = bridge();
        let mut d = Dynamic::UNIT;
        for _ in 0..80 {
            let arr: rhai::Array = vec![d];
            d = Dynamic::from_array(arr);
        }
        let err = b.to_native(&d).unwrap_err();
        assert_eq!(err.kind(), nexus_types::ErrorKind::InvalidArgument);
    }
}
