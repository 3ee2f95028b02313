//! Marker-based encoding of typed values inside checkpoints.
//!
//! Checkpoints are plain JSON, but some of the values they carry (pending
//! request payloads, executor state records, shared-state entries) started
//! life as concrete Rust types. To keep those values reconstructable in a
//! different process, every non-JSON-native node is rewritten as a *marker
//! object* pairing a fully qualified type name with the serialized body:
//!
//! ```json
//! { "$dataclass": "my_app::Approval", "value": { "prompt": "review" } }
//! ```
//!
//! Markers exist for serde-shaped records (`$dataclass`), records with a
//! custom to/from-value strategy (`$model`), enumerations (`$enum`),
//! timestamps (`$datetime`), sets (`$set`) and binary blobs (`$bytes`).
//! Markers nest freely.
//!
//! # Decoding and the instantiation guard
//!
//! Rust has no import-by-name, so "resolve the fully qualified name" becomes
//! a lookup in an explicit [`TypeRegistry`] populated by the embedding
//! process. Decoding is deliberately asymmetric with encoding:
//!
//! - A resolvable name whose registered shape matches the marker is
//!   reconstructed (the inner value is validated against the registered type
//!   and unwrapped).
//! - A resolvable name with a *different* shape is refused: the raw marker
//!   object is returned untouched and never instantiated. The registry is
//!   the only path from stored bytes to a concrete type, so a forged or
//!   stale marker can at worst produce inert JSON.
//! - An unresolvable name falls back to the raw object for opaque nested
//!   records, and is a hard error for top-level typed payloads such as
//!   pending-request types, whose absence would corrupt semantics (use
//!   [`decode_typed`] for those).

use crate::error::{CheckpointError, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Marker key for serde-shaped records.
pub const DATACLASS_MARKER: &str = "$dataclass";
/// Marker key for records with a custom to/from-value strategy.
pub const MODEL_MARKER: &str = "$model";
/// Marker key for enumerations.
pub const ENUM_MARKER: &str = "$enum";
/// Marker key for timestamps (ISO-8601 body).
pub const DATETIME_MARKER: &str = "$datetime";
/// Marker key for sets (array body).
pub const SET_MARKER: &str = "$set";
/// Marker key for binary blobs (base64 body).
pub const BYTES_MARKER: &str = "$bytes";

/// Structural shape of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeShape {
    /// Plain serde record: encoded under [`DATACLASS_MARKER`].
    Dataclass,
    /// Custom to/from-value record: encoded under [`MODEL_MARKER`].
    Model,
}

impl TypeShape {
    fn as_str(self) -> &'static str {
        match self {
            TypeShape::Dataclass => "dataclass",
            TypeShape::Model => "model",
        }
    }
}

/// Records with an explicit to/from-value conversion, encoded under the
/// model marker instead of the dataclass marker.
pub trait ModelCodec: Sized {
    /// Convert the record into a JSON value.
    fn to_value(&self) -> Value;
    /// Rebuild the record from a JSON value.
    fn from_value(value: &Value) -> Option<Self>;
}

type ShapeCheck = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

struct TypeEntry {
    shape: TypeShape,
    check: ShapeCheck,
}

/// Registry of types the current process knows how to reconstruct.
///
/// The registry plays the role the import system plays in dynamic
/// languages: decoding a marker first resolves its fully qualified name
/// here, then validates the stored body against the registered shape
/// before admitting it. Registration is additive and cheap; the runtime
/// pre-registers its own protocol types and applications add theirs.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    entries: Arc<RwLock<HashMap<String, TypeEntry>>>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a serde-shaped record under its Rust type path.
    pub fn register<T: Serialize + DeserializeOwned + 'static>(&self) {
        self.register_named::<T>(std::any::type_name::<T>());
    }

    /// Register a serde-shaped record under an explicit name.
    pub fn register_named<T: Serialize + DeserializeOwned + 'static>(&self, name: &str) {
        let check: ShapeCheck =
            Arc::new(|value: &Value| serde_json::from_value::<T>(value.clone()).is_ok());
        self.entries.write().insert(
            name.to_string(),
            TypeEntry {
                shape: TypeShape::Dataclass,
                check,
            },
        );
    }

    /// Register a model-strategy record under its Rust type path.
    pub fn register_model<T: ModelCodec + 'static>(&self) {
        self.register_model_named::<T>(std::any::type_name::<T>());
    }

    /// Register a model-strategy record under an explicit name.
    pub fn register_model_named<T: ModelCodec + 'static>(&self, name: &str) {
        let check: ShapeCheck = Arc::new(|value: &Value| T::from_value(value).is_some());
        self.entries.write().insert(
            name.to_string(),
            TypeEntry {
                shape: TypeShape::Model,
                check,
            },
        );
    }

    /// Shape of a registered type, or `None` when unknown.
    pub fn resolve(&self, name: &str) -> Option<TypeShape> {
        self.entries.read().get(name).map(|e| e.shape)
    }

    /// True if `name` resolves and `value` satisfies its registered shape.
    pub fn check_shape(&self, name: &str, value: &Value) -> Option<bool> {
        self.entries.read().get(name).map(|e| (e.check)(value))
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.entries.read().keys().cloned().collect();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

/// A decoded top-level typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTyped {
    /// Fully qualified name stored in the marker.
    pub type_name: String,
    /// The validated, unwrapped body.
    pub value: Value,
}

/// Wrap a serialized record in a dataclass marker.
pub fn encode_dataclass(type_name: &str, value: Value) -> Value {
    json!({ DATACLASS_MARKER: type_name, "value": value })
}

/// Wrap a serialized record in a model marker.
pub fn encode_model(type_name: &str, value: Value) -> Value {
    json!({ MODEL_MARKER: type_name, "strategy": "to_value", "value": value })
}

/// Wrap an enumeration variant in an enum marker.
pub fn encode_enum(type_name: &str, variant: &str) -> Value {
    json!({ ENUM_MARKER: type_name, "value": variant })
}

/// Wrap a timestamp in a datetime marker.
pub fn encode_datetime(ts: &DateTime<Utc>) -> Value {
    json!({ DATETIME_MARKER: ts.to_rfc3339() })
}

/// Wrap set elements in a set marker.
pub fn encode_set(elements: Vec<Value>) -> Value {
    json!({ SET_MARKER: elements })
}

/// Wrap a binary blob in a bytes marker (base64 body).
pub fn encode_bytes(data: &[u8]) -> Value {
    json!({ BYTES_MARKER: base64::engine::general_purpose::STANDARD.encode(data) })
}

/// Serialize a value and wrap it in a dataclass marker keyed by its Rust
/// type path.
pub fn encode_typed<T: Serialize>(value: &T) -> Result<Value> {
    Ok(encode_dataclass(
        std::any::type_name::<T>(),
        serde_json::to_value(value)?,
    ))
}

fn marker_parts(obj: &Map<String, Value>) -> Option<(&'static str, &Value)> {
    for marker in [
        DATACLASS_MARKER,
        MODEL_MARKER,
        ENUM_MARKER,
        DATETIME_MARKER,
        SET_MARKER,
        BYTES_MARKER,
    ] {
        if let Some(tag) = obj.get(marker) {
            return Some((marker, tag));
        }
    }
    None
}

/// Permissively decode a value, unwrapping every marker whose type
/// resolves and whose shape matches. Unresolvable or mismatched markers
/// are left as raw objects; plain JSON passes through unchanged.
pub fn decode_value(value: &Value, registry: &TypeRegistry) -> Value {
    match value {
        Value::Object(obj) => match marker_parts(obj) {
            Some((DATETIME_MARKER, body)) => body.clone(),
            Some((SET_MARKER, body)) => {
                let elements = body
                    .as_array()
                    .map(|a| a.iter().map(|e| decode_value(e, registry)).collect())
                    .unwrap_or_default();
                Value::Array(elements)
            }
            Some((BYTES_MARKER, body)) => decode_bytes_body(body),
            Some((ENUM_MARKER, _)) => obj
                .get("value")
                .cloned()
                .unwrap_or(Value::Null),
            Some((marker @ (DATACLASS_MARKER | MODEL_MARKER), tag)) => {
                decode_record(obj, marker, tag, registry)
            }
            _ => {
                let mut out = Map::with_capacity(obj.len());
                for (k, v) in obj {
                    out.insert(k.clone(), decode_value(v, registry));
                }
                Value::Object(out)
            }
        },
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| decode_value(v, registry)).collect())
        }
        other => other.clone(),
    }
}

fn decode_bytes_body(body: &Value) -> Value {
    let decoded = body
        .as_str()
        .and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok())
        .unwrap_or_default();
    Value::Array(decoded.into_iter().map(|b| json!(b)).collect())
}

fn decode_record(
    obj: &Map<String, Value>,
    marker: &str,
    tag: &Value,
    registry: &TypeRegistry,
) -> Value {
    let raw = Value::Object(obj.clone());
    let Some(type_name) = tag.as_str() else {
        return raw;
    };
    let inner = obj.get("value").cloned().unwrap_or(Value::Null);
    let inner = decode_value(&inner, registry);

    let expected = if marker == DATACLASS_MARKER {
        TypeShape::Dataclass
    } else {
        TypeShape::Model
    };
    match registry.resolve(type_name) {
        Some(shape) if shape == expected => {
            if registry.check_shape(type_name, &inner).unwrap_or(false) {
                inner
            } else {
                tracing::warn!(type_name, "checkpoint value failed shape validation; kept raw");
                raw
            }
        }
        Some(_) => {
            // Wrong shape: never instantiate.
            tracing::warn!(type_name, "checkpoint marker shape mismatch; kept raw");
            raw
        }
        None => raw,
    }
}

/// Strictly decode a top-level typed payload (e.g. a pending-request
/// payload). Unlike [`decode_value`], an unresolvable type name or a shape
/// disagreement is an error rather than a fallback.
pub fn decode_typed(value: &Value, registry: &TypeRegistry) -> Result<DecodedTyped> {
    let obj = value
        .as_object()
        .ok_or_else(|| CheckpointError::unresolvable("<non-object>", "typed payload"))?;
    let (marker, tag) = match marker_parts(obj) {
        Some((m, t)) if m == DATACLASS_MARKER || m == MODEL_MARKER => (m, t),
        _ => return Err(CheckpointError::unresolvable("<unmarked>", "typed payload")),
    };
    let type_name = tag
        .as_str()
        .ok_or_else(|| CheckpointError::unresolvable("<non-string tag>", "typed payload"))?;

    let expected = if marker == DATACLASS_MARKER {
        TypeShape::Dataclass
    } else {
        TypeShape::Model
    };
    let shape = registry
        .resolve(type_name)
        .ok_or_else(|| CheckpointError::unresolvable(type_name, "typed payload"))?;
    if shape != expected {
        return Err(CheckpointError::ShapeMismatch {
            type_name: type_name.to_string(),
            stored: expected.as_str().to_string(),
            registered: shape.as_str().to_string(),
        });
    }

    let inner = decode_value(&obj.get("value").cloned().unwrap_or(Value::Null), registry);
    if !registry.check_shape(type_name, &inner).unwrap_or(false) {
        return Err(CheckpointError::ShapeMismatch {
            type_name: type_name.to_string(),
            stored: expected.as_str().to_string(),
            registered: "incompatible body".to_string(),
        });
    }
    Ok(DecodedTyped {
        type_name: type_name.to_string(),
        value: inner,
    })
}
