//! Typed message envelopes.
//!
//! Every value that crosses an edge travels inside an [`Envelope`]: the
//! serialized JSON body plus the payload's fully qualified type name and
//! its reflected [`TypeDescriptor`]. The envelope is what edges apply
//! predicates to and what the dispatcher checks against handler input
//! types; handlers decode the body back into the concrete type.
//!
//! Payload types implement [`WorkflowMessage`]. The default implementation
//! tags a type with its Rust type path and a named descriptor, so most
//! application types opt in with an empty impl:
//!
//! ```rust,ignore
//! #[derive(Serialize, Deserialize)]
//! struct ReviewRequest { draft: String }
//!
//! impl WorkflowMessage for ReviewRequest {}
//! ```
//!
//! Primitive and container types carry structural descriptors instead, so
//! edge gating can see through `Vec<T>`, maps and options.

use crate::error::Result;
use crate::typing::{is_instance_of, TypeDescriptor};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// A payload type that can travel through a workflow.
pub trait WorkflowMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Fully qualified name used for envelope tagging and checkpoint
    /// markers.
    fn type_name() -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Reflected descriptor used for dispatch and edge validation.
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Named {
            name: Self::type_name(),
        }
    }
}

impl WorkflowMessage for String {
    fn type_name() -> String {
        "str".to_string()
    }
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::String
    }
}

impl WorkflowMessage for bool {
    fn type_name() -> String {
        "bool".to_string()
    }
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Bool
    }
}

impl WorkflowMessage for i64 {
    fn type_name() -> String {
        "int".to_string()
    }
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Int
    }
}

impl WorkflowMessage for u64 {
    fn type_name() -> String {
        "int".to_string()
    }
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Int
    }
}

impl WorkflowMessage for f64 {
    fn type_name() -> String {
        "float".to_string()
    }
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Float
    }
}

impl WorkflowMessage for Value {
    fn type_name() -> String {
        "any".to_string()
    }
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Any
    }
}

impl<T: WorkflowMessage> WorkflowMessage for Vec<T> {
    fn type_name() -> String {
        format!("list[{}]", T::type_name())
    }
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::sequence_of(T::descriptor())
    }
}

impl<T: WorkflowMessage> WorkflowMessage for Option<T> {
    fn type_name() -> String {
        format!("{} | none", T::type_name())
    }
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::union(vec![T::descriptor(), TypeDescriptor::Null])
    }
}

impl<T: WorkflowMessage> WorkflowMessage for HashMap<String, T> {
    fn type_name() -> String {
        format!("map[str, {}]", T::type_name())
    }
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::map_of(TypeDescriptor::String, T::descriptor())
    }
}

/// A typed message in flight between executors.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Envelope {
    /// Fully qualified name of the payload type.
    pub type_name: String,
    /// Reflected descriptor of the payload type.
    pub descriptor: TypeDescriptor,
    /// Serialized payload.
    pub body: Value,
}

impl Envelope {
    /// Wrap a typed value.
    pub fn new<T: WorkflowMessage>(value: &T) -> Result<Self> {
        Ok(Self {
            type_name: T::type_name(),
            descriptor: T::descriptor(),
            body: serde_json::to_value(value)?,
        })
    }

    /// Wrap a pre-serialized value under an explicit type tag.
    pub fn from_parts(type_name: String, descriptor: TypeDescriptor, body: Value) -> Self {
        Self {
            type_name,
            descriptor,
            body,
        }
    }

    /// Decode the payload into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Can this envelope be delivered to a handler declaring `ty`?
    ///
    /// Named targets match by tag equality (or a union branch thereof).
    /// Container targets are checked against the envelope's declared
    /// descriptor, which carries named-element information the JSON body
    /// cannot; envelopes declared `Any` (dynamic payloads) are checked
    /// structurally via [`is_instance_of`] over the body instead.
    pub fn matches(&self, ty: &TypeDescriptor) -> bool {
        match ty {
            TypeDescriptor::Named { name } => {
                &self.type_name == name
                    || matches!(&self.descriptor, TypeDescriptor::Named { name: own } if own == name)
            }
            TypeDescriptor::Union(branches) => branches.iter().any(|b| self.matches(b)),
            TypeDescriptor::Any => true,
            other if matches!(self.descriptor, TypeDescriptor::Any) => {
                is_instance_of(&self.body, other)
            }
            other => crate::typing::is_type_compatible(&self.descriptor, other),
        }
    }

    /// True if the payload is of the given Rust type.
    pub fn is<T: WorkflowMessage>(&self) -> bool {
        self.matches(&T::descriptor())
    }
}
