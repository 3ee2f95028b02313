//! Reflected type descriptors and structural compatibility checks.
//!
//! Dispatch in the workflow runtime is typed: every handler declares the
//! message type it accepts, and edges only deliver messages a target can
//! handle. Rust's generics are erased long before a message crosses an
//! edge, so the runtime carries its own reflected description of each
//! payload type — a [`TypeDescriptor`] — and implements the two checks
//! once, as pure functions over descriptors:
//!
//! - [`is_instance_of`] — can this runtime value be delivered to a handler
//!   declaring that type?
//! - [`is_type_compatible`] — can values of one declared type always be
//!   delivered where another declared type is expected? (Used at graph
//!   build time to validate edges.)
//!
//! Both checks are structural. Container element types are verified by
//! walking the JSON body; named (custom) types are verified by tag
//! equality at the envelope level, and accepted structurally when nested
//! inside containers. Generic parameters of named types are not enforced
//! at runtime — a documented limitation shared with the dispatch layers
//! of dynamic-language runtimes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A reflected description of a message payload type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum TypeDescriptor {
    /// The unit/none type.
    Null,
    /// Boolean.
    Bool,
    /// Integer (any width).
    Int,
    /// Floating point.
    Float,
    /// UTF-8 string.
    String,
    /// Matches every value; compatible target for every type.
    Any,
    /// At least one branch must match.
    Union(Vec<TypeDescriptor>),
    /// Ordered sequence; every element must match. Empty sequences pass.
    Sequence(Box<TypeDescriptor>),
    /// Unordered set; every element must match. Empty sets pass.
    Set(Box<TypeDescriptor>),
    /// Mapping; keys match the first descriptor, values the second.
    /// Empty maps pass.
    Map(Box<TypeDescriptor>, Box<TypeDescriptor>),
    /// Fixed-arity tuple; length must equal arity and each position must
    /// match.
    Tuple(Vec<TypeDescriptor>),
    /// Variadic tuple; every element must match.
    TupleVariadic(Box<TypeDescriptor>),
    /// A named (custom) type, tagged by its fully qualified name. Named
    /// compatibility is tag identity: Rust has no runtime subclassing.
    Named {
        /// Fully qualified type name.
        name: String,
    },
}

impl TypeDescriptor {
    /// Descriptor for a named Rust type, tagged by its type path.
    pub fn named<T: ?Sized>() -> Self {
        Self::Named {
            name: std::any::type_name::<T>().to_string(),
        }
    }

    /// Descriptor for a named type with an explicit tag.
    pub fn named_str(name: impl Into<String>) -> Self {
        Self::Named { name: name.into() }
    }

    /// `Sequence<element>`.
    pub fn sequence_of(element: TypeDescriptor) -> Self {
        Self::Sequence(Box::new(element))
    }

    /// `Set<element>`.
    pub fn set_of(element: TypeDescriptor) -> Self {
        Self::Set(Box::new(element))
    }

    /// `Map<key, value>`.
    pub fn map_of(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    /// `A | B | ...`.
    pub fn union(branches: Vec<TypeDescriptor>) -> Self {
        Self::Union(branches)
    }

    /// Specificity rank used to pick the most specific matching handler.
    ///
    /// Named types outrank primitives, primitives outrank containers,
    /// everything outranks `Any`; a union is only as specific as its
    /// least specific branch. Ties are broken by registration order at
    /// the dispatch site.
    pub fn specificity(&self) -> u32 {
        match self {
            Self::Any => 0,
            Self::Union(branches) => {
                branches.iter().map(Self::specificity).min().unwrap_or(0)
            }
            Self::Sequence(e) | Self::Set(e) | Self::TupleVariadic(e) => 1 + e.specificity(),
            Self::Map(k, v) => 1 + k.specificity().min(v.specificity()),
            Self::Tuple(items) => {
                1 + items.iter().map(Self::specificity).min().unwrap_or(0)
            }
            Self::Null | Self::Bool | Self::Int | Self::Float | Self::String => 10,
            Self::Named { .. } => 20,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "none"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "str"),
            Self::Any => write!(f, "any"),
            Self::Union(branches) => {
                let parts: Vec<String> = branches.iter().map(|b| b.to_string()).collect();
                write!(f, "{}", parts.join(" | "))
            }
            Self::Sequence(e) => write!(f, "list[{e}]"),
            Self::Set(e) => write!(f, "set[{e}]"),
            Self::Map(k, v) => write!(f, "map[{k}, {v}]"),
            Self::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "tuple[{}]", parts.join(", "))
            }
            Self::TupleVariadic(e) => write!(f, "tuple[{e}, ...]"),
            Self::Named { name } => write!(f, "{name}"),
        }
    }
}

/// Decide whether a runtime value can be delivered to a handler declaring
/// type `ty`.
///
/// The check is structural over the JSON body. A `Named` descriptor at
/// this level accepts any object value; top-level named typing is
/// enforced by tag comparison on the message envelope (see
/// [`Envelope::matches`](crate::envelope::Envelope::matches)).
pub fn is_instance_of(value: &Value, ty: &TypeDescriptor) -> bool {
    match ty {
        TypeDescriptor::Any => true,
        TypeDescriptor::Null => value.is_null(),
        TypeDescriptor::Bool => value.is_boolean(),
        TypeDescriptor::Int => value.is_i64() || value.is_u64(),
        TypeDescriptor::Float => value.is_f64(),
        TypeDescriptor::String => value.is_string(),
        TypeDescriptor::Union(branches) => branches.iter().any(|b| is_instance_of(value, b)),
        TypeDescriptor::Sequence(e) | TypeDescriptor::Set(e) => value
            .as_array()
            .map(|items| items.iter().all(|item| is_instance_of(item, e)))
            .unwrap_or(false),
        TypeDescriptor::Map(k, v) => value
            .as_object()
            .map(|obj| {
                obj.iter().all(|(key, val)| {
                    is_instance_of(&Value::String(key.clone()), k) && is_instance_of(val, v)
                })
            })
            .unwrap_or(false),
        TypeDescriptor::Tuple(items) => value
            .as_array()
            .map(|elems| {
                elems.len() == items.len()
                    && elems.iter().zip(items).all(|(e, t)| is_instance_of(e, t))
            })
            .unwrap_or(false),
        TypeDescriptor::TupleVariadic(e) => value
            .as_array()
            .map(|items| items.iter().all(|item| is_instance_of(item, e)))
            .unwrap_or(false),
        TypeDescriptor::Named { .. } => value.is_object(),
    }
}

/// Decide static compatibility between two declared types: can every
/// value of `source` be delivered where `target` is expected?
pub fn is_type_compatible(source: &TypeDescriptor, target: &TypeDescriptor) -> bool {
    use TypeDescriptor::*;

    // Target Any accepts everything; a dynamic (Any) source is admitted
    // and gated per-message at dispatch time.
    if matches!(target, Any) || matches!(source, Any) {
        return true;
    }
    if source == target {
        return true;
    }
    // A union source requires every branch to fit the target.
    if let Union(branches) = source {
        return branches.iter().all(|b| is_type_compatible(b, target));
    }
    // A union target requires at least one branch to accept the source.
    if let Union(branches) = target {
        return branches.iter().any(|b| is_type_compatible(source, b));
    }

    match (source, target) {
        (Sequence(s), Sequence(t)) | (Set(s), Set(t)) => is_type_compatible(s, t),
        (Map(sk, sv), Map(tk, tv)) => is_type_compatible(sk, tk) && is_type_compatible(sv, tv),
        (Tuple(s), Tuple(t)) => {
            s.len() == t.len() && s.iter().zip(t).all(|(a, b)| is_type_compatible(a, b))
        }
        (Tuple(s), TupleVariadic(t)) => s.iter().all(|a| is_type_compatible(a, t)),
        (TupleVariadic(s), TupleVariadic(t)) => is_type_compatible(s, t),
        (Named { name: s }, Named { name: t }) => s == t,
        _ => false,
    }
}
