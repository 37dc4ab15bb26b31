//! Schema node model
//!
//! A schema is an immutable tagged tree describing the shape a JSON value
//! must have. The compiler walks this tree; it never mutates it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Concrete leaf types a value can be tested against.
///
/// `Any` accepts every value and is the ignorable leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeId {
    Any,
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
}

impl TypeId {
    /// Short lowercase name used in renderings
    pub fn name(&self) -> &'static str {
        match self {
            TypeId::Any => "any",
            TypeId::Null => "null",
            TypeId::Bool => "bool",
            TypeId::Int => "int",
            TypeId::Float => "float",
            TypeId::Str => "str",
            TypeId::List => "list",
            TypeId::Map => "map",
        }
    }

    /// Type-membership test against a JSON value.
    ///
    /// `Int` matches integer-valued JSON numbers; `Float` matches the rest.
    /// Numeric-tower widening is applied by the compiler, not here.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            TypeId::Any => true,
            TypeId::Null => value.is_null(),
            TypeId::Bool => value.is_boolean(),
            TypeId::Int => value.is_i64() || value.is_u64(),
            TypeId::Float => value.is_f64(),
            TypeId::Str => value.is_string(),
            TypeId::List => value.is_array(),
            TypeId::Map => value.is_object(),
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Type-variable substitution table inherited through compilation frames.
pub type SubstitutionTable = HashMap<String, SchemaNode>;

/// One node of a type schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaNode {
    /// Value must be an instance of a concrete type.
    Leaf { type_id: TypeId },
    /// Value must satisfy at least one child. Children are ordered for
    /// reproducible codegen but semantically order-independent.
    Union { children: Vec<SchemaNode> },
    /// Value must be an instance of `origin` and, when children are present,
    /// satisfy structural constraints derived from them: one child on a list
    /// is a homogeneous element constraint, several children are positional;
    /// one child on a map constrains its values.
    Generic {
        origin: TypeId,
        children: Vec<SchemaNode>,
    },
    /// Unresolved symbolic reference into a named scope, resolved lazily at
    /// first use.
    ForwardRef { name: String, scope: String },
    /// Placeholder resolved via the enclosing frame's substitution table,
    /// falling back to its declared bound (or `any` when unbound).
    TypeVar {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bound: Option<Box<SchemaNode>>,
    },
}

impl SchemaNode {
    pub fn leaf(type_id: TypeId) -> Self {
        SchemaNode::Leaf { type_id }
    }

    pub fn union(children: Vec<SchemaNode>) -> Self {
        SchemaNode::Union { children }
    }

    pub fn generic(origin: TypeId, children: Vec<SchemaNode>) -> Self {
        SchemaNode::Generic { origin, children }
    }

    pub fn forward_ref(name: impl Into<String>, scope: impl Into<String>) -> Self {
        SchemaNode::ForwardRef {
            name: name.into(),
            scope: scope.into(),
        }
    }

    pub fn type_var(name: impl Into<String>) -> Self {
        SchemaNode::TypeVar {
            name: name.into(),
            bound: None,
        }
    }

    pub fn bounded_type_var(name: impl Into<String>, bound: SchemaNode) -> Self {
        SchemaNode::TypeVar {
            name: name.into(),
            bound: Some(Box::new(bound)),
        }
    }

    /// Node kind name for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            SchemaNode::Leaf { .. } => "leaf",
            SchemaNode::Union { .. } => "union",
            SchemaNode::Generic { .. } => "generic",
            SchemaNode::ForwardRef { .. } => "forward_ref",
            SchemaNode::TypeVar { .. } => "type_var",
        }
    }

    /// Whether this node accepts every value.
    ///
    /// A union containing an ignorable child is itself ignorable, since one
    /// always-satisfied alternative satisfies the whole union.
    pub fn is_ignorable(&self) -> bool {
        match self {
            SchemaNode::Leaf { type_id } => *type_id == TypeId::Any,
            SchemaNode::Union { children } => children.iter().any(|c| c.is_ignorable()),
            SchemaNode::TypeVar { bound, .. } => match bound {
                None => true,
                Some(b) => b.is_ignorable(),
            },
            SchemaNode::Generic { .. } | SchemaNode::ForwardRef { .. } => false,
        }
    }

    /// Deterministic textual rendering, also the fingerprint input.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        match self {
            SchemaNode::Leaf { type_id } => out.push_str(type_id.name()),
            SchemaNode::Union { children } => {
                out.push_str("union[");
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" | ");
                    }
                    child.render_into(out);
                }
                out.push(']');
            }
            SchemaNode::Generic { origin, children } => {
                out.push_str(origin.name());
                if !children.is_empty() {
                    out.push('[');
                    for (i, child) in children.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        child.render_into(out);
                    }
                    out.push(']');
                }
            }
            SchemaNode::ForwardRef { name, scope } => {
                out.push_str("ref('");
                out.push_str(name);
                out.push_str("' @ ");
                out.push_str(scope);
                out.push(')');
            }
            SchemaNode::TypeVar { name, bound } => {
                out.push('$');
                out.push_str(name);
                if let Some(b) = bound {
                    out.push_str(": ");
                    b.render_into(out);
                }
            }
        }
    }
}

impl fmt::Display for SchemaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}
