//! Named schema scopes for forward-reference resolution
//!
//! A `ForwardRef` names a schema inside a scope that may not exist yet when
//! the referencing schema is compiled. Scopes live in a process-wide registry
//! so callers can register resolution targets before or after compiling, and
//! validators resolve lazily at first use.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{ConformError, Result};
use crate::schema::SchemaNode;

/// A named collection of schemas that forward references resolve against.
#[derive(Debug, Clone, Default)]
pub struct SchemaScope {
    entries: HashMap<String, SchemaNode>,
}

impl SchemaScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry
    pub fn insert(&mut self, name: impl Into<String>, schema: SchemaNode) {
        self.entries.insert(name.into(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&SchemaNode> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Process-wide registry mapping scope names to scopes
static SCOPES: Lazy<RwLock<HashMap<String, SchemaScope>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register (or replace) a whole scope under a name.
pub fn register_scope(name: impl Into<String>, scope: SchemaScope) {
    let mut scopes = SCOPES
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    scopes.insert(name.into(), scope);
}

/// Register a single schema inside a scope, creating the scope if absent.
pub fn register_schema(scope: &str, name: impl Into<String>, schema: SchemaNode) {
    let mut scopes = SCOPES
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    scopes
        .entry(scope.to_string())
        .or_default()
        .insert(name, schema);
}

/// Resolve a forward reference to its schema.
///
/// Failure here is an authoring defect, distinct from a validation failure.
pub fn resolve(scope: &str, name: &str) -> Result<SchemaNode> {
    let scopes = SCOPES
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let found = scopes
        .get(scope)
        .ok_or_else(|| ConformError::UnknownScope(scope.to_string()))?;
    found
        .get(name)
        .cloned()
        .ok_or_else(|| ConformError::UnresolvedRef {
            name: name.to_string(),
            scope: scope.to_string(),
        })
}
