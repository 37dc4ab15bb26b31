//! Schema-to-validator compilation
//!
//! A breadth-first work queue walks the schema tree and assembles one
//! flattened check expression for the whole schema. Each queued `Frame`
//! owns a placeholder in the shared code buffer; the node compiler selected
//! by the frame's schema kind produces the code patched into that hole and
//! may enqueue child frames for nested schema positions. Self-referential
//! schemas terminate because forward references compile to deferred calls
//! instead of inlined code.

pub(crate) mod generic;
pub(crate) mod union;

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use crate::cache::{self, CacheKey};
use crate::config::{config_identity, CheckConfig};
use crate::error::{ConformError, Result};
use crate::fingerprint::Fingerprint;
use crate::ir::{CheckExpr, ValueRef};
use crate::pool::ScratchPool;
use crate::schema::{SchemaNode, SubstitutionTable, TypeId};
use crate::validator::{DeferredRef, Validator};

// =============================================================================
// Frames and compilation state
// =============================================================================

/// One unit of in-progress compilation work, tied to one schema node and its
/// destination hole in the code buffer.
pub(crate) struct Frame {
    /// Schema node this frame must compile
    pub node: SchemaNode,
    /// Hole in the code buffer this frame's code is patched into
    pub placeholder: u32,
    /// Nesting depth below the root schema
    pub depth: u16,
    /// Expression for the value this frame validates
    pub source: ValueRef,
    /// Slot index to use if this frame materializes a local binding
    pub var_index: u16,
    /// Type-variable substitution table inherited from the parent
    pub substitutions: Rc<SubstitutionTable>,
}

/// Mutable state threaded through one compile request. Created and destroyed
/// entirely within `compile_uncached`; never outlives the BFS loop.
pub(crate) struct CompileState {
    queue: VecDeque<Frame>,
    buffer: CheckExpr,
    next_placeholder: u32,
    next_slot: u16,
    pub deferred: Vec<DeferredRef>,
    pub pool: Rc<ScratchPool>,
    pub config: Arc<CheckConfig>,
    pub label: String,
}

impl CompileState {
    fn new(config: Arc<CheckConfig>, label: String) -> Self {
        Self {
            queue: VecDeque::new(),
            buffer: CheckExpr::Accept,
            next_placeholder: 0,
            next_slot: 0,
            deferred: Vec::new(),
            pool: ScratchPool::new(),
            config,
            label,
        }
    }

    fn alloc_placeholder(&mut self) -> u32 {
        let id = self.next_placeholder;
        self.next_placeholder += 1;
        id
    }

    /// Allocate a fresh local-binding slot, unique across the program.
    pub(crate) fn alloc_slot(&mut self) -> Result<u16> {
        let slot = self.next_slot;
        self.next_slot = self.next_slot.checked_add(1).ok_or_else(|| {
            ConformError::Internal("local binding count exceeded u16::MAX".to_string())
        })?;
        Ok(slot)
    }

    /// Push a child frame for a nested schema position and return the
    /// placeholder expression standing in for its code.
    pub(crate) fn enqueue(
        &mut self,
        node: SchemaNode,
        depth: u16,
        source: ValueRef,
        substitutions: Rc<SubstitutionTable>,
    ) -> Result<CheckExpr> {
        let placeholder = self.alloc_placeholder();
        let var_index = self.alloc_slot()?;
        self.queue.push_back(Frame {
            node,
            placeholder,
            depth,
            source,
            var_index,
            substitutions,
        });
        Ok(CheckExpr::Placeholder(placeholder))
    }
}

// =============================================================================
// Public API
// =============================================================================

/// Compile a schema under a configuration.
///
/// Cached: compiling a structurally identical schema under the same interned
/// configuration returns the previously built validator without revisiting
/// any schema node.
pub fn compile(schema: &SchemaNode, config: &Arc<CheckConfig>) -> Result<Validator> {
    compile_with(schema, config, "value", &SubstitutionTable::new())
}

/// Compile with a diagnostics label naming what is being validated (an
/// argument name, a field path); the label appears in violations.
pub fn compile_labeled(
    schema: &SchemaNode,
    config: &Arc<CheckConfig>,
    label: &str,
) -> Result<Validator> {
    compile_with(schema, config, label, &SubstitutionTable::new())
}

/// Compile with a root type-variable substitution table, supplied by the
/// caller that bound the variables.
pub fn compile_with(
    schema: &SchemaNode,
    config: &Arc<CheckConfig>,
    label: &str,
    substitutions: &SubstitutionTable,
) -> Result<Validator> {
    let key = CacheKey {
        fingerprint: Fingerprint::of_request(schema, substitutions),
        config: config_identity(config),
    };
    cache::get_or_compile(key, || compile_uncached(schema, config, label, substitutions))
}

// =============================================================================
// BFS driver
// =============================================================================

fn compile_uncached(
    schema: &SchemaNode,
    config: &Arc<CheckConfig>,
    label: &str,
    substitutions: &SubstitutionTable,
) -> Result<Validator> {
    let mut state = CompileState::new(Arc::clone(config), label.to_string());
    let substitutions = Rc::new(substitutions.clone());

    let root = state.enqueue(schema.clone(), 0, ValueRef::Root, substitutions)?;
    state.buffer = root;

    while let Some(frame) = state.queue.pop_front() {
        tracing::trace!(
            kind = frame.node.kind_name(),
            depth = frame.depth,
            "compiling frame"
        );
        let code = compile_frame(&mut state, &frame)?;
        if !state.buffer.patch(frame.placeholder, &code) {
            return Err(ConformError::Internal(format!(
                "placeholder #{} missing from code buffer",
                frame.placeholder
            )));
        }
    }
    debug_assert!(!state.buffer.has_placeholders());

    let CompileState {
        buffer,
        next_slot,
        deferred,
        label,
        ..
    } = state;
    let validator = Validator::assemble(buffer, next_slot, deferred, Arc::clone(config), label);
    if config.debug {
        tracing::debug!(program = validator.render(), "compiled schema");
    }
    Ok(validator)
}

/// Dispatch on the frame's schema-node kind.
pub(crate) fn compile_frame(state: &mut CompileState, frame: &Frame) -> Result<CheckExpr> {
    match &frame.node {
        SchemaNode::Leaf { type_id } => compile_leaf(state, frame, *type_id),
        SchemaNode::Union { children } => union::compile_union(state, frame, children),
        SchemaNode::Generic { origin, children } => {
            generic::compile_generic(state, frame, *origin, children)
        }
        SchemaNode::ForwardRef { name, scope } => compile_forward_ref(state, frame, name, scope),
        SchemaNode::TypeVar { name, bound } => {
            compile_type_var(state, frame, name, bound.as_deref())
        }
    }
}

// =============================================================================
// Leaf, forward-reference, type-variable compilation
// =============================================================================

fn compile_leaf(state: &mut CompileState, frame: &Frame, type_id: TypeId) -> Result<CheckExpr> {
    match type_id {
        TypeId::Any => Ok(CheckExpr::Accept),
        // the numeric tower widens a float requirement to accept ints too
        TypeId::Float if state.config.numeric_tower => Ok(CheckExpr::TypeIs {
            source: frame.source,
            types: vec![TypeId::Float, TypeId::Int],
        }),
        other => Ok(CheckExpr::TypeIs {
            source: frame.source,
            types: vec![other],
        }),
    }
}

/// Forward references compile to a deferred call resolved at first use, not
/// inlined code; this is what breaks cycles in self-referential schemas.
fn compile_forward_ref(
    state: &mut CompileState,
    frame: &Frame,
    name: &str,
    scope: &str,
) -> Result<CheckExpr> {
    let index = state.deferred.len();
    state.deferred.push(DeferredRef::new(name, scope));
    Ok(CheckExpr::Deferred {
        source: frame.source,
        index,
        name: name.to_string(),
    })
}

/// Follow a type-variable through the substitution table to a concrete
/// schema. `None` means unbound: accept anything. Chains through the table
/// are followed a bounded number of hops; a cyclic table reads as unbound.
pub(crate) fn resolve_type_var(
    name: &str,
    bound: Option<&SchemaNode>,
    substitutions: &SubstitutionTable,
) -> Option<SchemaNode> {
    const MAX_HOPS: usize = 16;

    let mut resolved = substitutions.get(name).cloned().or_else(|| bound.cloned())?;
    for _ in 0..MAX_HOPS {
        match resolved {
            SchemaNode::TypeVar { name, bound } => {
                match substitutions.get(&name).cloned().or_else(|| bound.map(|b| *b)) {
                    Some(next) => resolved = next,
                    None => return None,
                }
            }
            other => return Some(other),
        }
    }
    None
}

fn compile_type_var(
    state: &mut CompileState,
    frame: &Frame,
    name: &str,
    bound: Option<&SchemaNode>,
) -> Result<CheckExpr> {
    match resolve_type_var(name, bound, &frame.substitutions) {
        None => Ok(CheckExpr::Accept),
        Some(resolved) => {
            let inner = Frame {
                node: resolved,
                placeholder: frame.placeholder,
                depth: frame.depth,
                source: frame.source,
                var_index: frame.var_index,
                substitutions: Rc::clone(&frame.substitutions),
            };
            compile_frame(state, &inner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_leaf() {
        let config = CheckConfig::default_shared();
        let validator = compile(&SchemaNode::leaf(TypeId::Int), &config).unwrap();
        assert!(validator.is_valid(&json!(5)).unwrap());
        assert!(!validator.is_valid(&json!("x")).unwrap());
        assert_eq!(validator.render(), "is(v, int)");
    }

    #[test]
    fn test_compile_any_accepts_everything() {
        let config = CheckConfig::default_shared();
        let validator = compile(&SchemaNode::leaf(TypeId::Any), &config).unwrap();
        assert!(validator.is_valid(&json!(null)).unwrap());
        assert!(validator.is_valid(&json!([1, 2, 3])).unwrap());
        assert_eq!(validator.render(), "true");
    }

    #[test]
    fn test_numeric_tower_widens_float_leaf() {
        let config = CheckConfig {
            numeric_tower: true,
            ..CheckConfig::default()
        }
        .intern();
        let validator = compile(&SchemaNode::leaf(TypeId::Float), &config).unwrap();
        assert!(validator.is_valid(&json!(1.5)).unwrap());
        assert!(validator.is_valid(&json!(5)).unwrap());
        assert!(!validator.is_valid(&json!("x")).unwrap());
    }

    #[test]
    fn test_type_var_falls_back_to_bound() {
        let config = CheckConfig::default_shared();
        let schema = SchemaNode::bounded_type_var("T", SchemaNode::leaf(TypeId::Str));
        let validator = compile(&schema, &config).unwrap();
        assert!(validator.is_valid(&json!("x")).unwrap());
        assert!(!validator.is_valid(&json!(5)).unwrap());
    }

    #[test]
    fn test_type_var_substitution_table() {
        let config = CheckConfig::default_shared();
        let schema = SchemaNode::type_var("T");
        let mut subs = SubstitutionTable::new();
        subs.insert("T".to_string(), SchemaNode::leaf(TypeId::Bool));

        let validator = compile_with(&schema, &config, "value", &subs).unwrap();
        assert!(validator.is_valid(&json!(true)).unwrap());
        assert!(!validator.is_valid(&json!(0)).unwrap());
    }

    #[test]
    fn test_unbound_type_var_accepts_anything() {
        let config = CheckConfig::default_shared();
        let validator = compile(&SchemaNode::type_var("T"), &config).unwrap();
        assert!(validator.is_valid(&json!({"anything": []})).unwrap());
    }

    #[test]
    fn test_resolve_type_var_follows_chains() {
        let mut subs = SubstitutionTable::new();
        subs.insert("T".to_string(), SchemaNode::type_var("U"));
        subs.insert("U".to_string(), SchemaNode::leaf(TypeId::Int));
        assert_eq!(
            resolve_type_var("T", None, &subs),
            Some(SchemaNode::leaf(TypeId::Int))
        );
    }
}
