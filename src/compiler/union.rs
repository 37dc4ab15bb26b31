//! Union node compilation
//!
//! A union compiles to one short-circuit OR over its alternatives. Shallow
//! alternatives (bare type-membership tests) are merged into a single
//! multi-type test emitted first; composite alternatives each get a nested
//! sub-expression compiled by their own frame, all reusing one materialized
//! binding of the value under test.
//!
//! Child flattening is a pure function of (union node, configuration) and is
//! cached process-wide. It expands nested unions one level only — unions
//! nested deeper than one expansion pass survive as composite children,
//! which is correct, merely less flat.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Mutex;

use crate::cache::CacheKey;
use crate::config::{config_identity, CheckConfig};
use crate::error::{ConformError, Result};
use crate::fingerprint::Fingerprint;
use crate::ir::{CheckExpr, ValueRef};
use crate::pool;
use crate::schema::{SchemaNode, SubstitutionTable, TypeId};

use super::{CompileState, Frame};

pub(crate) fn compile_union(
    state: &mut CompileState,
    frame: &Frame,
    children: &[SchemaNode],
) -> Result<CheckExpr> {
    // A childless union reaching this compiler is an upstream normalization
    // defect, never a value problem.
    if children.is_empty() {
        return Err(ConformError::MalformedSchema {
            context: state.label.clone(),
            reason: "union with no children reached the union compiler".to_string(),
        });
    }

    let flattened = flattened_children(state, frame, children)?;
    if flattened.is_empty() {
        return Err(ConformError::MalformedSchema {
            context: state.label.clone(),
            reason: "union flattened to no children".to_string(),
        });
    }

    // One always-satisfied alternative satisfies the whole union.
    if flattened.iter().any(|c| c.is_ignorable()) {
        return Ok(CheckExpr::Accept);
    }

    // Partition into the shallow bucket (checkable by one membership test)
    // and composite children needing nested sub-checks, deduplicating while
    // preserving discovery order.
    let mut shallow = pool::type_list(&state.pool);
    let mut composite = pool::node_list(&state.pool);
    for child in &flattened {
        match child {
            SchemaNode::Leaf { type_id } => {
                if !shallow.contains(type_id) {
                    shallow.push(*type_id);
                }
            }
            other => {
                if !composite.iter().any(|seen| seen == other) {
                    composite.push(other.clone());
                }
            }
        }
    }

    // All alternatives shallow: the whole union is one membership test.
    if composite.is_empty() {
        return Ok(CheckExpr::TypeIs {
            source: frame.source,
            types: shallow.to_vec(),
        });
    }

    // A union that collapsed to a single composite alternative compiles as
    // that alternative; no binding is introduced for a lone consumer.
    if shallow.is_empty() && composite.len() == 1 {
        return state.enqueue(
            composite[0].clone(),
            frame.depth + 1,
            frame.source,
            Rc::clone(&frame.substitutions),
        );
    }

    // Several alternatives with at least one composite: materialize the value
    // once and have every alternative reference the binding. A source that is
    // already a local binding is reused as-is.
    let (bound, bind_slot) = match frame.source {
        ValueRef::Slot(_) => (frame.source, None),
        ValueRef::Root => (ValueRef::Slot(frame.var_index), Some(frame.var_index)),
    };

    let mut arms = Vec::with_capacity(composite.len() + 1);
    if !shallow.is_empty() {
        arms.push(CheckExpr::TypeIs {
            source: bound,
            types: shallow.to_vec(),
        });
    }
    for child in composite.iter() {
        arms.push(state.enqueue(
            child.clone(),
            frame.depth + 1,
            bound,
            Rc::clone(&frame.substitutions),
        )?);
    }

    let alternatives = CheckExpr::AnyOf(arms);
    Ok(match bind_slot {
        Some(slot) => CheckExpr::Bind {
            source: frame.source,
            slot,
            inner: Box::new(alternatives),
        },
        None => alternatives,
    })
}

// =============================================================================
// Child flattening
// =============================================================================

/// Flattening results cached per (union node + substitutions, configuration)
static FLATTEN_CACHE: Lazy<Mutex<HashMap<CacheKey, Vec<SchemaNode>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub(crate) fn reset_flatten_cache() {
    FLATTEN_CACHE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clear();
}

/// Sanify each child, then expand child unions into the parent's list.
///
/// Expansion is one level per pass: sanification can turn a concrete leaf
/// into an implicit union (numeric-tower widening), and this is where those
/// nested unions dissolve back into the parent.
fn flattened_children(
    state: &mut CompileState,
    frame: &Frame,
    children: &[SchemaNode],
) -> Result<Vec<SchemaNode>> {
    let key = CacheKey {
        fingerprint: Fingerprint::of_request(&frame.node, &frame.substitutions),
        config: config_identity(&state.config),
    };

    {
        let cache = FLATTEN_CACHE
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(hit) = cache.get(&key) {
            tracing::trace!("union flattening cache hit");
            return Ok(hit.clone());
        }
    }

    let mut out = pool::node_list(&state.pool);
    for child in children {
        match sanify_child(child, &state.config, &frame.substitutions) {
            SchemaNode::Union { children: nested } => out.extend(nested),
            other => out.push(other),
        }
    }

    // Freeze the pooled scratch list into the cached result.
    let result = out.to_vec();
    FLATTEN_CACHE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(key, result.clone());
    Ok(result)
}

/// Resolve type variables and apply configuration-driven widening before a
/// child is tested for union membership.
fn sanify_child(
    child: &SchemaNode,
    config: &CheckConfig,
    substitutions: &SubstitutionTable,
) -> SchemaNode {
    let resolved = match child {
        SchemaNode::TypeVar { name, bound } => {
            match super::resolve_type_var(name, bound.as_deref(), substitutions) {
                Some(node) => node,
                None => return SchemaNode::leaf(TypeId::Any),
            }
        }
        other => other.clone(),
    };
    match resolved {
        SchemaNode::Leaf {
            type_id: TypeId::Float,
        } if config.numeric_tower => SchemaNode::union(vec![
            SchemaNode::leaf(TypeId::Float),
            SchemaNode::leaf(TypeId::Int),
        ]),
        other => other,
    }
}
