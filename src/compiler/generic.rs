//! Generic / parametrized-container compilation
//!
//! A generic compiles to a conjunction: a membership test against the
//! unparametrized origin type, then nested checks against representative
//! elements picked by the active checking strategy. One child on a list is
//! a homogeneous element constraint; several children are positional with
//! exact arity; one child on a map constrains its values.

use std::rc::Rc;

use crate::config::CheckStrategy;
use crate::error::{ConformError, Result};
use crate::ir::{CheckExpr, ScanMode, ValueRef};
use crate::schema::{SchemaNode, TypeId};

use super::{CompileState, Frame};

pub(crate) fn compile_generic(
    state: &mut CompileState,
    frame: &Frame,
    origin: TypeId,
    children: &[SchemaNode],
) -> Result<CheckExpr> {
    let origin_check = CheckExpr::TypeIs {
        source: frame.source,
        types: vec![origin],
    };

    // An unparametrized generic imposes nothing beyond its origin type.
    if children.is_empty() {
        return Ok(origin_check);
    }

    match origin {
        TypeId::List if children.len() == 1 => {
            let slot = state.alloc_slot()?;
            let inner = state.enqueue(
                children[0].clone(),
                frame.depth + 1,
                ValueRef::Slot(slot),
                Rc::clone(&frame.substitutions),
            )?;
            Ok(CheckExpr::AllOf(vec![
                origin_check,
                CheckExpr::Scan {
                    source: frame.source,
                    slot,
                    values: false,
                    mode: scan_mode(state),
                    inner: Box::new(inner),
                },
            ]))
        }
        // Positional constraints check every position; the arity is part of
        // the shape, so the representative sampling strategies do not apply.
        TypeId::List => {
            let mut parts = Vec::with_capacity(children.len() + 2);
            parts.push(origin_check);
            parts.push(CheckExpr::LenIs {
                source: frame.source,
                len: children.len(),
            });
            for (index, child) in children.iter().enumerate() {
                let slot = state.alloc_slot()?;
                let inner = state.enqueue(
                    child.clone(),
                    frame.depth + 1,
                    ValueRef::Slot(slot),
                    Rc::clone(&frame.substitutions),
                )?;
                parts.push(CheckExpr::At {
                    source: frame.source,
                    index,
                    slot,
                    inner: Box::new(inner),
                });
            }
            Ok(CheckExpr::AllOf(parts))
        }
        TypeId::Map if children.len() == 1 => {
            let slot = state.alloc_slot()?;
            let inner = state.enqueue(
                children[0].clone(),
                frame.depth + 1,
                ValueRef::Slot(slot),
                Rc::clone(&frame.substitutions),
            )?;
            Ok(CheckExpr::AllOf(vec![
                origin_check,
                CheckExpr::Scan {
                    source: frame.source,
                    slot,
                    values: true,
                    mode: scan_mode(state),
                    inner: Box::new(inner),
                },
            ]))
        }
        TypeId::Map => Err(ConformError::UnsupportedNode {
            context: state.label.clone(),
            reason: format!(
                "map generics take a single value schema, got {} children",
                children.len()
            ),
        }),
        other => Err(ConformError::UnsupportedNode {
            context: state.label.clone(),
            reason: format!("origin type '{}' takes no parameters", other.name()),
        }),
    }
}

fn scan_mode(state: &CompileState) -> ScanMode {
    match state.config.strategy {
        CheckStrategy::FirstItem => ScanMode::First,
        CheckStrategy::Linear => ScanMode::Deadline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::config::CheckConfig;
    use serde_json::json;

    #[test]
    fn test_unparametrized_generic_is_origin_test() {
        let config = CheckConfig::default_shared();
        let schema = SchemaNode::generic(TypeId::List, vec![]);
        let validator = compile(&schema, &config).unwrap();
        assert_eq!(validator.render(), "is(v, list)");
        assert!(validator.is_valid(&json!([1, "mixed"])).unwrap());
    }

    #[test]
    fn test_first_item_strategy_samples_one_element() {
        let config = CheckConfig::default_shared();
        let schema = SchemaNode::generic(TypeId::List, vec![SchemaNode::leaf(TypeId::Int)]);
        let validator = compile(&schema, &config).unwrap();
        // only the first element is inspected
        assert!(validator.is_valid(&json!([1, 2, "x"])).unwrap());
        assert!(!validator.is_valid(&json!(["x"])).unwrap());
        // empty containers are vacuously satisfied
        assert!(validator.is_valid(&json!([])).unwrap());
        // non-lists fail the origin test
        assert!(!validator.is_valid(&json!({"a": 1})).unwrap());
    }

    #[test]
    fn test_linear_strategy_checks_every_element() {
        let config = CheckConfig {
            strategy: CheckStrategy::Linear,
            ..CheckConfig::default()
        }
        .intern();
        let schema = SchemaNode::generic(TypeId::List, vec![SchemaNode::leaf(TypeId::Int)]);
        let validator = compile(&schema, &config).unwrap();
        assert!(validator.is_valid(&json!([1, 2, 3])).unwrap());
        assert!(!validator.is_valid(&json!([1, 2, "x"])).unwrap());
    }

    #[test]
    fn test_positional_list_checks_arity_and_positions() {
        let config = CheckConfig::default_shared();
        let schema = SchemaNode::generic(
            TypeId::List,
            vec![SchemaNode::leaf(TypeId::Int), SchemaNode::leaf(TypeId::Str)],
        );
        let validator = compile(&schema, &config).unwrap();
        assert!(validator.is_valid(&json!([1, "x"])).unwrap());
        assert!(!validator.is_valid(&json!([1])).unwrap());
        assert!(!validator.is_valid(&json!([1, "x", 2])).unwrap());
        assert!(!validator.is_valid(&json!(["x", 1])).unwrap());
    }

    #[test]
    fn test_map_value_constraint() {
        let config = CheckConfig::default_shared();
        let schema = SchemaNode::generic(TypeId::Map, vec![SchemaNode::leaf(TypeId::Int)]);
        let validator = compile(&schema, &config).unwrap();
        assert!(validator.is_valid(&json!({})).unwrap());
        assert!(validator.is_valid(&json!({"a": 1, "b": 2})).unwrap());
        assert!(!validator.is_valid(&json!({"a": "x"})).unwrap());
    }

    #[test]
    fn test_parametrized_scalar_is_unsupported() {
        let config = CheckConfig::default_shared();
        let schema = SchemaNode::generic(TypeId::Int, vec![SchemaNode::leaf(TypeId::Int)]);
        let err = compile(&schema, &config).unwrap_err();
        assert!(matches!(err, ConformError::UnsupportedNode { .. }));
    }
}
