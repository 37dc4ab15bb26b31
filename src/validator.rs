//! Compiled validator artifact
//!
//! A `Validator` wraps the assembled check program: the flattened boolean
//! expression, its local-binding slot count, the deferred forward references
//! still pending resolution, and the configuration it was compiled under.
//! Cloning is cheap and clones share one program.

use once_cell::sync::OnceCell;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{CheckConfig, CheckStrategy, SeverityPolicy};
use crate::error::{ConformError, Result, Violation};
use crate::ir::{self, CheckExpr, EvalCtx, ScanMode};
use crate::scope;

// =============================================================================
// Deferred forward references
// =============================================================================

/// One unresolved forward reference carried by a program.
///
/// Resolution happens at most once: the first check resolves the name
/// against its scope, compiles the resolved schema (through the validator
/// cache) and keeps the result for every later call.
#[derive(Debug)]
pub(crate) struct DeferredRef {
    pub name: String,
    pub scope: String,
    resolved: OnceCell<Validator>,
}

impl DeferredRef {
    pub(crate) fn new(name: &str, scope: &str) -> Self {
        Self {
            name: name.to_string(),
            scope: scope.to_string(),
            resolved: OnceCell::new(),
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    pub(crate) fn check(&self, value: &Value, config: &Arc<CheckConfig>) -> Result<bool> {
        let validator = self.resolved.get_or_try_init(|| {
            let schema = scope::resolve(&self.scope, &self.name)?;
            tracing::debug!(name = %self.name, scope = %self.scope, "resolved forward reference");
            crate::compiler::compile(&schema, config)
        })?;
        validator.is_valid(value)
    }
}

// =============================================================================
// Validator
// =============================================================================

#[derive(Debug)]
pub(crate) struct CheckProgram {
    expr: CheckExpr,
    slot_count: u16,
    deferred: Vec<DeferredRef>,
    config: Arc<CheckConfig>,
    label: String,
    rendering: String,
}

/// Executable validator compiled from a schema.
#[derive(Debug, Clone)]
pub struct Validator {
    program: Arc<CheckProgram>,
}

impl Validator {
    pub(crate) fn assemble(
        expr: CheckExpr,
        slot_count: u16,
        deferred: Vec<DeferredRef>,
        config: Arc<CheckConfig>,
        label: String,
    ) -> Self {
        let rendering = expr.to_string();
        Self {
            program: Arc::new(CheckProgram {
                expr,
                slot_count,
                deferred,
                config,
                label,
                rendering,
            }),
        }
    }

    /// Boolean conformance answer.
    ///
    /// `Err` is reserved for forward-reference resolution failures and
    /// internal defects; an ordinary non-conforming value is `Ok(false)`.
    pub fn is_valid(&self, value: &Value) -> Result<bool> {
        let start = Instant::now();
        let mut ctx = self.eval_ctx(value, start);
        let outcome = self.program.expr.eval(&mut ctx);
        ir::note_check_time(start.elapsed());
        outcome
    }

    /// Check a value against the schema, honoring the severity policy: a
    /// non-conforming value is an error under `Raise` and a logged warning
    /// under `Warn`.
    pub fn validate(&self, value: &Value) -> Result<()> {
        if self.is_valid(value)? {
            return Ok(());
        }
        let violation = self.explain(value)?;
        match self.program.config.severity {
            SeverityPolicy::Raise => Err(ConformError::Violation(violation)),
            SeverityPolicy::Warn => {
                tracing::warn!(%violation, "value does not conform");
                Ok(())
            }
        }
    }

    /// Names of forward references not yet resolved. Callers can register
    /// the missing schemas in their scopes before the first validation.
    pub fn pending_refs(&self) -> Vec<&str> {
        self.program
            .deferred
            .iter()
            .filter(|d| !d.is_resolved())
            .map(|d| d.name.as_str())
            .collect()
    }

    /// Human-readable rendering of the compiled check program
    pub fn render(&self) -> &str {
        &self.program.rendering
    }

    /// Diagnostics label this validator was compiled under
    pub fn label(&self) -> &str {
        &self.program.label
    }

    /// Configuration this validator was compiled under
    pub fn config(&self) -> &Arc<CheckConfig> {
        &self.program.config
    }

    /// Whether two validators share one compiled program (cache identity)
    pub fn shares_program(&self, other: &Validator) -> bool {
        Arc::ptr_eq(&self.program, &other.program)
    }

    fn eval_ctx<'p, 'v>(&'p self, value: &'v Value, start: Instant) -> EvalCtx<'p, 'v> {
        let deadline = match self.program.config.strategy {
            CheckStrategy::Linear => Some(ir::linear_deadline(start)),
            CheckStrategy::FirstItem => None,
        };
        EvalCtx {
            root: value,
            slots: vec![None; self.program.slot_count as usize],
            deferred: &self.program.deferred,
            config: &self.program.config,
            deadline,
        }
    }

    /// Build the structured violation for a non-conforming value.
    fn explain(&self, value: &Value) -> Result<Violation> {
        let mut ctx = self.eval_ctx(value, Instant::now());
        // no deadline on the blame pass: the culprit search re-walks fully
        ctx.deadline = None;
        let found = blame(&self.program.expr, &mut ctx)?;
        let (expected, sample) = match found {
            Some(b) => (b.expected, b.sample),
            None => (self.program.rendering.clone(), sample_of(value)),
        };
        Ok(Violation {
            context: self.program.label.clone(),
            expected,
            sample,
        })
    }
}

// =============================================================================
// Culprit search
// =============================================================================

struct Blame {
    expected: String,
    sample: String,
}

/// Truncated single-line sample of a value for violation messages
fn sample_of(value: &Value) -> String {
    const MAX_CHARS: usize = 60;
    let text = value.to_string();
    if text.chars().count() <= MAX_CHARS {
        text
    } else {
        let mut out: String = text.chars().take(MAX_CHARS).collect();
        out.push('…');
        out
    }
}

/// Descend into the failing branch of an expression, returning the rendered
/// expectation at the failure frontier and a sample of the culprit value.
/// `None` means the expression passes.
fn blame(expr: &CheckExpr, ctx: &mut EvalCtx<'_, '_>) -> Result<Option<Blame>> {
    match expr {
        CheckExpr::Accept => Ok(None),
        CheckExpr::TypeIs { source, types } => {
            let value = ctx.resolve(*source)?;
            if types.iter().any(|t| t.matches(value)) {
                Ok(None)
            } else {
                Ok(Some(Blame {
                    expected: expr.to_string(),
                    sample: sample_of(value),
                }))
            }
        }
        CheckExpr::AnyOf(arms) => {
            for arm in arms {
                if arm.eval(ctx)? {
                    return Ok(None);
                }
            }
            // every alternative failed: report the whole alternation, with
            // the first arm's culprit as the sample
            let sample = match arms.first() {
                Some(first) => blame(first, ctx)?.map(|b| b.sample),
                None => None,
            }
            .unwrap_or_else(|| sample_of(ctx.root));
            Ok(Some(Blame {
                expected: expr.to_string(),
                sample,
            }))
        }
        CheckExpr::AllOf(parts) => {
            for part in parts {
                if !part.eval(ctx)? {
                    return blame(part, ctx);
                }
            }
            Ok(None)
        }
        CheckExpr::Bind {
            source,
            slot,
            inner,
        } => {
            let value = ctx.resolve(*source)?;
            ctx.slots[*slot as usize] = Some(value);
            blame(inner, ctx)
        }
        CheckExpr::Scan {
            source,
            slot,
            values,
            mode,
            inner,
        } => {
            let value = ctx.resolve(*source)?;
            let elements: Vec<&Value> = match (value, values) {
                (Value::Array(items), false) => items.iter().collect(),
                (Value::Object(map), true) => map.values().collect(),
                _ => return Ok(None),
            };
            let candidates = match mode {
                ScanMode::First => elements.into_iter().take(1).collect::<Vec<_>>(),
                ScanMode::Deadline => elements,
            };
            for element in candidates {
                ctx.slots[*slot as usize] = Some(element);
                if !inner.eval(ctx)? {
                    return blame(inner, ctx);
                }
            }
            Ok(None)
        }
        CheckExpr::At {
            source,
            index,
            slot,
            inner,
        } => {
            let value = ctx.resolve(*source)?;
            match value.as_array().and_then(|items| items.get(*index)) {
                None => Ok(Some(Blame {
                    expected: format!("len({}) > {}", source, index),
                    sample: sample_of(value),
                })),
                Some(element) => {
                    ctx.slots[*slot as usize] = Some(element);
                    if inner.eval(ctx)? {
                        Ok(None)
                    } else {
                        blame(inner, ctx)
                    }
                }
            }
        }
        CheckExpr::LenIs { source, .. } => {
            let value = ctx.resolve(*source)?;
            if expr.eval(ctx)? {
                Ok(None)
            } else {
                Ok(Some(Blame {
                    expected: expr.to_string(),
                    sample: sample_of(value),
                }))
            }
        }
        CheckExpr::Deferred { source, index, .. } => {
            let value = ctx.resolve(*source)?;
            if ctx.deferred[*index].check(value, ctx.config)? {
                Ok(None)
            } else {
                Ok(Some(Blame {
                    expected: expr.to_string(),
                    sample: sample_of(value),
                }))
            }
        }
        CheckExpr::Placeholder(id) => Err(ConformError::Internal(format!(
            "unpatched placeholder #{} in culprit search",
            id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::schema::{SchemaNode, TypeId};
    use serde_json::json;

    #[test]
    fn test_violation_carries_structured_context() {
        let config = CheckConfig::default_shared();
        let schema = SchemaNode::union(vec![
            SchemaNode::leaf(TypeId::Int),
            SchemaNode::leaf(TypeId::Str),
        ]);
        let validator =
            crate::compiler::compile_labeled(&schema, &config, "argument 'count'").unwrap();

        let err = validator.validate(&json!(5.0)).unwrap_err();
        match err {
            ConformError::Violation(v) => {
                assert_eq!(v.context, "argument 'count'");
                assert_eq!(v.expected, "is(v, int | str)");
                assert_eq!(v.sample, "5.0");
            }
            other => panic!("Expected Violation, got {:?}", other),
        }
    }

    #[test]
    fn test_warn_severity_accepts_and_logs() {
        let config = CheckConfig {
            severity: SeverityPolicy::Warn,
            ..CheckConfig::default()
        }
        .intern();
        let validator = compile(&SchemaNode::leaf(TypeId::Int), &config).unwrap();
        assert!(validator.validate(&json!("not an int")).is_ok());
    }

    #[test]
    fn test_nested_culprit_sample() {
        let config = CheckConfig::default_shared();
        let schema = SchemaNode::generic(TypeId::List, vec![SchemaNode::leaf(TypeId::Int)]);
        let validator = compile(&schema, &config).unwrap();

        let err = validator.validate(&json!(["oops"])).unwrap_err();
        match err {
            ConformError::Violation(v) => {
                // the culprit is the offending element, not the whole list
                assert_eq!(v.sample, "\"oops\"");
            }
            other => panic!("Expected Violation, got {:?}", other),
        }
    }

    #[test]
    fn test_sample_truncation() {
        let long = json!("x".repeat(500));
        let sample = sample_of(&long);
        assert!(sample.chars().count() <= 61);
        assert!(sample.ends_with('…'));
    }

    #[test]
    fn test_pending_refs_lifecycle() {
        let config = CheckConfig::default_shared();
        let schema = SchemaNode::forward_ref("Item", "validator_unit_scope");
        let validator = compile(&schema, &config).unwrap();
        assert_eq!(validator.pending_refs(), vec!["Item"]);

        crate::scope::register_schema(
            "validator_unit_scope",
            "Item",
            SchemaNode::leaf(TypeId::Int),
        );
        assert!(validator.is_valid(&json!(3)).unwrap());
        assert!(validator.pending_refs().is_empty());
    }

    #[test]
    fn test_unresolvable_ref_is_not_a_violation() {
        let config = CheckConfig::default_shared();
        let schema = SchemaNode::forward_ref("Missing", "validator_unit_void");
        let validator = compile(&schema, &config).unwrap();
        let err = validator.validate(&json!(1)).unwrap_err();
        assert!(!err.is_violation());
        assert!(matches!(err, ConformError::UnknownScope(_)));
    }
}
