//! Check-expression intermediate representation
//!
//! The compiler assembles one flattened `CheckExpr` per schema: a single
//! short-circuiting boolean expression rather than a validator per nested
//! level. During the BFS the tree contains `Placeholder` holes that node
//! compilers patch as their frames are popped; a fully assembled program has
//! none left. The tree evaluates directly against a JSON value and renders
//! to text for debugging.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::CheckConfig;
use crate::error::{ConformError, Result};
use crate::schema::TypeId;
use crate::validator::DeferredRef;

// =============================================================================
// Expression tree
// =============================================================================

/// Reference to the value under test in some scope of the program.
///
/// `Root` is the value handed to the validator; `Slot(n)` is a local binding
/// materialized once by a `Bind`, `Scan`, or `At` node and reused by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueRef {
    Root,
    Slot(u16),
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueRef::Root => write!(f, "v"),
            ValueRef::Slot(n) => write!(f, "v{}", n),
        }
    }
}

/// How a `Scan` walks container elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanMode {
    /// One fixed representative: the first element
    First,
    /// Every element until the process-wide time deadline
    Deadline,
}

/// One node of the compiled boolean expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CheckExpr {
    /// Accepts every value
    Accept,
    /// Multi-type membership test, one test for a whole shallow bucket
    TypeIs {
        source: ValueRef,
        types: Vec<TypeId>,
    },
    /// Short-circuit OR over union alternatives
    AnyOf(Vec<CheckExpr>),
    /// Short-circuit AND over conjunct checks
    AllOf(Vec<CheckExpr>),
    /// Materialize `source` into `slot`, then evaluate `inner` with the
    /// binding live
    Bind {
        source: ValueRef,
        slot: u16,
        inner: Box<CheckExpr>,
    },
    /// Element scan over a list's elements (`values: false`) or a map's
    /// values (`values: true`), binding each candidate into `slot`.
    /// Vacuously true on an empty container.
    Scan {
        source: ValueRef,
        slot: u16,
        values: bool,
        mode: ScanMode,
        inner: Box<CheckExpr>,
    },
    /// Fixed-position list element; false when the position is absent
    At {
        source: ValueRef,
        index: usize,
        slot: u16,
        inner: Box<CheckExpr>,
    },
    /// Exact list arity
    LenIs { source: ValueRef, len: usize },
    /// Deferred forward-reference check, resolved at first evaluation
    Deferred {
        source: ValueRef,
        index: usize,
        name: String,
    },
    /// Patch point consumed during assembly; never survives compilation
    Placeholder(u32),
}

impl CheckExpr {
    /// Replace the placeholder `id` with `code`. Returns false when the
    /// placeholder is not present in this subtree.
    pub(crate) fn patch(&mut self, id: u32, code: &CheckExpr) -> bool {
        match self {
            CheckExpr::Placeholder(p) if *p == id => {
                *self = code.clone();
                true
            }
            CheckExpr::AnyOf(arms) | CheckExpr::AllOf(arms) => {
                arms.iter_mut().any(|arm| arm.patch(id, code))
            }
            CheckExpr::Bind { inner, .. }
            | CheckExpr::Scan { inner, .. }
            | CheckExpr::At { inner, .. } => inner.patch(id, code),
            _ => false,
        }
    }

    /// Whether any unpatched hole remains in this subtree
    pub(crate) fn has_placeholders(&self) -> bool {
        match self {
            CheckExpr::Placeholder(_) => true,
            CheckExpr::AnyOf(arms) | CheckExpr::AllOf(arms) => {
                arms.iter().any(|arm| arm.has_placeholders())
            }
            CheckExpr::Bind { inner, .. }
            | CheckExpr::Scan { inner, .. }
            | CheckExpr::At { inner, .. } => inner.has_placeholders(),
            _ => false,
        }
    }
}

// =============================================================================
// Rendering
// =============================================================================

pub(crate) fn render_types(types: &[TypeId]) -> String {
    types
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(" | ")
}

impl fmt::Display for CheckExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckExpr::Accept => write!(f, "true"),
            CheckExpr::TypeIs { source, types } => {
                write!(f, "is({}, {})", source, render_types(types))
            }
            CheckExpr::AnyOf(arms) => {
                write!(f, "(")?;
                for (i, arm) in arms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "{}", arm)?;
                }
                write!(f, ")")
            }
            CheckExpr::AllOf(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " and ")?;
                    }
                    write!(f, "{}", part)?;
                }
                write!(f, ")")
            }
            CheckExpr::Bind {
                source,
                slot,
                inner,
            } => write!(f, "(let v{} = {} in {})", slot, source, inner),
            CheckExpr::Scan {
                source,
                slot,
                values,
                mode,
                inner,
            } => {
                let what = if *values { "value" } else { "item" };
                match mode {
                    ScanMode::First => {
                        write!(f, "(first {} of {} as v{}: {})", what, source, slot, inner)
                    }
                    ScanMode::Deadline => {
                        write!(f, "(each {} of {} as v{}: {})", what, source, slot, inner)
                    }
                }
            }
            CheckExpr::At {
                source,
                index,
                slot,
                inner,
            } => write!(f, "({}[{}] as v{}: {})", source, index, slot, inner),
            CheckExpr::LenIs { source, len } => write!(f, "len({}) == {}", source, len),
            CheckExpr::Deferred { source, name, .. } => {
                write!(f, "ref('{}')({})", name, source)
            }
            CheckExpr::Placeholder(id) => write!(f, "<hole#{}>", id),
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Mutable state threaded through one evaluation of a program.
pub(crate) struct EvalCtx<'p, 'v> {
    pub root: &'v Value,
    pub slots: Vec<Option<&'v Value>>,
    pub deferred: &'p [DeferredRef],
    pub config: &'p std::sync::Arc<CheckConfig>,
    /// Deadline for linear scans, computed once per validation
    pub deadline: Option<Instant>,
}

impl<'p, 'v> EvalCtx<'p, 'v> {
    pub(crate) fn resolve(&self, source: ValueRef) -> Result<&'v Value> {
        match source {
            ValueRef::Root => Ok(self.root),
            ValueRef::Slot(n) => self.slots.get(n as usize).copied().flatten().ok_or_else(|| {
                ConformError::Internal(format!("binding v{} read before it was written", n))
            }),
        }
    }
}

impl CheckExpr {
    /// Evaluate this expression against the context's value.
    ///
    /// Returns the boolean conformance answer; errors are reserved for
    /// forward-reference resolution failures and internal defects.
    pub(crate) fn eval<'p, 'v>(&self, ctx: &mut EvalCtx<'p, 'v>) -> Result<bool> {
        match self {
            CheckExpr::Accept => Ok(true),
            CheckExpr::TypeIs { source, types } => {
                let value = ctx.resolve(*source)?;
                Ok(types.iter().any(|t| t.matches(value)))
            }
            CheckExpr::AnyOf(arms) => {
                for arm in arms {
                    if arm.eval(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            CheckExpr::AllOf(parts) => {
                for part in parts {
                    if !part.eval(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            CheckExpr::Bind {
                source,
                slot,
                inner,
            } => {
                let value = ctx.resolve(*source)?;
                ctx.slots[*slot as usize] = Some(value);
                inner.eval(ctx)
            }
            CheckExpr::Scan {
                source,
                slot,
                values,
                mode,
                inner,
            } => {
                let value = ctx.resolve(*source)?;
                match (value, values) {
                    (Value::Array(items), false) => {
                        scan_elements(items.iter(), *slot, *mode, inner, ctx)
                    }
                    (Value::Object(map), true) => {
                        scan_elements(map.values(), *slot, *mode, inner, ctx)
                    }
                    // Wrong container shape: the conjoined origin test already
                    // failed, so this branch is unreachable under AllOf; treat
                    // as vacuous.
                    _ => Ok(true),
                }
            }
            CheckExpr::At {
                source,
                index,
                slot,
                inner,
            } => {
                let value = ctx.resolve(*source)?;
                match value.as_array().and_then(|items| items.get(*index)) {
                    None => Ok(false),
                    Some(element) => {
                        ctx.slots[*slot as usize] = Some(element);
                        inner.eval(ctx)
                    }
                }
            }
            CheckExpr::LenIs { source, len } => {
                let value = ctx.resolve(*source)?;
                Ok(value.as_array().map(|items| items.len() == *len).unwrap_or(false))
            }
            CheckExpr::Deferred { source, index, .. } => {
                let value = ctx.resolve(*source)?;
                ctx.deferred[*index].check(value, ctx.config)
            }
            CheckExpr::Placeholder(id) => Err(ConformError::Internal(format!(
                "unpatched placeholder #{} evaluated",
                id
            ))),
        }
    }
}

fn scan_elements<'p, 'v>(
    mut elements: impl Iterator<Item = &'v Value>,
    slot: u16,
    mode: ScanMode,
    inner: &CheckExpr,
    ctx: &mut EvalCtx<'p, 'v>,
) -> Result<bool> {
    match mode {
        ScanMode::First => match elements.next() {
            // Empty container: no representative exists, vacuously satisfied
            None => Ok(true),
            Some(element) => {
                ctx.slots[slot as usize] = Some(element);
                inner.eval(ctx)
            }
        },
        ScanMode::Deadline => {
            for element in elements {
                if let Some(deadline) = ctx.deadline {
                    if Instant::now() >= deadline {
                        tracing::trace!("linear scan stopped at deadline");
                        break;
                    }
                }
                ctx.slots[slot as usize] = Some(element);
                if !inner.eval(ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

// =============================================================================
// Checking-time budget
// =============================================================================

/// Cumulative time spent evaluating validators process-wide, in nanoseconds.
/// The linear strategy budgets each scan as a fraction of this total so that
/// validation overhead stays proportional to work already accepted.
static CHECK_NANOS: AtomicU64 = AtomicU64::new(0);

/// Fraction of cumulative checking time one linear scan may consume
const LINEAR_BUDGET_MULTIPLIER: f64 = 0.125;

/// Floor so the first validations are never zero-budget
const LINEAR_BUDGET_FLOOR: Duration = Duration::from_micros(50);

pub(crate) fn note_check_time(elapsed: Duration) {
    CHECK_NANOS.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
}

pub(crate) fn linear_deadline(start: Instant) -> Instant {
    let cumulative = CHECK_NANOS.load(Ordering::Relaxed);
    let budget = Duration::from_nanos((cumulative as f64 * LINEAR_BUDGET_MULTIPLIER) as u64);
    start + budget.max(LINEAR_BUDGET_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckConfig;
    use serde_json::json;

    fn eval_simple(expr: &CheckExpr, value: &Value, slots: usize) -> bool {
        let config = CheckConfig::default_shared();
        let mut ctx = EvalCtx {
            root: value,
            slots: vec![None; slots],
            deferred: &[],
            config: &config,
            deadline: None,
        };
        expr.eval(&mut ctx).unwrap()
    }

    #[test]
    fn test_type_is_multi_membership() {
        let expr = CheckExpr::TypeIs {
            source: ValueRef::Root,
            types: vec![TypeId::Int, TypeId::Str],
        };
        assert!(eval_simple(&expr, &json!(5), 0));
        assert!(eval_simple(&expr, &json!("x"), 0));
        assert!(!eval_simple(&expr, &json!(5.0), 0));
    }

    #[test]
    fn test_any_of_short_circuits() {
        // second arm would error on an unpatched placeholder; the first arm
        // accepting means it is never reached
        let expr = CheckExpr::AnyOf(vec![CheckExpr::Accept, CheckExpr::Placeholder(9)]);
        assert!(eval_simple(&expr, &json!(1), 0));
    }

    #[test]
    fn test_scan_first_vacuous_on_empty() {
        let expr = CheckExpr::Scan {
            source: ValueRef::Root,
            slot: 0,
            values: false,
            mode: ScanMode::First,
            inner: Box::new(CheckExpr::TypeIs {
                source: ValueRef::Slot(0),
                types: vec![TypeId::Int],
            }),
        };
        assert!(eval_simple(&expr, &json!([]), 1));
        assert!(eval_simple(&expr, &json!([1, "not checked"]), 1));
        assert!(!eval_simple(&expr, &json!(["x"]), 1));
    }

    #[test]
    fn test_patch_replaces_single_hole() {
        let mut buffer = CheckExpr::AnyOf(vec![
            CheckExpr::TypeIs {
                source: ValueRef::Root,
                types: vec![TypeId::Int],
            },
            CheckExpr::Placeholder(1),
        ]);
        assert!(buffer.has_placeholders());
        assert!(buffer.patch(1, &CheckExpr::Accept));
        assert!(!buffer.has_placeholders());
        assert!(!buffer.patch(1, &CheckExpr::Accept));
    }

    #[test]
    fn test_rendering() {
        let expr = CheckExpr::Bind {
            source: ValueRef::Root,
            slot: 0,
            inner: Box::new(CheckExpr::AnyOf(vec![
                CheckExpr::TypeIs {
                    source: ValueRef::Slot(0),
                    types: vec![TypeId::Int, TypeId::Str],
                },
                CheckExpr::Deferred {
                    source: ValueRef::Slot(0),
                    index: 0,
                    name: "Node".to_string(),
                },
            ])),
        };
        assert_eq!(
            expr.to_string(),
            "(let v0 = v in (is(v0, int | str) or ref('Node')(v0)))"
        );
    }
}
