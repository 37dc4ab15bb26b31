//! Error types for schema compilation and validation

use thiserror::Error;

/// Result type for compile and validate operations
pub type Result<T> = std::result::Result<T, ConformError>;

/// Errors raised by the compiler or by a compiled validator.
///
/// Validation failures (`Violation`) are the expected common-case "no" answer;
/// every other variant signals a defect in the schema, its scopes, or the
/// caller's inputs. Compile errors are never retried.
#[derive(Error, Debug)]
pub enum ConformError {
    #[error("{context}: malformed schema: {reason}")]
    MalformedSchema { context: String, reason: String },

    #[error("{context}: unsupported schema node: {reason}")]
    UnsupportedNode { context: String, reason: String },

    #[error("unresolved forward reference '{name}' in scope '{scope}'")]
    UnresolvedRef { name: String, scope: String },

    #[error("unknown schema scope: {0}")]
    UnknownScope(String),

    #[error("value does not conform: {0}")]
    Violation(#[from] Violation),

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConformError {
    /// Whether this error is a value non-conformance rather than a
    /// compiler-level or resolution-level defect.
    pub fn is_violation(&self) -> bool {
        matches!(self, ConformError::Violation(_))
    }
}

/// Structured record of a failed validation.
///
/// Carries enough context for an external formatter to build a human-readable
/// message: the diagnostic label the validator was compiled under, the
/// rendering of the sub-expression at the failure frontier, and a truncated
/// sample of the offending value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{context}: {sample} does not satisfy {expected}")]
pub struct Violation {
    /// Exception-context label supplied at compile time
    pub context: String,
    /// Rendering of the failed sub-expression
    pub expected: String,
    /// Truncated single-line sample of the offending value
    pub sample: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_display() {
        let v = Violation {
            context: "argument 'x'".to_string(),
            expected: "is(v, int | str)".to_string(),
            sample: "5.0".to_string(),
        };
        let msg = v.to_string();
        assert!(msg.contains("argument 'x'"));
        assert!(msg.contains("is(v, int | str)"));
    }

    #[test]
    fn test_violation_kind_distinguishable() {
        let violation: ConformError = Violation {
            context: "value".to_string(),
            expected: "is(v, int)".to_string(),
            sample: "\"x\"".to_string(),
        }
        .into();
        assert!(violation.is_violation());

        let resolve = ConformError::UnresolvedRef {
            name: "Node".to_string(),
            scope: "tree".to_string(),
        };
        assert!(!resolve.is_violation());
    }
}
