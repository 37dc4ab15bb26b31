//! Conform
//!
//! Compiles declarative type schemas into executable validators for JSON
//! values: a schema is a tagged tree of unions, parametrized containers,
//! forward references, and type variables; a validator is a single flattened
//! short-circuiting check answering whether a value conforms, and why not.
//!
//! ## Features
//!
//! - **Work-queue compiler**: a breadth-first pass emits one check program
//!   per schema instead of a validator per nested level
//! - **Union flattening**: nested union alternatives dissolve into their
//!   parent, deduplicated, with shallow alternatives merged into a single
//!   membership test
//! - **Memoized compilation**: structurally identical schemas compile once
//!   per configuration, O(1) afterwards
//! - **Lazy forward references**: self-referential schemas compile to
//!   deferred calls resolved against named scopes at first use
//! - **Checking strategies**: constant-time representative sampling or
//!   time-bounded linear scans over container elements
//!
//! ## Example
//!
//! ```
//! use conform::{compile, CheckConfig, SchemaNode, TypeId};
//!
//! let schema = SchemaNode::union(vec![
//!     SchemaNode::leaf(TypeId::Int),
//!     SchemaNode::leaf(TypeId::Str),
//! ]);
//! let config = CheckConfig::default_shared();
//! let validator = compile(&schema, &config).unwrap();
//!
//! assert!(validator.is_valid(&serde_json::json!(5)).unwrap());
//! assert!(!validator.is_valid(&serde_json::json!(5.0)).unwrap());
//! ```

pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod fingerprint;
mod ir;
mod pool;
pub mod schema;
pub mod scope;
pub mod validator;

pub use cache::CacheStats;
pub use compiler::{compile, compile_labeled, compile_with};
pub use config::{CheckConfig, CheckStrategy, ColorPolicy, ConformFileConfig, SeverityPolicy};
pub use error::{ConformError, Result, Violation};
pub use fingerprint::Fingerprint;
pub use schema::{SchemaNode, SubstitutionTable, TypeId};
pub use scope::{register_schema, register_scope, SchemaScope};
pub use validator::Validator;
