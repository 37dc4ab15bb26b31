//! Schema fingerprints for compiled-validator cache keys

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::schema::{SchemaNode, SubstitutionTable};

/// SHA256 fingerprint of a schema's canonical rendering.
///
/// The deterministic textual rendering doubles as the structural hash, so
/// dynamically constructed schemas fingerprint identically to equal
/// hand-built ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute a fingerprint from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute a fingerprint from a string
    pub fn from_text(content: &str) -> Self {
        Self::from_bytes(content.as_bytes())
    }

    /// Fingerprint of a schema alone
    pub fn of_schema(schema: &SchemaNode) -> Self {
        Self::from_text(&schema.render())
    }

    /// Fingerprint of a compile request: the schema plus any root
    /// type-variable substitutions, which change the generated code.
    pub fn of_request(schema: &SchemaNode, substitutions: &SubstitutionTable) -> Self {
        if substitutions.is_empty() {
            return Self::of_schema(schema);
        }
        let mut text = schema.render();
        let mut names: Vec<&String> = substitutions.keys().collect();
        names.sort();
        for name in names {
            text.push('\n');
            text.push('$');
            text.push_str(name);
            text.push('=');
            text.push_str(&substitutions[name].render());
        }
        Self::from_text(&text)
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeId;

    #[test]
    fn test_fingerprint_consistency() {
        let a = SchemaNode::union(vec![
            SchemaNode::leaf(TypeId::Int),
            SchemaNode::leaf(TypeId::Str),
        ]);
        let b = SchemaNode::union(vec![
            SchemaNode::leaf(TypeId::Int),
            SchemaNode::leaf(TypeId::Str),
        ]);
        assert_eq!(Fingerprint::of_schema(&a), Fingerprint::of_schema(&b));
    }

    #[test]
    fn test_fingerprint_differs_by_structure() {
        let a = SchemaNode::leaf(TypeId::Int);
        let b = SchemaNode::leaf(TypeId::Str);
        assert_ne!(Fingerprint::of_schema(&a), Fingerprint::of_schema(&b));
    }

    #[test]
    fn test_fingerprint_includes_substitutions() {
        let schema = SchemaNode::type_var("T");
        let empty = SubstitutionTable::new();
        let mut subs = SubstitutionTable::new();
        subs.insert("T".to_string(), SchemaNode::leaf(TypeId::Int));

        assert_ne!(
            Fingerprint::of_request(&schema, &empty),
            Fingerprint::of_request(&schema, &subs)
        );
    }
}
