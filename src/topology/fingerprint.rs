//! Node fingerprinting for change detection.
//!
//! A fingerprint is a 64-bit digest of a node's canonical attribute set.
//! Maps are hashed in key order so insertion order never matters; lists are
//! hashed in their declared order so reordering them is a change.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::kind::NodeKind;

/// Checksum stamped on tainted records.
///
/// [`fingerprint`] never produces this value.
pub const TAINT_CHECKSUM: u64 = u64::MAX;

/// The attributes of a node that affect the realized resource.
///
/// Children and runtime-only fields are never part of the canonical set, so
/// a child's change does not re-fingerprint its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalAttrs {
    kind: NodeKind,
    fields: Vec<(String, String)>,
}

impl CanonicalAttrs {
    /// Starts an attribute set for a node of the given kind.
    #[must_use]
    pub const fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            fields: Vec::new(),
        }
    }

    /// Adds a scalar field.
    #[must_use]
    pub fn field(mut self, name: &str, value: impl ToString) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    /// Adds an optional field; `None` is distinct from an empty string.
    #[must_use]
    pub fn optional(mut self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.fields.push((format!("{name}?"), v.to_string())),
            None => self.fields.push((format!("{name}!"), String::new())),
        }
        self
    }

    /// Adds an ordered list; element positions are part of the digest.
    #[must_use]
    pub fn list(mut self, name: &str, values: &[String]) -> Self {
        self.fields.push((format!("{name}#"), values.len().to_string()));
        for (i, value) in values.iter().enumerate() {
            self.fields.push((format!("{name}[{i}]"), value.clone()));
        }
        self
    }

    /// Adds an unordered map; entries are sorted by key.
    #[must_use]
    pub fn map(mut self, name: &str, values: &HashMap<String, String>) -> Self {
        let mut entries: Vec<_> = values.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        self.fields.push((format!("{name}#"), entries.len().to_string()));
        for (key, value) in entries {
            self.fields.push((format!("{name}.{key}"), value.clone()));
        }
        self
    }

    /// Returns the kind the attributes describe.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Returns the fields in digest order.
    #[must_use]
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

/// Computes the fingerprint of a canonical attribute set.
///
/// Every name and value is length-prefixed so adjacent fields cannot alias.
#[must_use]
pub fn fingerprint(attrs: &CanonicalAttrs) -> u64 {
    let mut hasher = Sha256::new();

    write_part(&mut hasher, attrs.kind.as_str());
    for (name, value) in &attrs.fields {
        write_part(&mut hasher, name);
        write_part(&mut hasher, value);
    }

    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let value = u64::from_be_bytes(head);

    if value == TAINT_CHECKSUM { value ^ 1 } else { value }
}

fn write_part(hasher: &mut Sha256, part: &str) {
    hasher.update((part.len() as u64).to_be_bytes());
    hasher.update(part.as_bytes());
}

/// Renders a checksum as fixed-width hex for display.
#[must_use]
pub fn short_checksum(checksum: u64) -> String {
    hex::encode(checksum.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (k, v) in pairs {
            map.insert((*k).to_string(), (*v).to_string());
        }
        map
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let attrs = CanonicalAttrs::new(NodeKind::Host)
            .field("name", "dc01")
            .field("os", "w2k16");

        assert_eq!(fingerprint(&attrs), fingerprint(&attrs.clone()));
    }

    #[test]
    fn test_map_order_does_not_matter() {
        let mut forward = HashMap::new();
        let mut backward = HashMap::new();
        let keys: Vec<String> = (0..64).map(|i| format!("key{i}")).collect();
        for key in &keys {
            forward.insert(key.clone(), format!("v-{key}"));
        }
        for key in keys.iter().rev() {
            backward.insert(key.clone(), format!("v-{key}"));
        }

        let a = CanonicalAttrs::new(NodeKind::Network).map("vars", &forward);
        let b = CanonicalAttrs::new(NodeKind::Network).map("vars", &backward);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_list_order_matters() {
        let a = CanonicalAttrs::new(NodeKind::DnsRecord)
            .list("values", &[String::from("10.0.0.1"), String::from("10.0.0.2")]);
        let b = CanonicalAttrs::new(NodeKind::DnsRecord)
            .list("values", &[String::from("10.0.0.2"), String::from("10.0.0.1")]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_adjacent_fields_do_not_alias() {
        let a = CanonicalAttrs::new(NodeKind::User)
            .field("a", "bc")
            .field("d", "");
        let b = CanonicalAttrs::new(NodeKind::User)
            .field("a", "b")
            .field("cd", "");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_kind_is_part_of_digest() {
        let a = CanonicalAttrs::new(NodeKind::Team).field("index", 0);
        let b = CanonicalAttrs::new(NodeKind::User).field("index", 0);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_optional_none_differs_from_empty() {
        let a = CanonicalAttrs::new(NodeKind::Host).optional("ami", None);
        let b = CanonicalAttrs::new(NodeKind::Host).optional("ami", Some(""));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_map_value_change_detected() {
        let a = CanonicalAttrs::new(NodeKind::Host).map("tags", &vars(&[("owner", "blue")]));
        let b = CanonicalAttrs::new(NodeKind::Host).map("tags", &vars(&[("owner", "red")]));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_short_checksum_width() {
        assert_eq!(short_checksum(1), "0000000000000001");
        assert_eq!(short_checksum(TAINT_CHECKSUM).len(), 16);
    }
}
