//! Read-only tree rendering for diagnostics.

use std::fmt::Write;

use super::fingerprint::short_checksum;
use super::node::Node;

/// Renders a node and its descendants as an indented tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeFormatter {
    max_depth: Option<usize>,
    show_ids: bool,
    show_checksums: bool,
}

impl TreeFormatter {
    /// Creates a formatter with unlimited depth.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_depth: None,
            show_ids: false,
            show_checksums: false,
        }
    }

    /// Limits rendering to `depth` levels below the root.
    #[must_use]
    pub const fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Appends each node's id to its label.
    #[must_use]
    pub const fn with_ids(mut self, show: bool) -> Self {
        self.show_ids = show;
        self
    }

    /// Appends each node's fingerprint to its label.
    #[must_use]
    pub const fn with_checksums(mut self, show: bool) -> Self {
        self.show_checksums = show;
        self
    }

    /// Renders the tree rooted at `node`.
    #[must_use]
    pub fn format(&self, node: &Node) -> String {
        let mut out = String::new();
        self.write_line(&mut out, "", node);
        self.write_children(&mut out, node, "", 1);
        out
    }

    fn write_children(&self, out: &mut String, node: &Node, prefix: &str, depth: usize) {
        let children = node.children();
        if children.is_empty() {
            return;
        }

        if self.max_depth.is_some_and(|max| depth > max) {
            let _ = writeln!(out, "{prefix}└── … {} more", node.subtree_size() - 1);
            return;
        }

        for (i, child) in children.iter().enumerate() {
            let last = i + 1 == children.len();
            let branch = if last { "└── " } else { "├── " };
            self.write_line(out, &format!("{prefix}{branch}"), child);

            let next = format!("{prefix}{}", if last { "    " } else { "│   " });
            self.write_children(out, child, &next, depth + 1);
        }
    }

    fn write_line(&self, out: &mut String, prefix: &str, node: &Node) {
        let _ = write!(out, "{prefix}{}", node.label());
        if self.show_ids {
            let _ = write!(out, " [{}]", node.id);
        }
        if self.show_checksums {
            let _ = write!(out, " #{}", short_checksum(node.fingerprint()));
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::NodeSpec;

    fn tree() -> Node {
        let mut root = Node::new(
            "range",
            "range",
            NodeSpec::Team { index: 0 },
        );
        let mut net = Node::new(
            "teams/0/networks/corp",
            "corp",
            NodeSpec::Network {
                cidr: String::from("10.0.1.0/24"),
                vpn: false,
            },
        );
        net.children.push(Node::new(
            "teams/0/networks/corp/hosts/web",
            "web",
            NodeSpec::Team { index: 1 },
        ));
        root.children.push(net);
        root.children.push(Node::new("users/ops", "ops", NodeSpec::User {
            email: String::new(),
        }));
        root
    }

    #[test]
    fn test_format_full_tree() {
        let out = TreeFormatter::new().format(&tree());
        let expected = "\
team range
├── network corp (10.0.1.0/24)
│   └── team web
└── user ops
";
        assert_eq!(out, expected);
    }

    #[test]
    fn test_format_depth_limit() {
        let out = TreeFormatter::new().with_max_depth(1).format(&tree());
        assert!(out.contains("network corp"));
        assert!(out.contains("… 1 more"));
        assert!(!out.contains("team web"));
    }

    #[test]
    fn test_format_with_ids() {
        let out = TreeFormatter::new().with_ids(true).format(&tree());
        assert!(out.contains("user ops [users/ops]"));
    }
}
