//! Topology model.
//!
//! This module turns a parsed topology file into a tree of typed nodes,
//! fingerprints each node for change detection, and renders the tree for
//! diagnostics.

mod builder;
mod fingerprint;
mod introspect;
mod kind;
mod node;

pub use builder::TopologyBuilder;
pub use fingerprint::{CanonicalAttrs, TAINT_CHECKSUM, fingerprint, short_checksum};
pub use introspect::TreeFormatter;
pub use kind::NodeKind;
pub use node::{HostSpec, Node, NodeSpec, StepPayload, host_address};
