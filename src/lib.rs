// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # rangeforge
//!
//! A revision-tracking, incremental builder for competition and training
//! range topologies.
//!
//! ## Overview
//!
//! rangeforge expands a declarative topology (environment, teams, networks,
//! hosts, provisioning steps, DNS records, ...) into a tree of nodes and keeps
//! one revision record per node in a build root. Every build pass compares
//! each node's fingerprint with its record and only touches what changed:
//!
//! - New nodes are created, changed or tainted nodes are updated
//! - Unchanged nodes are left alone; their records are never rewritten
//! - Nodes that left the topology are destroyed, deepest first
//! - A failed node blocks its subtree, never its siblings
//!
//! ## Architecture
//!
//! 1. **Topology**: Defined in `rangeforge.yaml` and expanded into a [`topology::Node`] tree
//! 2. **Revision records**: One JSON file per node under the build root
//! 3. **Orchestrator**: Classifies every node and drives collaborators in dependency order
//!
//! ## Modules
//!
//! - [`config`]: Topology parsing and validation
//! - [`topology`]: Node tree, fingerprints and introspection
//! - [`state`]: Revision records and their store
//! - [`planner`]: Per-node classification and build plans
//! - [`provider`]: Collaborators that realize nodes
//! - [`orchestrator`]: Build passes, cancellation and reports
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! environment:
//!   id: regionals
//!   team_count: 2
//!
//! networks:
//!   - name: corp
//!     cidr: 10.0.1.0/24
//!     hosts:
//!       - name: web
//!         os: ubuntu
//!         last_octet: 10
//!         steps:
//!           - step: 1
//!             script:
//!               source: scripts/web.sh
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod state;
pub mod topology;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, TopologyConfig};
pub use error::{ForgeError, Result};
pub use orchestrator::{BuildOptions, BuildReport, CancelHandle, CancelSignal, Orchestrator};
pub use planner::{Action, BuildPlan, classify};
pub use provider::{Collaborator, CollaboratorRegistry};
pub use state::{LocalRevisionStore, RevStatus, RevisionRecord, RevisionStore};
pub use topology::{Node, NodeKind, TopologyBuilder, fingerprint};
