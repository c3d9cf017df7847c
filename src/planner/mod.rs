//! Planning module for build passes.
//!
//! This module compares each node's desired definition with its revision
//! record and decides the action a build pass takes for it.

mod classifier;
mod plan;

pub use classifier::{Action, Classification, LiveState, classify};
pub use plan::{BuildPlan, PlannedAction};
