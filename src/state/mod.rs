//! Revision state module for the rangeforge build engine.
//!
//! This module provides persistent per-node revision records, recording what
//! was last applied for every node of the topology, together with the locks
//! that keep concurrent writers apart.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LocalRevisionStore, RECORD_EXTENSION};
pub use lock::{
    LOCK_EXPIRY_SECS, LOCK_RENEW_SECS, LockInfo, PathGuard, PathLocks, generate_holder_id,
};
pub use store::RevisionStore;
pub use types::{RevStatus, RevisionRecord};

#[cfg(test)]
pub use store::MockRevisionStore;
