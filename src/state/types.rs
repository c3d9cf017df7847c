//! Revision record types.
//!
//! A revision record is the persisted last-known state of one node: what
//! was applied, when, how it went, and which external resource realizes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::topology::{NodeKind, TAINT_CHECKSUM, short_checksum};

/// Build status of a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RevStatus {
    /// Never applied, or state could not be determined.
    Unknown,
    /// Invalidated; must be re-applied.
    Stale,
    /// Applied successfully with the recorded checksum.
    Active,
    /// Classified for change but not yet applied.
    Planned,
    /// The last apply or destroy failed.
    Failed,
}

/// The persisted state of one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionRecord {
    /// Node identity.
    pub id: String,
    /// Node kind.
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Last-known status.
    pub status: RevStatus,
    /// Fingerprint of the definition at the last successful apply.
    pub checksum: u64,
    /// Time of the last status transition.
    pub timestamp: DateTime<Utc>,
    /// Identifier assigned by the system realizing the resource.
    #[serde(default)]
    pub external_id: String,
    /// Template variables.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl RevisionRecord {
    /// Creates an `UNKNOWN` record for a node that has never been seen.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            status: RevStatus::Unknown,
            checksum: 0,
            timestamp: Utc::now(),
            external_id: String::new(),
            vars: BTreeMap::new(),
        }
    }

    /// Marks the record applied.
    pub fn touch(&mut self) {
        self.status = RevStatus::Active;
        self.timestamp = Utc::now();
    }

    /// Marks the record applied and stamps the external identifier.
    pub fn touch_with_id(&mut self, external_id: impl Into<String>) {
        self.touch();
        self.external_id = external_id.into();
    }

    /// Invalidates the record so the next pass re-applies the node.
    pub fn taint(&mut self) {
        self.status = RevStatus::Stale;
        self.checksum = TAINT_CHECKSUM;
        self.timestamp = Utc::now();
    }

    /// Marks the last apply or destroy as failed, keeping the checksum.
    pub fn mark_failed(&mut self) {
        self.status = RevStatus::Failed;
        self.timestamp = Utc::now();
    }

    /// Returns true if the record was invalidated.
    #[must_use]
    pub fn is_tainted(&self) -> bool {
        self.status == RevStatus::Stale || self.checksum == TAINT_CHECKSUM
    }

    /// Returns true if the record reflects a successful apply.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == RevStatus::Active
    }

    /// Replaces the template variables.
    pub fn set_vars(&mut self, vars: &HashMap<String, String>) {
        self.vars = vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    }
}

impl fmt::Display for RevStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::Stale => "STALE",
            Self::Active => "ACTIVE",
            Self::Planned => "PLANNED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl fmt::Display for RevisionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.id, self.kind)?;
        writeln!(f, "┃ status:      {}", self.status)?;
        if self.checksum == TAINT_CHECKSUM {
            writeln!(f, "┃ checksum:    tainted")?;
        } else {
            writeln!(f, "┃ checksum:    {}", short_checksum(self.checksum))?;
        }
        writeln!(f, "┃ timestamp:   {}", self.timestamp.to_rfc3339())?;
        if !self.external_id.is_empty() {
            writeln!(f, "┃ external id: {}", self.external_id)?;
        }
        for (key, value) in &self.vars {
            writeln!(f, "┃ var {key} = {value}")?;
        }
        Ok(())
    }
}
