//! Provisioning collaborators.
//!
//! The orchestrator decides what has to change; collaborators make it
//! happen. Each node kind is served by one collaborator looked up in a
//! [`CollaboratorRegistry`].

mod hook;
mod logical;
mod retry;

pub use hook::{EXIT_TEMPFAIL, HookCollaborator};
pub use logical::{LOGICAL_PREFIX, LogicalCollaborator};
pub use retry::{RetryPolicy, retry_with_backoff};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::config::BuildSettings;
use crate::error::{CollaboratorError, Result};
use crate::orchestrator::CancelSignal;
use crate::planner::Action;
use crate::state::RevisionRecord;
use crate::topology::{Node, NodeKind};

/// Realizes and removes the external resources behind nodes.
///
/// Implementations retry transient failures themselves and must stop
/// promptly once `cancel` fires.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Creates or updates the resource behind `node`.
    ///
    /// `external_id` is the identifier on record, empty if the node was
    /// never realized. Returns the resource's identifier after the call.
    /// Calling again with unchanged input must be harmless.
    async fn apply(
        &self,
        node: &Node,
        action: Action,
        external_id: &str,
        cancel: &CancelSignal,
    ) -> Result<String>;

    /// Removes the resource described by a record whose node is no longer
    /// desired.
    async fn destroy(&self, record: &RevisionRecord, cancel: &CancelSignal) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Maps node kinds to collaborators.
#[derive(Clone, Default)]
pub struct CollaboratorRegistry {
    by_kind: HashMap<NodeKind, Arc<dyn Collaborator>>,
    fallback: Option<Arc<dyn Collaborator>>,
}

impl CollaboratorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry described by the build settings.
    ///
    /// Grouping kinds are logical; kinds with a configured hook use it; the
    /// rest fall back to logical bookkeeping.
    #[must_use]
    pub fn from_settings(settings: &BuildSettings, workdir: &Path) -> Self {
        let logical: Arc<dyn Collaborator> = Arc::new(LogicalCollaborator);
        let mut registry = Self::new().with_fallback(Arc::clone(&logical));

        for kind in [NodeKind::Environment, NodeKind::Competition, NodeKind::Team] {
            registry.register(kind, Arc::clone(&logical));
        }

        let policy = RetryPolicy::from(settings.retry);
        for (name, hook) in &settings.hooks {
            if let Some(kind) = NodeKind::from_name(name) {
                debug!("Registering hook collaborator for {kind}");
                registry.register(
                    kind,
                    Arc::new(HookCollaborator::new(hook, policy).with_workdir(workdir)),
                );
            }
        }

        registry
    }

    /// Registers a collaborator for a kind, replacing any previous one.
    pub fn register(&mut self, kind: NodeKind, collaborator: Arc<dyn Collaborator>) {
        self.by_kind.insert(kind, collaborator);
    }

    /// Sets the collaborator used for kinds with no registration.
    #[must_use]
    pub fn with_fallback(mut self, collaborator: Arc<dyn Collaborator>) -> Self {
        self.fallback = Some(collaborator);
        self
    }

    /// Returns the collaborator responsible for a kind.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError::Unregistered`] if neither a registration
    /// nor a fallback exists.
    pub fn get(&self, kind: NodeKind) -> Result<Arc<dyn Collaborator>> {
        self.by_kind
            .get(&kind)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| {
                CollaboratorError::Unregistered {
                    kind: kind.to_string(),
                }
                .into()
            })
    }
}

impl std::fmt::Debug for CollaboratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self
            .by_kind
            .iter()
            .map(|(kind, c)| format!("{kind}={}", c.name()))
            .collect();
        kinds.sort();
        f.debug_struct("CollaboratorRegistry")
            .field("by_kind", &kinds)
            .field("fallback", &self.fallback.as_ref().map(|c| c.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HookConfig;

    #[test]
    fn test_empty_registry_rejects_lookup() {
        let registry = CollaboratorRegistry::new();
        assert!(matches!(
            registry.get(NodeKind::Host),
            Err(crate::error::ForgeError::Collaborator(
                CollaboratorError::Unregistered { .. }
            ))
        ));
    }

    #[test]
    fn test_from_settings() {
        let mut settings = BuildSettings::default();
        settings.hooks.insert(
            String::from("host"),
            HookConfig {
                apply: String::from("./hooks/host.sh"),
                destroy: None,
            },
        );

        let registry = CollaboratorRegistry::from_settings(&settings, Path::new("."));
        let host = registry.get(NodeKind::Host).expect("host collaborator");
        let team = registry.get(NodeKind::Team).expect("team collaborator");
        let dns = registry.get(NodeKind::DnsRecord).expect("fallback");

        assert_eq!(host.name(), "hook");
        assert_eq!(team.name(), "logical");
        assert_eq!(dns.name(), "logical");
    }
}
