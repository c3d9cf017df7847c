//! Collaborator for nodes with no external realization.

use async_trait::async_trait;
use tracing::debug;

use super::Collaborator;
use crate::error::Result;
use crate::orchestrator::CancelSignal;
use crate::planner::Action;
use crate::state::RevisionRecord;
use crate::topology::Node;

/// Prefix of the external ids handed out by [`LogicalCollaborator`].
pub const LOGICAL_PREFIX: &str = "logical:";

/// Records grouping nodes (environment, competition, teams) without
/// calling out to anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogicalCollaborator;

#[async_trait]
impl Collaborator for LogicalCollaborator {
    async fn apply(
        &self,
        node: &Node,
        action: Action,
        _external_id: &str,
        _cancel: &CancelSignal,
    ) -> Result<String> {
        debug!("Logical {action} of {}", node.id);
        Ok(format!("{LOGICAL_PREFIX}{}", node.id))
    }

    async fn destroy(&self, record: &RevisionRecord, _cancel: &CancelSignal) -> Result<()> {
        debug!("Logical delete of {}", record.id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logical"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::NodeSpec;

    #[tokio::test]
    async fn test_logical_ids_are_deterministic() {
        let node = Node::new("teams/3", "team-3", NodeSpec::Team { index: 3 });
        let collaborator = LogicalCollaborator;
        let signal = CancelSignal::never();

        let first = collaborator
            .apply(&node, Action::Create, "", &signal)
            .await
            .expect("apply");
        let second = collaborator
            .apply(&node, Action::Touch, &first, &signal)
            .await
            .expect("apply");

        assert_eq!(first, "logical:teams/3");
        assert_eq!(first, second);
    }
}
