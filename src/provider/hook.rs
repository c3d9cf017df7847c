//! Shell hook collaborator.
//!
//! Realizes nodes by running a configured command per node kind. The node
//! is described to the command through environment variables; the last
//! non-empty line the command prints is taken as the external id.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::Collaborator;
use super::retry::{RetryPolicy, retry_with_backoff};
use crate::config::HookConfig;
use crate::error::{CollaboratorError, ForgeError, Result};
use crate::orchestrator::CancelSignal;
use crate::planner::Action;
use crate::state::RevisionRecord;
use crate::topology::{NodeKind, Node};

/// Exit status signalling a temporary failure (`EX_TEMPFAIL`).
pub const EXIT_TEMPFAIL: i32 = 75;

/// Runs shell commands to apply and destroy nodes.
#[derive(Debug, Clone)]
pub struct HookCollaborator {
    apply: String,
    destroy: Option<String>,
    workdir: Option<PathBuf>,
    policy: RetryPolicy,
}

impl HookCollaborator {
    /// Creates a hook collaborator from its configuration.
    #[must_use]
    pub fn new(config: &HookConfig, policy: RetryPolicy) -> Self {
        Self {
            apply: config.apply.clone(),
            destroy: config.destroy.clone(),
            workdir: None,
            policy,
        }
    }

    /// Runs hooks from `dir` instead of the current directory.
    #[must_use]
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    fn shell(script: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(script);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            cmd
        }
    }

    /// Runs one attempt of a hook and returns its stdout.
    async fn run(&self, script: &str, env: &HashMap<String, String>) -> Result<String> {
        let mut cmd = Self::shell(script);
        cmd.envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|e| {
            ForgeError::Collaborator(CollaboratorError::permanent(format!(
                "Failed to spawn hook '{script}': {e}"
            )))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim().lines().last().unwrap_or_default().to_string();
        let message = match output.status.code() {
            Some(code) => format!("hook exited with status {code}: {detail}"),
            None => format!("hook terminated by signal: {detail}"),
        };

        Err(match output.status.code() {
            Some(EXIT_TEMPFAIL) => CollaboratorError::transient(message),
            _ => CollaboratorError::permanent(message),
        }
        .into())
    }
}

/// Builds the environment handed to a hook.
fn hook_env(
    id: &str,
    kind: NodeKind,
    action: &str,
    external_id: &str,
    vars: impl IntoIterator<Item = (String, String)>,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = vars
        .into_iter()
        .map(|(k, v)| (format!("RANGEFORGE_VAR_{}", env_key(&k)), v))
        .collect();
    env.insert(String::from("RANGEFORGE_NODE_ID"), id.to_string());
    env.insert(String::from("RANGEFORGE_KIND"), kind.to_string());
    env.insert(String::from("RANGEFORGE_ACTION"), action.to_string());
    env.insert(String::from("RANGEFORGE_EXTERNAL_ID"), external_id.to_string());
    env
}

fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Returns the last non-empty line of a hook's output.
fn external_id_from(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Collaborator for HookCollaborator {
    async fn apply(
        &self,
        node: &Node,
        action: Action,
        external_id: &str,
        cancel: &CancelSignal,
    ) -> Result<String> {
        let mut env = hook_env(
            &node.id,
            node.kind(),
            &action.to_string(),
            external_id,
            node.scope_vars.clone(),
        );
        let spec = serde_json::to_string(&node.spec).map_err(|e| {
            ForgeError::Collaborator(CollaboratorError::permanent(format!(
                "Failed to encode node {}: {e}",
                node.id
            )))
        })?;
        env.insert(String::from("RANGEFORGE_NODE_JSON"), spec);

        debug!("Running apply hook for {}", node.id);
        let stdout = retry_with_backoff(&self.policy, cancel, |_| self.run(&self.apply, &env)).await?;

        // Hooks that print nothing keep the resource's current identity.
        let id = external_id_from(&stdout).unwrap_or_else(|| {
            if external_id.is_empty() {
                format!("hook:{}", node.id)
            } else {
                external_id.to_string()
            }
        });
        info!("Hook applied {} -> {id}", node.id);
        Ok(id)
    }

    async fn destroy(&self, record: &RevisionRecord, cancel: &CancelSignal) -> Result<()> {
        let Some(script) = &self.destroy else {
            debug!("No destroy hook for {}, nothing to remove", record.id);
            return Ok(());
        };

        let env = hook_env(
            &record.id,
            record.kind,
            &Action::Delete.to_string(),
            &record.external_id,
            record.vars.clone(),
        );

        debug!("Running destroy hook for {}", record.id);
        retry_with_backoff(&self.policy, cancel, |_| self.run(script, &env)).await?;
        info!("Hook destroyed {}", record.id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "hook"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::topology::NodeSpec;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            deadline: Duration::from_secs(10),
        }
    }

    fn hook(apply: &str, destroy: Option<&str>) -> HookCollaborator {
        HookCollaborator::new(
            &HookConfig {
                apply: apply.to_string(),
                destroy: destroy.map(str::to_string),
            },
            policy(),
        )
    }

    fn node() -> Node {
        let mut node = Node::new(
            "teams/0/networks/corp",
            "corp",
            NodeSpec::Network {
                cidr: String::from("10.0.1.0/24"),
                vpn: false,
            },
        );
        node.scope_vars
            .insert(String::from("team-number"), String::from("0"));
        node
    }

    #[test]
    fn test_external_id_is_last_non_empty_line() {
        assert_eq!(
            external_id_from("creating...\nvpc-123\n\n").as_deref(),
            Some("vpc-123")
        );
        assert_eq!(external_id_from("\n  \n"), None);
    }

    #[tokio::test]
    async fn test_apply_exports_node_environment() {
        let hook = hook(
            "echo progress; echo \"$RANGEFORGE_KIND:$RANGEFORGE_ACTION:$RANGEFORGE_VAR_TEAM_NUMBER\"",
            None,
        );
        let id = hook
            .apply(&node(), Action::Create, "", &CancelSignal::never())
            .await
            .expect("hook succeeds");
        assert_eq!(id, "network:create:0");
    }

    #[tokio::test]
    async fn test_silent_hook_keeps_existing_id() {
        let hook = hook("true", None);
        let id = hook
            .apply(&node(), Action::Touch, "vpc-9", &CancelSignal::never())
            .await
            .expect("hook succeeds");
        assert_eq!(id, "vpc-9");
    }

    #[tokio::test]
    async fn test_permanent_failure() {
        let hook = hook("echo boom >&2; exit 3", None);
        let err = hook
            .apply(&node(), Action::Create, "", &CancelSignal::never())
            .await
            .expect_err("hook fails");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_tempfail_is_retried() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        // Fails with EX_TEMPFAIL until the marker file exists.
        let hook = hook(
            "if [ -f marker ]; then echo i-42; else touch marker; exit 75; fi",
            None,
        )
        .with_workdir(dir.path());

        let id = hook
            .apply(&node(), Action::Create, "", &CancelSignal::never())
            .await
            .expect("second attempt succeeds");
        assert_eq!(id, "i-42");
    }

    #[tokio::test]
    async fn test_destroy_without_hook_is_noop() {
        let hook = hook("true", None);
        let record = RevisionRecord::new("users/ops", NodeKind::User);
        hook.destroy(&record, &CancelSignal::never())
            .await
            .expect("nothing to destroy");
    }

    #[tokio::test]
    async fn test_destroy_receives_external_id() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let hook = hook("true", Some("echo \"$RANGEFORGE_EXTERNAL_ID\" > destroyed"))
            .with_workdir(dir.path());
        let mut record = RevisionRecord::new("users/ops", NodeKind::User);
        record.touch_with_id("iam-ops");

        hook.destroy(&record, &CancelSignal::never())
            .await
            .expect("destroy succeeds");
        let written = std::fs::read_to_string(dir.path().join("destroyed")).expect("marker");
        assert_eq!(written.trim(), "iam-ops");
    }
}
