//! Build orchestration.
//!
//! This module drives a build pass over the topology tree:
//!
//! 1. Take the build lock for the build root
//! 2. Destroy recorded nodes that left the topology, deepest first
//! 3. Walk the tree parent first; classify, apply and commit every node
//!    while holding that node's path lock
//! 4. Report what happened to every node
//!
//! Siblings run concurrently up to the worker limit. Provisioning steps of
//! a host run one after another in step order.

mod cancel;
mod report;

pub use cancel::{CancelHandle, CancelSignal};
pub use report::{ActionCounts, BuildReport, NodeOutcome, NodeState};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::BuildSettings;
use crate::error::{BuildError, CollaboratorError, ForgeError, Result, RevisionError};
use crate::planner::{Action, BuildPlan, LiveState, PlannedAction, classify};
use crate::provider::CollaboratorRegistry;
use crate::state::{
    LOCK_RENEW_SECS, LockInfo, PathLocks, RevisionRecord, RevisionStore, generate_holder_id,
};
use crate::topology::{Node, NodeKind};

/// Attempts for a revision store call before the pass gives up.
const STORE_ATTEMPTS: u32 = 3;

/// Options for one build pass.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Node ids to rebuild regardless of their state.
    pub rebuild: HashSet<String>,
    /// Worker limit overriding the configured one.
    pub workers: Option<usize>,
    /// Build lock holder name; generated when absent.
    pub holder: Option<String>,
}

/// Drives build passes against a revision store.
pub struct Orchestrator {
    store: Arc<dyn RevisionStore>,
    registry: CollaboratorRegistry,
    workers: usize,
    locks: PathLocks,
    lock_renewal: Duration,
}

/// State shared by every node of one pass.
struct Pass {
    rebuild: HashSet<String>,
    cancel: CancelSignal,
    permits: Semaphore,
    report: Mutex<BuildReport>,
}

impl Pass {
    fn report(&self, update: impl FnOnce(&mut BuildReport)) {
        let mut report = self.report.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut report);
    }
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        store: Arc<dyn RevisionStore>,
        registry: CollaboratorRegistry,
        settings: &BuildSettings,
    ) -> Self {
        Self {
            store,
            registry,
            workers: settings.workers.max(1),
            locks: PathLocks::new(),
            lock_renewal: Duration::from_secs(LOCK_RENEW_SECS),
        }
    }

    /// Returns the revision store.
    #[must_use]
    pub fn store(&self) -> &dyn RevisionStore {
        self.store.as_ref()
    }

    /// Runs a build pass over `tree`.
    ///
    /// Node failures are reported, not returned. The pass only fails as a
    /// whole when the revision store cannot be read or written.
    ///
    /// # Errors
    ///
    /// Returns an error if the build lock cannot be taken or the revision
    /// store keeps failing.
    pub async fn build(
        &self,
        tree: &Node,
        options: &BuildOptions,
        cancel: CancelSignal,
    ) -> Result<BuildReport> {
        let holder = options.holder.clone().unwrap_or_else(generate_holder_id);
        let lock = self.acquire_build_lock(&holder).await?;

        let result = self
            .renewing_lock(&lock.lock_id, self.run_pass(tree, options, cancel))
            .await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release build lock: {e}");
        }
        result
    }

    /// Drives `work` to completion, renewing the build lock meanwhile.
    async fn renewing_lock<T>(
        &self,
        lock_id: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::pin!(work);
        let mut renew =
            tokio::time::interval_at(Instant::now() + self.lock_renewal, self.lock_renewal);

        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = renew.tick() => {
                    if let Err(e) = self.with_store_retry(|| self.store.refresh_lock(lock_id)).await {
                        error!("Failed to renew build lock {lock_id}: {e}");
                    }
                }
            }
        }
    }

    async fn run_pass(
        &self,
        tree: &Node,
        options: &BuildOptions,
        cancel: CancelSignal,
    ) -> Result<BuildReport> {
        let workers = options.workers.unwrap_or(self.workers).max(1);
        info!(
            "Starting build of {} ({} nodes, {workers} workers)",
            tree.id,
            tree.subtree_size()
        );

        let pass = Pass {
            rebuild: options.rebuild.clone(),
            cancel,
            permits: Semaphore::new(workers),
            report: Mutex::new(BuildReport::new(tree.id.clone())),
        };

        self.delete_pruned(&pass, tree).await?;
        self.visit(&pass, tree, None).await?;

        let mut report = pass
            .report
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        report.cancelled = pass.cancel.is_cancelled();
        report.finish();

        if report.cancelled {
            warn!("Build of {} cancelled", tree.id);
        } else {
            info!(
                "Build of {} finished: {} failed, {} skipped",
                tree.id, report.counts.failed, report.counts.skipped
            );
        }
        Ok(report)
    }

    /// Classifies every node without applying anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the revision store cannot be read.
    pub async fn plan(&self, tree: &Node, options: &BuildOptions) -> Result<BuildPlan> {
        let mut plan = BuildPlan::new(tree.id.clone());

        for record in self.pruned_records(tree).await? {
            let classification = classify(&record.id, None, Some(&record))?;
            plan.actions.push(PlannedAction {
                id: record.id.clone(),
                kind: record.kind,
                action: classification.action,
                reason: classification.reason.to_string(),
                checksum: None,
                stored_checksum: Some(record.checksum),
            });
        }

        for node in tree.walk() {
            let path = self.store.path_for(&node.id, node.kind());
            let stored = self.load_record(&path).await?;
            let live = LiveState {
                fingerprint: node.fingerprint(),
                rebuild: options.rebuild.contains(&node.id),
            };
            let classification = classify(&node.id, Some(live), stored.as_ref())?;
            plan.actions.push(PlannedAction {
                id: node.id.clone(),
                kind: node.kind(),
                action: classification.action,
                reason: classification.reason.to_string(),
                checksum: Some(live.fingerprint),
                stored_checksum: stored.map(|r| r.checksum),
            });
        }

        debug!("Planned {} actions for {}", plan.action_count(), tree.id);
        Ok(plan)
    }

    /// Invalidates a node's record so the next pass re-applies it.
    ///
    /// # Errors
    ///
    /// Returns [`RevisionError::NotFound`] if the node has no record, or an
    /// error if the build lock or the store fails.
    pub async fn taint(&self, id: &str, kind: NodeKind) -> Result<RevisionRecord> {
        let lock = self.acquire_build_lock(&generate_holder_id()).await?;

        let result = async {
            let path = self.store.path_for(id, kind);
            let _guard = self.locks.lock(&path).await;
            let Some(mut record) = self.load_record(&path).await? else {
                return Err(RevisionError::NotFound { id: id.to_string() }.into());
            };
            record.taint();
            self.save_record(&record, &path).await?;
            info!("Tainted {id}");
            Ok(record)
        }
        .await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release build lock: {e}");
        }
        result
    }

    /// Lists every record in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn records(&self) -> Result<Vec<RevisionRecord>> {
        self.with_store_retry(|| self.store.scan()).await
    }

    async fn acquire_build_lock(&self, holder: &str) -> Result<LockInfo> {
        self.with_store_retry(|| self.store.acquire_lock(holder))
            .await
    }

    /// Retries retryable store failures a bounded number of times.
    async fn with_store_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < STORE_ATTEMPTS => {
                    let delay = e.retry_delay_ms().unwrap_or(50);
                    warn!("Revision store call failed (attempt {attempt}), retrying in {delay}ms: {e}");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Loads a record; corrupt records count as absent.
    async fn load_record(&self, path: &Path) -> Result<Option<RevisionRecord>> {
        match self.with_store_retry(|| self.store.load(path)).await {
            Ok(record) => Ok(record),
            Err(ForgeError::Revision(RevisionError::Corrupt { path, message })) => {
                warn!(
                    "Treating corrupt revision record {} as absent: {message}",
                    path.display()
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn save_record(&self, record: &RevisionRecord, path: &Path) -> Result<()> {
        self.with_store_retry(|| self.store.save(record, path)).await
    }

    /// Returns recorded nodes that are no longer desired, deepest first.
    async fn pruned_records(&self, tree: &Node) -> Result<Vec<RevisionRecord>> {
        let live: HashSet<PathBuf> = tree
            .walk()
            .into_iter()
            .map(|n| self.store.path_for(&n.id, n.kind()))
            .collect();

        let mut pruned: Vec<RevisionRecord> = self
            .records()
            .await?
            .into_iter()
            .filter(|r| !live.contains(&self.store.path_for(&r.id, r.kind)))
            .collect();

        pruned.sort_by(|a, b| depth(&b.id).cmp(&depth(&a.id)).then_with(|| a.id.cmp(&b.id)));
        Ok(pruned)
    }

    /// Destroys every pruned record, one depth level at a time.
    async fn delete_pruned(&self, pass: &Pass, tree: &Node) -> Result<()> {
        let pruned = self.pruned_records(tree).await?;
        if pruned.is_empty() {
            return Ok(());
        }
        info!("{} recorded nodes left the topology", pruned.len());

        let mut levels: BTreeMap<usize, Vec<RevisionRecord>> = BTreeMap::new();
        for record in pruned {
            levels.entry(depth(&record.id)).or_default().push(record);
        }

        let failed = Mutex::new(Vec::new());
        for (_, level) in levels.into_iter().rev() {
            let results = join_all(level.iter().map(|r| self.delete_one(pass, r, &failed))).await;
            for result in results {
                result?;
            }
        }
        Ok(())
    }

    async fn delete_one(
        &self,
        pass: &Pass,
        pruned: &RevisionRecord,
        failed: &Mutex<Vec<String>>,
    ) -> Result<()> {
        let (id, kind) = (pruned.id.as_str(), pruned.kind);

        if pass.cancel.is_cancelled() {
            pass.report(|r| r.skipped(id, kind, BuildError::Cancelled.to_string()));
            return Ok(());
        }

        let blocker = failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|f| is_descendant(f, id))
            .cloned();
        if let Some(child) = blocker {
            warn!("Not destroying {id}: {child} is still recorded");
            failed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(id.to_string());
            pass.report(|r| r.skipped(id, kind, format!("descendant {child} was not destroyed")));
            return Ok(());
        }

        let path = self.store.path_for(id, kind);
        let _guard = self.locks.lock(&path).await;
        let _permit = pass
            .permits
            .acquire()
            .await
            .map_err(|e| ForgeError::internal(format!("Worker pool closed: {e}")))?;

        // Re-read under the lock; another writer may have removed it.
        let Some(mut record) = self.load_record(&path).await? else {
            debug!("Record for {id} vanished before destroy");
            return Ok(());
        };

        let action = match classify(id, None, Some(&record)) {
            Ok(classification) => classification.action,
            Err(e) => {
                pass.report(|r| r.failed(id, kind, None, e.to_string()));
                return Ok(());
            }
        };

        let outcome = match self.registry.get(kind) {
            Ok(collaborator) => {
                info!(node = %id, %kind, %action, collaborator = collaborator.name(), "Destroying");
                collaborator.destroy(&record, &pass.cancel).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.with_store_retry(|| self.store.remove(&path)).await?;
                pass.report(|r| r.committed(id, kind, action));
                Ok(())
            }
            Err(e) => {
                record.mark_failed();
                self.save_record(&record, &path).await?;
                failed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(id.to_string());

                let failure = BuildError::Collaborator {
                    id: id.to_string(),
                    action: action.to_string(),
                    reason: e.to_string(),
                };
                error!("{failure}");
                pass.report(|r| r.failed(id, kind, Some(action), failure.to_string()));
                Ok(())
            }
        }
    }

    /// Processes `node`, then its subtree.
    ///
    /// Resolves to whether `node` committed or was already up to date.
    fn visit<'a>(
        &'a self,
        pass: &'a Pass,
        node: &'a Node,
        blocked_by: Option<&'a str>,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            let ready = if pass.cancel.is_cancelled() {
                pass.report(|r| r.skipped(&node.id, node.kind(), BuildError::Cancelled.to_string()));
                false
            } else if let Some(parent) = blocked_by {
                let blocked = BuildError::DependencyBlocked {
                    id: node.id.clone(),
                    parent: parent.to_string(),
                };
                debug!("{blocked}");
                pass.report(|r| r.skipped(&node.id, node.kind(), blocked.to_string()));
                false
            } else {
                self.process(pass, node).await?
            };

            let child_block = if ready {
                None
            } else {
                Some(blocked_by.unwrap_or(node.id.as_str()))
            };

            let (ordered, unordered): (Vec<&Node>, Vec<&Node>) = node
                .children()
                .iter()
                .partition(|c| c.kind().is_ordered());

            let sequence = async {
                let mut block = child_block;
                for step in ordered {
                    let committed = self.visit(pass, step, block).await?;
                    if !committed && block.is_none() {
                        block = Some(step.id.as_str());
                    }
                }
                Ok::<(), ForgeError>(())
            };
            let siblings = join_all(
                unordered
                    .into_iter()
                    .map(|child| self.visit(pass, child, child_block)),
            );

            let (sequence, siblings) = futures::join!(sequence, siblings);
            sequence?;
            for result in siblings {
                result?;
            }

            Ok(ready)
        }
        .boxed()
    }

    /// Classifies, applies and commits one node under its path lock.
    async fn process(&self, pass: &Pass, node: &Node) -> Result<bool> {
        let kind = node.kind();
        let path = self.store.path_for(&node.id, kind);

        let _guard = self.locks.lock(&path).await;
        let _permit = pass
            .permits
            .acquire()
            .await
            .map_err(|e| ForgeError::internal(format!("Worker pool closed: {e}")))?;

        if pass.cancel.is_cancelled() {
            pass.report(|r| r.skipped(&node.id, kind, BuildError::Cancelled.to_string()));
            return Ok(false);
        }

        let stored = self.load_record(&path).await?;
        let live = LiveState {
            fingerprint: node.fingerprint(),
            rebuild: pass.rebuild.contains(&node.id),
        };

        let classification = match classify(&node.id, Some(live), stored.as_ref()) {
            Ok(classification) => classification,
            Err(e) => {
                error!("{e}");
                pass.report(|r| r.failed(&node.id, kind, None, e.to_string()));
                return Ok(false);
            }
        };
        let action = classification.action;
        debug!(node = %node.id, %kind, %action, reason = classification.reason, "Classified");

        match action {
            Action::Noop => {
                pass.report(|r| r.unchanged(&node.id, kind));
                return Ok(true);
            }
            Action::Delete => {
                let e = BuildError::ClassificationAmbiguous {
                    id: node.id.clone(),
                    reason: String::from("desired node classified for deletion"),
                };
                error!("{e}");
                pass.report(|r| r.failed(&node.id, kind, Some(action), e.to_string()));
                return Ok(false);
            }
            Action::Create | Action::Touch | Action::Rebuild => {}
        }

        let mut record = stored.unwrap_or_else(|| RevisionRecord::new(node.id.clone(), kind));
        record.id.clone_from(&node.id);
        record.kind = kind;
        let prior_id = record.external_id.clone();

        let outcome = match self.registry.get(kind) {
            Ok(collaborator) => {
                info!(node = %node.id, %kind, %action, collaborator = collaborator.name(), "Applying");
                collaborator
                    .apply(node, action, &prior_id, &pass.cancel)
                    .await
                    .and_then(|returned| settle_external_id(returned, &prior_id))
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(external_id) => {
                record.checksum = live.fingerprint;
                record.set_vars(&node.scope_vars);
                if external_id == prior_id {
                    record.touch();
                } else {
                    record.touch_with_id(external_id);
                }
                self.save_record(&record, &path).await?;
                pass.report(|r| r.committed(&node.id, kind, action));
                Ok(true)
            }
            Err(e) => {
                // The checksum stays at its prior value so the next pass retries.
                record.mark_failed();
                self.save_record(&record, &path).await?;

                let failure = BuildError::Collaborator {
                    id: node.id.clone(),
                    action: action.to_string(),
                    reason: e.to_string(),
                };
                if e.is_cancelled() {
                    warn!("{failure}");
                } else {
                    error!("{failure}");
                }
                pass.report(|r| r.failed(&node.id, kind, Some(action), failure.to_string()));
                Ok(false)
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store.backend_type())
            .field("registry", &self.registry)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

/// Picks the id to record after an apply.
///
/// A blank id keeps the one on record; a node with no id on record must be
/// given one.
fn settle_external_id(returned: String, prior: &str) -> Result<String> {
    if !returned.trim().is_empty() {
        return Ok(returned);
    }
    if prior.is_empty() {
        return Err(CollaboratorError::permanent("collaborator returned no external id").into());
    }
    Ok(prior.to_string())
}

fn depth(id: &str) -> usize {
    id.split('/').count()
}

fn is_descendant(candidate: &str, ancestor: &str) -> bool {
    candidate
        .strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}
