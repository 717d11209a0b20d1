//! Reconciler - the multiverse loop
//!
//! One tick per polling interval (or sooner when a worker signals observed
//! change): compute the serve set, start/stop workers, observe all six
//! universes, diff each (current, desired) pair per served root, and push
//! the filtered difference at the current side. Per-key retry state drives
//! the divergence ladder: cooldown, one-shot universe reset, then purge to
//! FAILED.

use crate::serve::ServeController;
use crate::status::StatusReporter;
use crate::universe::{Multiverse, ResourceBatch, UniverseKind};
use crate::worker::{PushOp, PushOutcome, TenantWorker, WorkerRegistry};
use fabricsync_core::{
    AgentConfig, Error, ErrorClass, ModelObject, Result, Store, TreeKind,
};
use fabricsync_fabric::{convert, maker, FabricClient};
use fabricsync_tree::{StructuredHashTree, TreeKey};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one reconciler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    /// The process must terminate with this exit code; the supervisor
    /// restarts it.
    Fatal(i32),
}

type RetryKey = (TreeKind, String, TreeKey);

#[derive(Default)]
struct RetryEntry {
    count: u32,
    last_attempt: Option<Instant>,
    last_error: Option<Error>,
}

enum Gate {
    Push { first_time: bool },
    Skip,
    Reset,
    Purge,
}

pub struct Reconciler {
    config: AgentConfig,
    store: Arc<dyn Store>,
    client: Arc<dyn FabricClient>,
    workers: Arc<WorkerRegistry>,
    multiverse: Multiverse,
    serve: ServeController,
    status: StatusReporter,
    outcome_tx: mpsc::UnboundedSender<PushOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<PushOutcome>,
    notify: Arc<Notify>,
    retry: HashMap<RetryKey, RetryEntry>,
    /// Purged keys with the desired fingerprint recorded at purge time;
    /// excluded from diffs until intent changes that fingerprint.
    purged: HashMap<RetryKey, String>,
}

impl Reconciler {
    pub fn new(
        config: AgentConfig,
        store: Arc<dyn Store>,
        client: Arc<dyn FabricClient>,
    ) -> Self {
        let workers = Arc::new(WorkerRegistry::new());
        let multiverse = Multiverse::new(store.clone(), workers.clone());
        let serve = ServeController::new(store.clone(), config.clone());
        let status = StatusReporter::new(store.clone());
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            config,
            store,
            client,
            workers,
            multiverse,
            serve,
            status,
            outcome_tx,
            outcome_rx,
            notify: Arc::new(Notify::new()),
            retry: HashMap::new(),
            purged: HashMap::new(),
        }
    }

    pub fn workers(&self) -> &Arc<WorkerRegistry> {
        &self.workers
    }

    pub fn multiverse(&self) -> &Multiverse {
        &self.multiverse
    }

    /// Run ticks until cancelled; returns an exit code on fatal conditions.
    pub async fn run(mut self, cancel: CancellationToken) -> Option<i32> {
        let code = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                result = self.tick() => match result {
                    Ok(TickOutcome::Fatal(code)) => break Some(code),
                    Ok(TickOutcome::Completed) => {}
                    // A failed tick aborts only itself.
                    Err(e) => warn!(error = %e, "reconcile tick failed"),
                },
            }
            let interval = self.config.polling_interval();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                _ = self.notify.notified() => {
                    debug!("observed state changed, reconciling early");
                }
                _ = tokio::time::sleep(interval) => {}
            }
        };
        self.shutdown().await;
        code
    }

    /// Stop every worker; called once on the way out.
    async fn shutdown(&self) {
        for root in self.workers.serving_roots() {
            if let Some(worker) = self.workers.remove(&root) {
                worker.stop().await;
            }
        }
    }

    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let roots = match self.serve.calculate().await {
            Ok(roots) => roots,
            Err(e) if e.class() == ErrorClass::SystemCritical => {
                error!(error = %e, "fatal condition while calculating serve set");
                return Ok(TickOutcome::Fatal(e.exit_code().unwrap_or(1)));
            }
            Err(e) => return Err(e),
        };
        self.sync_workers(&roots).await;
        self.serve.send_heartbeat(roots.clone()).await?;

        if let Some(code) = self.process_outcomes().await? {
            return Ok(TickOutcome::Fatal(code));
        }

        self.multiverse.observe_all(&roots).await?;

        for (current_kind, desired_kind) in UniverseKind::PAIRS {
            for root in &roots {
                // Diffing against a cold worker would act on a half-built
                // observed view.
                let warm = self
                    .workers
                    .get(root)
                    .map(|w| w.is_warm())
                    .unwrap_or(false);
                if !warm {
                    continue;
                }
                self.reconcile_root(current_kind, desired_kind, root).await?;
            }
        }

        self.destroy_dead_roots(&roots).await?;
        Ok(TickOutcome::Completed)
    }

    /// A root with no intent, no monitored rows, and a confirmed-empty
    /// observed view is done: drop its persisted trees so the serve
    /// controller stops handing it out.
    async fn destroy_dead_roots(&self, roots: &[String]) -> Result<()> {
        let intent_roots = self.store.intent_roots().await?;
        for root in roots {
            let Some(worker) = self.workers.get(root) else {
                continue;
            };
            if !worker.is_warm() || intent_roots.contains(root.as_str()) {
                continue;
            }
            if !self.store.monitored_objects(root).await?.is_empty() {
                continue;
            }
            let observed_empty = worker.snapshot_config().is_empty()
                && worker.snapshot_operational().is_empty()
                && worker.snapshot_monitored().is_empty();
            if observed_empty {
                info!(root = %root, "no intent and nothing observed, destroying root");
                self.store.delete_trees(root).await?;
            }
        }
        Ok(())
    }

    /// Start workers for newly served roots, stop workers for lost ones.
    async fn sync_workers(&self, roots: &[String]) {
        let serving: HashSet<String> = self.workers.serving_roots().into_iter().collect();
        for root in roots {
            if !serving.contains(root) {
                info!(root = %root, "starting tenant worker");
                let worker = TenantWorker::spawn(
                    &self.config,
                    root.clone(),
                    self.client.clone(),
                    self.outcome_tx.clone(),
                    self.notify.clone(),
                );
                self.workers.insert(worker);
            }
        }
        for root in serving {
            if !roots.contains(&root) {
                info!(root = %root, "stopping tenant worker");
                if let Some(worker) = self.workers.remove(&root) {
                    worker.stop().await;
                }
            }
        }
    }

    /// Categorize the outcomes of the previous tick's pushes.
    async fn process_outcomes(&mut self) -> Result<Option<i32>> {
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            let Some(error) = outcome.error else {
                if outcome.op == PushOp::Create {
                    if let Some(object) = &outcome.object {
                        self.status.mark_synced(object).await?;
                    }
                }
                continue;
            };
            match error.class() {
                ErrorClass::SystemCritical => {
                    error!(dn = %outcome.dn, error = %error, "fatal fabric error");
                    return Ok(Some(error.exit_code().unwrap_or(1)));
                }
                ErrorClass::OperationCritical => {
                    if let Some(object) = &outcome.object {
                        self.status.mark_failed(object, &error.to_string()).await?;
                        self.purge_object(object);
                    }
                }
                // Transient and unknown failures only annotate the retry
                // state; the divergence counter decides their fate.
                _ => {
                    if let Some(object) = &outcome.object {
                        self.note_error(object, error);
                    }
                }
            }
        }
        Ok(None)
    }

    fn note_error(&mut self, object: &ModelObject, error: Error) {
        let root = object.root_rn();
        let Ok(keys) = maker::keys_for(object) else {
            return;
        };
        for key in keys {
            let retry_key = (TreeKind::Config, root.clone(), key);
            if let Some(entry) = self.retry.get_mut(&retry_key) {
                entry.last_error = Some(error.clone());
            } else {
                self.retry.insert(
                    retry_key,
                    RetryEntry {
                        last_error: Some(error.clone()),
                        ..Default::default()
                    },
                );
            }
        }
    }

    /// Exclude an object from future diffs until its intent changes.
    fn purge_object(&mut self, object: &ModelObject) {
        let root = object.root_rn();
        let desired = self
            .multiverse
            .universe(UniverseKind::DesiredConfig)
            .state(&root);
        let Ok(keys) = maker::keys_for(object) else {
            return;
        };
        for key in keys {
            let fingerprint = desired
                .find(&key)
                .map(|n| n.partial_hash().to_string())
                .unwrap_or_default();
            self.purged
                .insert((TreeKind::Config, root.clone(), key), fingerprint);
        }
    }

    async fn reconcile_root(
        &mut self,
        current_kind: UniverseKind,
        desired_kind: UniverseKind,
        root: &str,
    ) -> Result<()> {
        let pair = current_kind.tree_kind();
        let current_universe = self.multiverse.universe(current_kind);
        let desired_universe = self.multiverse.universe(desired_kind);
        let current = current_universe.state(root);
        let desired = desired_universe.state(root);
        let diff = current.diff(&desired);

        let mut batch = ResourceBatch::default();
        let mut reset_roots: BTreeSet<String> = BTreeSet::new();
        let mut purges: Vec<(TreeKey, Option<ModelObject>)> = Vec::new();
        let mut seen_in_diff: HashSet<RetryKey> = HashSet::new();

        // Creates: parents before children.
        let mut add_keys = diff.add;
        add_keys.sort_by_key(TreeKey::len);
        let mut batched_dns = HashSet::new();
        for key in add_keys {
            seen_in_diff.insert((pair, root.to_string(), key.clone()));
            let Some(object) = self.multiverse.resolve_object(desired_kind, root, &key) else {
                continue;
            };
            if pair == TreeKind::Config {
                // Fabric-owned objects and faults are observed, never pushed.
                if object.monitored() || object.pre_existing() || object.is_operational() {
                    continue;
                }
            }
            match self.gate(pair, root, &key, &desired) {
                Gate::Skip => continue,
                Gate::Reset => {
                    reset_roots.insert(root.to_string());
                }
                Gate::Purge => purges.push((key, Some(object))),
                Gate::Push { first_time } => {
                    if !batched_dns.insert(object.dn()) {
                        continue;
                    }
                    if first_time && pair == TreeKind::Config {
                        self.status.mark_pending(&object).await?;
                    }
                    batch.create.push(object);
                }
            }
        }

        // Deletes: children before parents.
        let mut remove_keys = diff.remove;
        remove_keys.sort_by_key(TreeKey::len);
        remove_keys.reverse();
        for key in remove_keys {
            seen_in_diff.insert((pair, root.to_string(), key.clone()));
            // Something another relevant view says ought to exist stays.
            if self.multiverse.claimed_by_relevant(desired_kind, root, &key) {
                continue;
            }
            if pair == TreeKind::Config
                && current
                    .find(&key)
                    .map(|n| n.metadata().contains_key(maker::METADATA_MONITORED))
                    .unwrap_or(false)
            {
                continue;
            }
            match self.gate(pair, root, &key, &desired) {
                Gate::Skip => continue,
                Gate::Reset => {
                    reset_roots.insert(root.to_string());
                }
                Gate::Purge => purges.push((key, None)),
                Gate::Push { .. } => match maker::identity_for_key(&key) {
                    Ok((class, dn)) => batch.delete.push(convert::deletion_mo(&class, &dn)),
                    Err(e) => warn!(error = %e, "undeletable tree key"),
                },
            }
        }

        // Drop retry state for keys that converged.
        self.retry.retain(|k, _| {
            k.0 != pair || k.1 != root || seen_in_diff.contains(k)
        });

        if !reset_roots.is_empty() {
            info!(root = %root, ?pair, "divergence reset");
            current_universe.reset(&reset_roots).await?;
            desired_universe.reset(&reset_roots).await?;
        }
        for (key, object) in purges {
            let retry_key = (pair, root.to_string(), key.clone());
            let message = self
                .retry
                .get(&retry_key)
                .and_then(|e| e.last_error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "operation retry budget exhausted".to_string());
            if let Some(object) = &object {
                warn!(dn = %object.dn(), %message, "purging unresolved object");
                self.status.mark_failed(object, &message).await?;
            }
            let fingerprint = desired
                .find(&key)
                .map(|n| n.partial_hash().to_string())
                .unwrap_or_default();
            self.purged.insert(retry_key, fingerprint);
        }

        current_universe.push_resources(root, batch).await?;
        Ok(())
    }

    /// Retry ladder for one diff key.
    fn gate(
        &mut self,
        pair: TreeKind,
        root: &str,
        key: &TreeKey,
        desired: &StructuredHashTree,
    ) -> Gate {
        let retry_key = (pair, root.to_string(), key.clone());

        if let Some(recorded) = self.purged.get(&retry_key) {
            let fingerprint = desired
                .find(key)
                .map(|n| n.partial_hash().to_string())
                .unwrap_or_default();
            if fingerprint == *recorded {
                return Gate::Skip;
            }
            // Intent touched the object: give it a fresh budget.
            self.purged.remove(&retry_key);
            self.retry.remove(&retry_key);
        }

        let entry = self.retry.entry(retry_key).or_default();
        if entry.count > 0 {
            if let Some(cooldown) = self.config.retry_cooldown() {
                if entry
                    .last_attempt
                    .is_some_and(|at| at.elapsed() < cooldown)
                {
                    return Gate::Skip;
                }
            }
        }
        entry.count += 1;
        entry.last_attempt = Some(Instant::now());

        let reset_limit = self.config.reset_retry_limit();
        let purge_limit = self.config.purge_retry_limit();
        if entry.count > purge_limit {
            // Environment trouble is never the object's fault.
            let system_transient = entry
                .last_error
                .as_ref()
                .is_some_and(|e| e.class() == ErrorClass::SystemTransient);
            if system_transient {
                return Gate::Push { first_time: false };
            }
            return Gate::Purge;
        }
        if entry.count == reset_limit + 1 {
            return Gate::Reset;
        }
        Gate::Push {
            first_time: entry.count == 1,
        }
    }
}
