//! Tenant worker - one long-lived task per served root
//!
//! The worker owns its root's three hash trees and is their single writer.
//! Each tick: (re)subscribe, drain the outbound backlog, drain and normalize
//! events, classify ownership, fold into trees, yield. Snapshots are deep
//! copies taken under a std mutex; tree serialization never suspends, so
//! they are safe to take from any task.

use dashmap::DashMap;
use fabricsync_core::mo::{ATTR_DN, STATUS_DELETED};
use fabricsync_core::{AgentConfig, Dn, Error, ManagedObject, ModelObject, Result};
use fabricsync_fabric::client::QueryOptions;
use fabricsync_fabric::{convert, maker, registry, subscription, FabricClient};
use fabricsync_tree::StructuredHashTree;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Clean ticks after a subscription before the observed view is trusted.
const WARM_ITERATIONS: u32 = 3;

/// One outbound unit of work: model objects to create, wire objects to
/// delete. Batches are FIFO per root.
#[derive(Debug, Clone, Default)]
pub struct PushBatch {
    pub create: Vec<ModelObject>,
    pub delete: Vec<ManagedObject>,
}

impl PushBatch {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOp {
    Create,
    Delete,
}

/// Result of one pushed object, reported back to the reconciler.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub op: PushOp,
    pub dn: Dn,
    pub object: Option<ModelObject>,
    pub error: Option<Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Subscribing,
    Warming,
    Warm,
    Reconnecting,
    Stopped,
}

#[derive(Default)]
struct WorkerTrees {
    config: StructuredHashTree,
    operational: StructuredHashTree,
    monitored: StructuredHashTree,
}

struct WorkerShared {
    trees: Mutex<WorkerTrees>,
    state: Mutex<WorkerState>,
    warm: AtomicBool,
    health: AtomicBool,
    reset_requested: AtomicBool,
}

/// Handle to a running tenant worker.
pub struct TenantWorker {
    root_rn: String,
    shared: Arc<WorkerShared>,
    backlog_tx: mpsc::UnboundedSender<PushBatch>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TenantWorker {
    /// Spawn the worker task for `root_rn`. `outcome_tx` receives one entry
    /// per pushed object; `notify` is poked whenever the observed trees
    /// change.
    pub fn spawn(
        config: &AgentConfig,
        root_rn: impl Into<String>,
        client: Arc<dyn FabricClient>,
        outcome_tx: mpsc::UnboundedSender<PushOutcome>,
        notify: Arc<Notify>,
    ) -> Self {
        let root_rn = root_rn.into();
        let shared = Arc::new(WorkerShared {
            trees: Mutex::new(WorkerTrees::default()),
            state: Mutex::new(WorkerState::Init),
            warm: AtomicBool::new(false),
            health: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
        });
        let (backlog_tx, backlog_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = WorkerTask {
            root_rn: root_rn.clone(),
            url: subscription::subscription_url(&root_rn),
            system_id: config.system_id.clone(),
            polling_yield: config.tenant_polling_yield(),
            client,
            shared: shared.clone(),
            tag_set: BTreeSet::new(),
            backlog_rx,
            outcome_tx,
            notify,
            subscribed: false,
            warm_countdown: WARM_ITERATIONS,
        };
        let handle = tokio::spawn(task.run(cancel.clone()));

        Self {
            root_rn,
            shared,
            backlog_tx,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn root_rn(&self) -> &str {
        &self.root_rn
    }

    /// Enqueue a batch; returns immediately. Empty batches are dropped.
    pub fn push(&self, batch: PushBatch) {
        if batch.is_empty() {
            return;
        }
        if self.backlog_tx.send(batch).is_err() {
            warn!(root = %self.root_rn, "push to stopped worker dropped");
        }
    }

    /// Signal the worker and wait for it to exit at its next yield point.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Clear trees and re-warm from a fresh subscription at the next tick.
    pub fn request_reset(&self) {
        self.shared.reset_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_warm(&self) -> bool {
        self.shared.warm.load(Ordering::SeqCst)
    }

    pub fn health_state(&self) -> bool {
        self.shared.health.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WorkerState {
        self.shared
            .state
            .lock()
            .map(|s| *s)
            .unwrap_or(WorkerState::Stopped)
    }

    pub fn snapshot_config(&self) -> StructuredHashTree {
        self.snapshot(|t| &t.config)
    }

    pub fn snapshot_operational(&self) -> StructuredHashTree {
        self.snapshot(|t| &t.operational)
    }

    pub fn snapshot_monitored(&self) -> StructuredHashTree {
        self.snapshot(|t| &t.monitored)
    }

    fn snapshot(&self, pick: impl Fn(&WorkerTrees) -> &StructuredHashTree) -> StructuredHashTree {
        self.shared
            .trees
            .lock()
            .map(|trees| pick(&trees).snapshot())
            .unwrap_or_default()
    }
}

/// Registry of running workers, keyed by root RN.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: DashMap<String, Arc<TenantWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, worker: TenantWorker) {
        self.workers
            .insert(worker.root_rn().to_string(), Arc::new(worker));
    }

    pub fn get(&self, root_rn: &str) -> Option<Arc<TenantWorker>> {
        self.workers.get(root_rn).map(|w| w.clone())
    }

    pub fn remove(&self, root_rn: &str) -> Option<Arc<TenantWorker>> {
        self.workers.remove(root_rn).map(|(_, w)| w)
    }

    pub fn serving_roots(&self) -> Vec<String> {
        self.workers.iter().map(|e| e.key().clone()).collect()
    }
}

struct WorkerTask {
    root_rn: String,
    url: String,
    system_id: String,
    polling_yield: Duration,
    client: Arc<dyn FabricClient>,
    shared: Arc<WorkerShared>,
    tag_set: BTreeSet<String>,
    backlog_rx: mpsc::UnboundedReceiver<PushBatch>,
    outcome_tx: mpsc::UnboundedSender<PushOutcome>,
    notify: Arc<Notify>,
    subscribed: bool,
    warm_countdown: u32,
}

impl WorkerTask {
    async fn run(mut self, cancel: CancellationToken) {
        info!(root = %self.root_rn, "tenant worker started");
        // Cancellation is honored between ticks: an in-flight Fabric call
        // finishes (bounded by the client's per-call timeout) before exit.
        while !cancel.is_cancelled() {
            let started = std::time::Instant::now();
            if let Err(e) = self.tick().await {
                error!(root = %self.root_rn, error = %e, "event loop failed, resubscribing");
                self.set_state(WorkerState::Reconnecting);
                self.shared.health.store(false, Ordering::SeqCst);
                let _ = self.client.unsubscribe(&self.url).await;
                self.subscribed = false;
            }
            let pause = self.polling_yield.saturating_sub(started.elapsed());
            if pause.is_zero() {
                // Still give sibling tasks their turn.
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
        // Best-effort unsubscribe on the way out.
        if let Err(e) = self.client.unsubscribe(&self.url).await {
            debug!(root = %self.root_rn, error = %e, "unsubscribe on stop failed");
        }
        self.set_state(WorkerState::Stopped);
        info!(root = %self.root_rn, "tenant worker stopped");
    }

    fn set_state(&self, state: WorkerState) {
        if let Ok(mut s) = self.shared.state.lock() {
            *s = state;
        }
    }

    async fn tick(&mut self) -> Result<()> {
        if self.shared.reset_requested.swap(false, Ordering::SeqCst) {
            info!(root = %self.root_rn, "resetting trees on request");
            if let Ok(mut trees) = self.shared.trees.lock() {
                trees.config.clear();
                trees.operational.clear();
                trees.monitored.clear();
            }
            self.tag_set.clear();
            let _ = self.client.unsubscribe(&self.url).await;
            self.subscribed = false;
        }
        if !self.subscribed {
            self.set_state(WorkerState::Subscribing);
            self.client.subscribe(&self.url).await?;
            self.subscribed = true;
            self.shared.health.store(true, Ordering::SeqCst);
            if !self.shared.warm.load(Ordering::SeqCst) {
                self.set_state(WorkerState::Warming);
            }
        }

        // Backlog first: events generated by our own writes are then caught
        // within this same iteration.
        self.push_backlog().await;

        if self.client.has_events(&self.url).await {
            let events = self.client.drain_events(&self.url).await?;
            let mut events = coalesce_events(events);
            if events
                .iter()
                .any(|e| registry::is_root_class(&e.class) && e.status().is_none())
            {
                // Full resync: the observed view restarts from this batch.
                info!(root = %self.root_rn, "root event without status, resetting trees");
                if let Ok(mut trees) = self.shared.trees.lock() {
                    trees.config.clear();
                    trees.operational.clear();
                }
            }
            flatten_events(&mut events);
            let events = fill_events(self.client.as_ref(), events).await?;
            let (owned, monitored) =
                filter_ownership(&mut self.tag_set, &self.system_id, events);
            self.fold_to_trees(owned, monitored);
        }

        if !self.shared.warm.load(Ordering::SeqCst) {
            if self.warm_countdown > 0 {
                self.warm_countdown -= 1;
            }
            if self.warm_countdown == 0 {
                debug!(root = %self.root_rn, "worker is warm");
                self.shared.warm.store(true, Ordering::SeqCst);
                self.set_state(WorkerState::Warm);
            }
        }
        Ok(())
    }

    /// Drain the FIFO backlog into the Fabric. One failed object is reported
    /// and skipped; it never blocks the rest of the backlog.
    async fn push_backlog(&mut self) {
        while let Ok(batch) = self.backlog_rx.try_recv() {
            for mut object in batch.create {
                if object.monitored() {
                    // Taking ownership of a monitored object.
                    object.set_monitored(false);
                    object.set_pre_existing(true);
                }
                let mos = convert::to_fabric(&object);
                let mut txn = mos.clone();
                for mo in &mos {
                    if let Some(dn) = mo.dn() {
                        txn.push(ManagedObject::new(
                            registry::TAG_CLASS,
                            &dn.tag(&self.system_id),
                        ));
                    }
                }
                // Parents before children within the transaction.
                txn.sort_by_key(|mo| mo.dn().map(|d| d.depth()).unwrap_or(0));
                let dn = object.dn();
                debug!(root = %self.root_rn, %dn, "pushing create transaction");
                let outcome = match self.client.post_transaction(txn).await {
                    Ok(()) => PushOutcome {
                        op: PushOp::Create,
                        dn,
                        object: Some(object),
                        error: None,
                    },
                    Err(e) => {
                        error!(root = %self.root_rn, %dn, error = %e, "create failed");
                        PushOutcome {
                            op: PushOp::Create,
                            dn,
                            object: Some(object),
                            error: Some(e),
                        }
                    }
                };
                let _ = self.outcome_tx.send(outcome);
            }
            for mo in batch.delete {
                let Some(dn) = mo.dn() else { continue };
                debug!(root = %self.root_rn, %dn, "deleting");
                let outcome = match self.client.delete(&dn).await {
                    Ok(()) => PushOutcome {
                        op: PushOp::Delete,
                        dn,
                        object: convert::from_fabric(&mo),
                        error: None,
                    },
                    Err(e) => {
                        error!(root = %self.root_rn, %dn, error = %e, "delete failed");
                        PushOutcome {
                            op: PushOp::Delete,
                            dn,
                            object: convert::from_fabric(&mo),
                            error: Some(e),
                        }
                    }
                };
                let _ = self.outcome_tx.send(outcome);
            }
        }
    }

    /// Route classified events into the three trees.
    fn fold_to_trees(&mut self, owned: Vec<ManagedObject>, monitored: Vec<ManagedObject>) {
        let mut config_create = Vec::new();
        let mut config_delete = Vec::new();
        let mut oper_create = Vec::new();
        let mut oper_delete = Vec::new();
        let mut mon_create = Vec::new();
        let mut mon_delete = Vec::new();

        for event in owned {
            let operational = registry::is_operational_class(&event.class);
            if event.is_deleting() {
                if let Some(dn) = event.dn() {
                    self.tag_set.remove(dn.as_str());
                }
                if operational {
                    oper_delete.push(event);
                } else {
                    config_delete.push(event);
                }
            } else if operational {
                oper_create.push(event);
            } else {
                config_create.push(event);
            }
        }
        for event in monitored {
            let operational = registry::is_operational_class(&event.class);
            if event.is_deleting() {
                if operational {
                    oper_delete.push(event);
                } else {
                    mon_delete.push(event);
                }
            } else if operational {
                oper_create.push(event);
            } else {
                mon_create.push(event);
            }
        }

        let Ok(mut trees) = self.shared.trees.lock() else {
            return;
        };
        let mut changed = false;

        let keys = |events: &[ManagedObject]| {
            events
                .iter()
                .filter_map(|e| e.dn())
                .filter_map(|dn| maker::key_for(&dn).ok())
                .collect::<Vec<_>>()
        };

        // Monitored objects: full entries in the monitored tree, plus
        // screened existence markers in the config tree so config diffs
        // never try to create or delete them.
        if !mon_delete.is_empty() {
            changed = true;
            trees.monitored.delete(keys(&mon_delete));
            trees.config.delete(keys(&mon_delete));
            trees.operational.delete(keys(&mon_delete));
        }
        if !mon_create.is_empty() {
            changed = true;
            let mut mon_items = Vec::new();
            let mut marker_items = Vec::new();
            for event in &mon_create {
                let Some(dn) = event.dn() else { continue };
                match (maker::observed_item(event), maker::unowned_item(&dn)) {
                    (Ok(item), Ok(marker)) => {
                        mon_items
                            .push(item.with_metadata(maker::METADATA_MONITORED, "true"));
                        marker_items.push(marker);
                    }
                    _ => warn!(class = %event.class, %dn, "unrepresentable monitored event"),
                }
            }
            if let Err(e) = trees.monitored.update(mon_items) {
                warn!(root = %self.root_rn, error = %e, "monitored tree update failed");
            }
            if let Err(e) = trees.config.update(marker_items) {
                warn!(root = %self.root_rn, error = %e, "config marker update failed");
            }
        }

        // Owned config objects.
        if !config_delete.is_empty() {
            changed = true;
            let delete_keys = keys(&config_delete);
            trees.config.delete(delete_keys.clone());
            // Faults do not outlive their object.
            trees.operational.delete(delete_keys);
        }
        if !config_create.is_empty() {
            changed = true;
            let items: Vec<_> = config_create
                .iter()
                .filter_map(|e| maker::owned_item(e).ok())
                .collect();
            if let Err(e) = trees.config.update(items) {
                warn!(root = %self.root_rn, error = %e, "config tree update failed");
            }
        }

        // Operational (faults).
        if !oper_delete.is_empty() {
            changed = true;
            trees.operational.delete(keys(&oper_delete));
        }
        if !oper_create.is_empty() {
            changed = true;
            let items: Vec<_> = oper_create
                .iter()
                .filter_map(|e| maker::observed_item(e).ok())
                .collect();
            if let Err(e) = trees.operational.update(items) {
                warn!(root = %self.root_rn, error = %e, "operational tree update failed");
            }
        }

        drop(trees);
        if changed {
            debug!(root = %self.root_rn, "observed trees changed");
            self.notify.notify_one();
        }
    }
}

/// Complete partial events from the Fabric.
///
/// Deleted events pass through; modified/created events and operational
/// classes are re-read as full subtrees (config-only properties except for
/// operational reads, tags included). A 404 means the object is gone and
/// its delete event will follow. Statusless events pass as-is. A visited
/// set keeps each DN in the result once.
pub async fn fill_events(
    client: &dyn FabricClient,
    events: Vec<ManagedObject>,
) -> Result<Vec<ManagedObject>> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut result: Vec<ManagedObject> = Vec::new();

    for event in events {
        let raw_dn = event.attr(ATTR_DN).unwrap_or_default().to_string();
        if event.status() == Some(STATUS_DELETED) {
            if !visited.contains(&raw_dn) {
                result.push(event);
            }
            continue;
        }
        let operational = registry::is_operational_class(&event.class);
        if event.status().is_some() || operational {
            if let Some(model) = convert::from_fabric(&event) {
                let target_dn = model.dn();
                if !visited.contains(target_dn.as_str()) {
                    let options = QueryOptions {
                        config_only: !operational,
                        target_classes: convert::subtree_classes(&model)
                            .into_iter()
                            .map(String::from)
                            .collect(),
                    };
                    match client.get_subtree(&target_dn, options).await {
                        Ok(data) => {
                            for item in data {
                                let Some(item_dn) = item.dn() else { continue };
                                if visited.insert(item_dn.to_string()) {
                                    result.push(item);
                                }
                            }
                            visited.insert(target_dn.to_string());
                        }
                        Err(e) if e.is_not_found() => {
                            warn!(dn = %target_dn, "object vanished during fill");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        if event.status().is_none() && !visited.contains(&raw_dn) {
            result.push(event);
        }
    }
    Ok(result)
}

/// Coalesce pending events by `(class, dn)`: later attribute values win.
pub fn coalesce_events(events: Vec<ManagedObject>) -> Vec<ManagedObject> {
    let mut out: Vec<ManagedObject> = Vec::new();
    for event in events {
        let merged = out.iter_mut().find(|prev| {
            prev.class == event.class && prev.attr(ATTR_DN) == event.attr(ATTR_DN)
        });
        match merged {
            Some(prev) => prev.merge_from(event),
            None => out.push(event),
        }
    }
    out
}

/// Hoist nested children to top level, synthesizing their DNs from the
/// parent DN plus `rn`, or the registered prefix with the name/code.
/// Children of unknown classes are dropped. Appended children are visited
/// in turn, so arbitrarily nested events flatten in one pass.
pub fn flatten_events(events: &mut Vec<ManagedObject>) {
    let mut index = 0;
    while index < events.len() {
        if events[index].children.is_empty() {
            index += 1;
            continue;
        }
        let parent_dn = events[index].dn();
        let children = std::mem::take(&mut events[index].children);
        for mut child in children {
            let Some(info) = registry::lookup(&child.class) else {
                warn!(class = %child.class, "dropping unmanaged child event");
                continue;
            };
            if let Some(parent_dn) = &parent_dn {
                let rn = convert::child_rn(info, &child);
                child.set_attr(ATTR_DN, parent_dn.child(&rn).to_string());
            }
            events.push(child);
        }
        index += 1;
    }
}

/// Split events into (owned, monitored), maintaining the ownership tag set.
/// Tag events never pass through; they only mutate `tag_set`. Deleting
/// events land on both sides so every tree drops the subtree. Multi-parent
/// classes (faults) check ownership at their parent's DN.
pub fn filter_ownership(
    tag_set: &mut BTreeSet<String>,
    system_id: &str,
    events: Vec<ManagedObject>,
) -> (Vec<ManagedObject>, Vec<ManagedObject>) {
    let tag_rn = format!("tag-{system_id}");
    let mut managed = Vec::new();
    for event in events {
        if event.class == registry::TAG_CLASS {
            let Some(dn) = event.dn() else { continue };
            if dn.rn() == tag_rn {
                let parent = dn.parent().map(|p| p.to_string()).unwrap_or_default();
                if event.is_deleting() {
                    tag_set.remove(&parent);
                } else {
                    tag_set.insert(parent);
                }
            }
        } else {
            managed.push(event);
        }
    }

    let mut owned = Vec::new();
    let mut monitored = Vec::new();
    for event in managed {
        let is_owned = event_is_owned(tag_set, &event);
        let deleting = event.is_deleting();
        if is_owned || deleting {
            owned.push(event.clone());
        }
        if !is_owned || deleting {
            monitored.push(event);
        }
    }
    (owned, monitored)
}

fn event_is_owned(tag_set: &BTreeSet<String>, event: &ManagedObject) -> bool {
    let Some(dn) = event.dn() else { return false };
    if registry::is_multi_parent(&event.class) {
        dn.parent()
            .map(|parent| tag_set.contains(parent.as_str()))
            .unwrap_or(false)
    } else {
        tag_set.contains(dn.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabricsync_core::mo::ATTR_STATUS;

    fn mo(raw: &str) -> ManagedObject {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn coalesce_squashes_duplicate_events() {
        let events = vec![
            mo(r#"{"fvRsCtx": {"attributes": {
                "dn": "uni/tn-test-tenant/BD-test/rsctx", "tnFvCtxName": "test"}}}"#),
            mo(r#"{"fvRsCtx": {"attributes": {
                "dn": "uni/tn-test-tenant/BD-test/rsctx", "tnFvCtxName": "test-2"}}}"#),
        ];
        let result = coalesce_events(events);
        assert_eq!(1, result.len());
        assert_eq!(Some("test-2"), result[0].attr("tnFvCtxName"));
    }

    #[test]
    fn coalesce_keeps_distinct_dns_apart() {
        let events = vec![
            mo(r#"{"fvRsCtx": {"attributes": {"dn": "uni/tn-t/BD-a/rsctx"}}}"#),
            mo(r#"{"fvRsCtx": {"attributes": {"dn": "uni/tn-t/BD-b/rsctx"}}}"#),
        ];
        assert_eq!(2, coalesce_events(events).len());
    }

    #[test]
    fn flatten_hoists_children() {
        let mut events = vec![
            mo(r#"{"fvRsCtx": {
                "attributes": {"dn": "uni/tn-ivar-wstest/BD-test-2/rsctx",
                               "tnFvCtxName": "asasa"},
                "children": [{"faultInst": {
                    "attributes": {"ack": "no", "delegated": "no",
                                   "code": "F0952", "type": "config"}}}]}}"#),
            mo(r#"{"fvRsCtx": {
                "attributes": {"dn": "uni/tn-ivar-wstest/BD-test/rsctx",
                               "tnFvCtxName": "test"},
                "children": [{"faultInst": {
                    "attributes": {"ack": "no", "delegated": "no",
                                   "code": "F0952", "type": "config"}}}]}}"#),
        ];
        flatten_events(&mut events);
        assert_eq!(4, events.len());
        assert!(events.iter().all(|e| e.children.is_empty()));
        assert_eq!(
            Some("uni/tn-ivar-wstest/BD-test-2/rsctx/fault-F0952"),
            events[2].attr(ATTR_DN)
        );
        assert_eq!(
            Some("uni/tn-ivar-wstest/BD-test/rsctx/fault-F0952"),
            events[3].attr(ATTR_DN)
        );
    }

    #[test]
    fn flatten_recurses_into_nested_children() {
        let mut events = vec![
            mo(r#"{"fvRsCtx": {
                "attributes": {"dn": "uni/tn-ivar-wstest/BD-test-2/rsctx",
                               "tnFvCtxName": "asasa"},
                "children": [{"faultInst": {
                    "attributes": {"code": "F0952"},
                    "children": [{"faultInst": {
                        "attributes": {"code": "F0952"}}}]}}]}}"#),
            mo(r#"{"fvRsCtx": {"attributes": {
                "dn": "uni/tn-ivar-wstest/BD-test/rsctx", "tnFvCtxName": "test"}}}"#),
        ];
        flatten_events(&mut events);
        assert_eq!(4, events.len());
        assert_eq!(
            Some("uni/tn-ivar-wstest/BD-test-2/rsctx/fault-F0952"),
            events[2].attr(ATTR_DN)
        );
        assert_eq!(
            Some("uni/tn-ivar-wstest/BD-test-2/rsctx/fault-F0952/fault-F0952"),
            events[3].attr(ATTR_DN)
        );
    }

    #[test]
    fn flatten_drops_unmanaged_classes() {
        let mut events = vec![mo(r#"{"fvRsCtx": {
            "attributes": {"dn": "uni/tn-t/BD-b/rsctx"},
            "children": [
                {"faultInst": {"attributes": {"code": "F0952"}}},
                {"faultDelegate": {"attributes": {"code": "F0951"}}}]}}"#)];
        flatten_events(&mut events);
        assert_eq!(2, events.len());
        assert_eq!("faultInst", events[1].class);
    }

    #[test]
    fn flatten_without_children_is_identity() {
        let mut events = vec![
            mo(r#"{"fvBD": {"attributes": {"dn": "uni/tn-t/BD-b", "name": "b"}}}"#),
            mo(r#"{"fvRsCtx": {"attributes": {"dn": "uni/tn-t/BD-b/rsctx"}}}"#),
        ];
        let before = events.clone();
        flatten_events(&mut events);
        assert_eq!(before, events);
    }

    #[test]
    fn ownership_filter_follows_tags() {
        let sys_id = "test-sys";
        let events = vec![
            mo(r#"{"fvRsCtx": {"attributes": {
                "dn": "uni/tn-ivar-wstest/BD-test-2/rsctx", "tnFvCtxName": "asasa"}}}"#),
            mo(r#"{"fvRsCtx": {"attributes": {
                "dn": "uni/tn-ivar-wstest/BD-test/rsctx", "tnFvCtxName": "test"}}}"#),
            mo(r#"{"faultInst": {"attributes": {
                "dn": "uni/tn-ivar-wstest/BD-test-2/rsctx/fault-F0952", "code": "F0952"}}}"#),
            mo(r#"{"faultInst": {"attributes": {
                "dn": "uni/tn-ivar-wstest/BD-test/rsctx/fault-F0952/fault-F0952",
                "code": "F0952"}}}"#),
        ];
        let mut tag_set = BTreeSet::new();

        let (owned, monitored) = filter_ownership(&mut tag_set, sys_id, events.clone());
        assert!(tag_set.is_empty());
        assert!(owned.is_empty());
        assert_eq!(4, monitored.len());

        // A tag under BD-test-2/rsctx grants ownership of the context and
        // the fault directly below it.
        let mut tagged = events.clone();
        tagged.push(mo(&format!(
            r#"{{"tagInst": {{"attributes": {{
                "dn": "uni/tn-ivar-wstest/BD-test-2/rsctx/tag-{sys_id}"}}}}}}"#
        )));
        let (owned, _) = filter_ownership(&mut tag_set, sys_id, tagged.clone());
        assert_eq!(
            BTreeSet::from(["uni/tn-ivar-wstest/BD-test-2/rsctx".to_string()]),
            tag_set
        );
        assert_eq!(2, owned.len());
        assert!(owned
            .iter()
            .all(|e| e.attr(ATTR_DN).unwrap().contains("BD-test-2")));

        // Deleting the tag revokes ownership.
        let mut with_deleted_tag = tagged;
        with_deleted_tag
            .last_mut()
            .unwrap()
            .set_attr(ATTR_STATUS, STATUS_DELETED);
        let (owned, _) = filter_ownership(&mut tag_set, sys_id, with_deleted_tag);
        assert!(tag_set.is_empty());
        assert!(owned.is_empty());
    }

    #[tokio::test]
    async fn fill_passes_unchanged_data_through() {
        let fabric = fabricsync_fabric::testing::FakeFabric::new();
        let events = vec![
            mo(r#"{"fvRsCtx": {"attributes": {
                "dn": "uni/tn-test-tenant/BD-test/rsctx", "tnFvCtxName": "test"}}}"#),
            mo(r#"{"fvTenant": {"attributes": {
                "dn": "uni/tn-test-tenant", "name": "test-tenant"}}}"#),
        ];
        let filled = fill_events(&fabric, events.clone()).await.unwrap();
        assert_eq!(events, filled);
    }

    #[tokio::test]
    async fn fill_expands_modified_events() {
        let fabric = fabricsync_fabric::testing::FakeFabric::new();
        let complete = mo(r#"{"fvRsCtx": {"attributes": {
            "dn": "uni/tn-test-tenant/BD-test/rsctx",
            "tnFvCtxName": "test", "extra": "something_important"}}}"#);
        let parent_bd = mo(r#"{"fvBD": {"attributes": {
            "dn": "uni/tn-test-tenant/BD-test", "name": "test", "arpFlood": "yes"}}}"#);
        fabric.seed_objects([complete.clone(), parent_bd.clone()]);

        let events = vec![mo(r#"{"fvRsCtx": {"attributes": {
            "dn": "uni/tn-test-tenant/BD-test/rsctx",
            "tnFvCtxName": "test", "status": "modified"}}}"#)];
        let filled = fill_events(&fabric, events).await.unwrap();
        let mut dns: Vec<_> = filled.iter().filter_map(|e| e.dn()).collect();
        dns.sort();
        assert_eq!(
            vec![
                Dn::new("uni/tn-test-tenant/BD-test"),
                Dn::new("uni/tn-test-tenant/BD-test/rsctx"),
            ],
            dns
        );
        // The complete server-side copy replaced the partial event.
        assert!(filled
            .iter()
            .any(|e| e.attr("extra") == Some("something_important")));
    }

    #[tokio::test]
    async fn fill_drops_vanished_objects() {
        let fabric = fabricsync_fabric::testing::FakeFabric::new();
        let events = vec![mo(r#"{"fvRsCtx": {"attributes": {
            "dn": "uni/tn-test-tenant/BD-test/rsctx",
            "tnFvCtxName": "test", "status": "modified"}}}"#)];
        // Nothing server-side: the 404 swallows the event entirely.
        let filled = fill_events(&fabric, events).await.unwrap();
        assert!(filled.is_empty());
    }

    #[tokio::test]
    async fn fill_refetches_operational_events() {
        let fabric = fabricsync_fabric::testing::FakeFabric::new();
        let fault = mo(r#"{"faultInst": {"attributes": {
            "dn": "uni/tn-t/BD-test/rsctx/fault-F0952",
            "code": "F0952", "severity": "major", "ack": "no"}}}"#);
        fabric.seed_object(fault.clone());

        // The incoming fault only carries its code; the fill completes it.
        let events = vec![mo(r#"{"faultInst": {"attributes": {
            "dn": "uni/tn-t/BD-test/rsctx/fault-F0952", "code": "F0952"}}}"#)];
        let filled = fill_events(&fabric, events).await.unwrap();
        assert_eq!(1, filled.len());
        assert_eq!(Some("major"), filled[0].attr("severity"));
    }

    #[test]
    fn deleting_events_reach_both_sides() {
        let mut tag_set = BTreeSet::from(["uni/tn-t/BD-b".to_string()]);
        let events = vec![mo(r#"{"fvBD": {"attributes": {
            "dn": "uni/tn-t/BD-b", "status": "deleted"}}}"#)];
        let (owned, monitored) = filter_ownership(&mut tag_set, "sys", events);
        assert_eq!(1, owned.len());
        assert_eq!(1, monitored.len());
    }
}
