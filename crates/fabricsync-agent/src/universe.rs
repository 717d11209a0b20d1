//! Universes and the multiverse
//!
//! Six named views arranged as three (current, desired) pairs over the
//! config, operational, and monitored tree kinds. The desired side of a
//! pair is ground truth: intent for config, the Fabric itself for faults
//! and monitored objects. Pushes always correct the current side - worker
//! pushes for config, store rows for the other two.
//!
//! Each universe also names the other universes it reads against to decide
//! what ought to exist; that cross-reading encodes the ownership rule.

use crate::status::StatusReporter;
use crate::worker::{PushBatch, WorkerRegistry};
use async_trait::async_trait;
use fabricsync_core::store::ActionOp;
use fabricsync_core::{
    Dn, Error, ManagedObject, ModelObject, Result, Store, TreeKind,
};
use fabricsync_fabric::{convert, maker};
use fabricsync_tree::{StructuredHashTree, TreeKey};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniverseKind {
    CurrentConfig,
    DesiredConfig,
    CurrentOperational,
    DesiredOperational,
    CurrentMonitored,
    DesiredMonitored,
}

impl UniverseKind {
    /// The three reconciled pairs as `(current, desired)`.
    pub const PAIRS: [(UniverseKind, UniverseKind); 3] = [
        (UniverseKind::CurrentConfig, UniverseKind::DesiredConfig),
        (
            UniverseKind::CurrentOperational,
            UniverseKind::DesiredOperational,
        ),
        (
            UniverseKind::CurrentMonitored,
            UniverseKind::DesiredMonitored,
        ),
    ];

    pub fn tree_kind(self) -> TreeKind {
        match self {
            Self::CurrentConfig | Self::DesiredConfig => TreeKind::Config,
            Self::CurrentOperational | Self::DesiredOperational => TreeKind::Operational,
            Self::CurrentMonitored | Self::DesiredMonitored => TreeKind::Monitored,
        }
    }

    /// Universes whose state this one reads against to compute what ought
    /// to exist.
    pub fn relevant(self) -> &'static [UniverseKind] {
        match self {
            Self::CurrentConfig | Self::DesiredOperational | Self::DesiredMonitored => &[
                UniverseKind::CurrentConfig,
                UniverseKind::DesiredMonitored,
                UniverseKind::DesiredOperational,
            ],
            Self::DesiredConfig => &[UniverseKind::DesiredConfig, UniverseKind::CurrentMonitored],
            Self::CurrentOperational => &[UniverseKind::CurrentOperational],
            Self::CurrentMonitored => &[
                UniverseKind::CurrentMonitored,
                UniverseKind::DesiredConfig,
            ],
        }
    }

    /// Fabric-backed universes observe tenant workers; the rest observe the
    /// store.
    pub fn is_fabric_backed(self) -> bool {
        matches!(
            self,
            Self::CurrentConfig | Self::DesiredOperational | Self::DesiredMonitored
        )
    }
}

/// A diff batch handed to a universe: model objects to create, wire objects
/// to delete.
#[derive(Debug, Clone, Default)]
pub struct ResourceBatch {
    pub create: Vec<ModelObject>,
    pub delete: Vec<ManagedObject>,
}

impl ResourceBatch {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}

#[async_trait]
pub trait Universe: Send + Sync {
    fn kind(&self) -> UniverseKind;

    /// Refresh this universe's per-root trees from its data source.
    async fn observe(&self, roots: &[String]) -> Result<()>;

    /// Snapshot of one root's tree; empty when the root is unknown.
    fn state(&self, root_rn: &str) -> StructuredHashTree;

    /// Resolve a tree key back into a model object, if this universe can.
    fn object_for_key(&self, root_rn: &str, key: &TreeKey) -> Option<ModelObject>;

    /// Deliver a diff batch. No-op on desired universes.
    async fn push_resources(&self, root_rn: &str, batch: ResourceBatch) -> Result<()>;

    /// Reinitialize the named roots from scratch.
    async fn reset(&self, roots: &BTreeSet<String>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Fabric-backed universes: state comes from tenant worker snapshots
// ---------------------------------------------------------------------------

pub struct FabricUniverse {
    kind: UniverseKind,
    workers: Arc<WorkerRegistry>,
    store: Arc<dyn Store>,
    cache: Mutex<HashMap<String, StructuredHashTree>>,
}

impl FabricUniverse {
    pub fn new(kind: UniverseKind, workers: Arc<WorkerRegistry>, store: Arc<dyn Store>) -> Self {
        debug_assert!(kind.is_fabric_backed());
        Self {
            kind,
            workers,
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cache_insert(&self, root_rn: &str, tree: StructuredHashTree) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(root_rn.to_string(), tree);
        }
    }
}

#[async_trait]
impl Universe for FabricUniverse {
    fn kind(&self) -> UniverseKind {
        self.kind
    }

    async fn observe(&self, roots: &[String]) -> Result<()> {
        let tree_kind = self.kind.tree_kind();
        for root in roots {
            let Some(worker) = self.workers.get(root) else {
                // Not served here; fall back to the persisted copy once.
                let cached = self
                    .cache
                    .lock()
                    .map(|c| c.contains_key(root))
                    .unwrap_or(false);
                if !cached {
                    if let Some(bytes) = self.store.load_tree(root, tree_kind).await? {
                        if let Ok(tree) = StructuredHashTree::from_bytes(&bytes) {
                            self.cache_insert(root, tree);
                        }
                    }
                }
                continue;
            };
            let tree = match tree_kind {
                TreeKind::Config => worker.snapshot_config(),
                TreeKind::Operational => worker.snapshot_operational(),
                TreeKind::Monitored => worker.snapshot_monitored(),
            };
            self.store
                .save_tree(root, tree_kind, tree.to_bytes())
                .await?;
            self.cache_insert(root, tree);
        }
        Ok(())
    }

    fn state(&self, root_rn: &str) -> StructuredHashTree {
        self.cache
            .lock()
            .ok()
            .and_then(|c| c.get(root_rn).map(StructuredHashTree::snapshot))
            .unwrap_or_default()
    }

    fn object_for_key(&self, root_rn: &str, key: &TreeKey) -> Option<ModelObject> {
        let cache = self.cache.lock().ok()?;
        let node = cache.get(root_rn)?.find(key)?;
        if node.metadata().is_empty() {
            return None;
        }
        let (class, dn) = maker::identity_for_key(key).ok()?;
        let mut mo = ManagedObject::new(class, &dn);
        for (attr, value) in node.metadata() {
            if attr != maker::METADATA_MONITORED {
                mo.set_attr(attr.clone(), value.clone());
            }
        }
        let mut object = convert::from_fabric(&mo)?;
        if node.metadata().contains_key(maker::METADATA_MONITORED) {
            object.set_monitored(true);
        }
        Some(object)
    }

    async fn push_resources(&self, root_rn: &str, batch: ResourceBatch) -> Result<()> {
        if self.kind != UniverseKind::CurrentConfig {
            // Fabric-backed desired universes are ground truth; nothing to push.
            return Ok(());
        }
        let Some(worker) = self.workers.get(root_rn) else {
            return Err(Error::internal(format!("no worker serving {root_rn}")));
        };
        worker.push(PushBatch {
            create: batch.create,
            delete: batch.delete,
        });
        Ok(())
    }

    async fn reset(&self, roots: &BTreeSet<String>) -> Result<()> {
        for root in roots {
            if let Some(worker) = self.workers.get(root) {
                worker.request_reset();
            }
            if let Ok(mut cache) = self.cache.lock() {
                cache.remove(root);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store-backed universes: intent, fault rows, monitored rows
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RootCache {
    tree: StructuredHashTree,
    objects: HashMap<TreeKey, ModelObject>,
}

pub struct StoreUniverse {
    kind: UniverseKind,
    store: Arc<dyn Store>,
    status: StatusReporter,
    cache: Mutex<HashMap<String, RootCache>>,
}

impl StoreUniverse {
    pub fn new(kind: UniverseKind, store: Arc<dyn Store>) -> Self {
        debug_assert!(!kind.is_fabric_backed());
        Self {
            kind,
            status: StatusReporter::new(store.clone()),
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch_objects(&self, root_rn: &str) -> Result<Vec<ModelObject>> {
        match self.kind.tree_kind() {
            TreeKind::Config => self.store.desired_objects(root_rn).await,
            TreeKind::Monitored => self.store.monitored_objects(root_rn).await,
            TreeKind::Operational => {
                let faults = self.store.list_faults(root_rn).await?;
                Ok(faults
                    .into_iter()
                    .map(|record| {
                        ModelObject::Fault(fabricsync_core::model::Fault {
                            external_identifier: Dn::new(record.external_identifier),
                            fault_code: record.fault_code,
                            severity: record.severity,
                            description: record.description,
                            cause: record.cause,
                        })
                    })
                    .collect())
            }
        }
    }

    fn build_cache(&self, root_rn: &str, objects: Vec<ModelObject>) -> RootCache {
        let mut root = RootCache {
            tree: StructuredHashTree::for_root(maker::root_key_segment(root_rn)),
            objects: HashMap::new(),
        };
        for object in objects {
            if let Err(e) = Self::apply_object(&mut root, &object, self.kind.tree_kind()) {
                warn!(root = root_rn, error = %e, "skipping unrepresentable object");
            }
        }
        root
    }

    fn apply_object(root: &mut RootCache, object: &ModelObject, kind: TreeKind) -> Result<()> {
        let items = match kind {
            // Intent: owned objects hash their screened attributes, objects
            // the Fabric owns hash as existence markers.
            TreeKind::Config => maker::desired_items(object)?,
            // Store mirrors of fabric-owned state hash like observations.
            TreeKind::Monitored | TreeKind::Operational => {
                let mut items = Vec::new();
                for mo in convert::to_fabric(object) {
                    let mut item = maker::observed_item(&mo)?;
                    if kind == TreeKind::Monitored {
                        item = item.with_metadata(maker::METADATA_MONITORED, "true");
                    }
                    items.push(item);
                }
                items
            }
        };
        root.tree
            .update(items)
            .map_err(|e| Error::internal(e.to_string()))?;
        for key in maker::keys_for(object)? {
            root.objects.insert(key, object.clone());
        }
        Ok(())
    }

    async fn rebuild(&self, root_rn: &str) -> Result<()> {
        let objects = self.fetch_objects(root_rn).await?;
        let rebuilt = self.build_cache(root_rn, objects);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(root_rn.to_string(), rebuilt);
        }
        Ok(())
    }
}

#[async_trait]
impl Universe for StoreUniverse {
    fn kind(&self) -> UniverseKind {
        self.kind
    }

    async fn observe(&self, roots: &[String]) -> Result<()> {
        if self.kind.tree_kind() != TreeKind::Config {
            // Fault and monitored rows are few; rebuild wholesale.
            for root in roots {
                self.rebuild(root).await?;
            }
            return Ok(());
        }

        // Intent trees fold the action log incrementally; a RESET marker or
        // a cold cache forces a rebuild from the store.
        for root in roots {
            let actions = self.store.drain_actions(root).await?;
            let cached = self
                .cache
                .lock()
                .map(|c| c.contains_key(root.as_str()))
                .unwrap_or(false);
            let needs_rebuild =
                !cached || actions.iter().any(|a| a.op == ActionOp::Reset);
            if needs_rebuild {
                debug!(root = %root, "rebuilding desired tree from store");
                self.rebuild(root).await?;
                continue;
            }
            if actions.is_empty() {
                continue;
            }
            for action in actions {
                let Some(dn) = action.dn else { continue };
                match action.op {
                    ActionOp::Create => {
                        if let Some(object) = self.store.desired_object(&dn).await? {
                            if let Ok(mut cache) = self.cache.lock() {
                                if let Some(root_cache) = cache.get_mut(root.as_str()) {
                                    if let Err(e) = Self::apply_object(
                                        root_cache,
                                        &object,
                                        TreeKind::Config,
                                    ) {
                                        warn!(%dn, error = %e, "intent apply failed");
                                    }
                                }
                            }
                        }
                    }
                    ActionOp::Delete => {
                        if let Ok(key) = maker::key_for(&dn) {
                            if let Ok(mut cache) = self.cache.lock() {
                                if let Some(root_cache) = cache.get_mut(root.as_str()) {
                                    root_cache.tree.delete(vec![key]);
                                    root_cache.objects.retain(|_, o| o.dn() != dn);
                                }
                            }
                        }
                    }
                    ActionOp::Reset => {}
                }
            }
        }
        Ok(())
    }

    fn state(&self, root_rn: &str) -> StructuredHashTree {
        self.cache
            .lock()
            .ok()
            .and_then(|c| c.get(root_rn).map(|r| r.tree.snapshot()))
            .unwrap_or_default()
    }

    fn object_for_key(&self, root_rn: &str, key: &TreeKey) -> Option<ModelObject> {
        self.cache
            .lock()
            .ok()
            .and_then(|c| c.get(root_rn).and_then(|r| r.objects.get(key).cloned()))
    }

    async fn push_resources(&self, _root_rn: &str, batch: ResourceBatch) -> Result<()> {
        match self.kind {
            // Fault rows mirror the Fabric's operational truth.
            UniverseKind::CurrentOperational => {
                for object in batch.create {
                    if let ModelObject::Fault(fault) = object {
                        self.status.upsert_fault(&fault).await?;
                    }
                }
                for mo in batch.delete {
                    if let Some(dn) = mo.dn() {
                        self.status.clear_fault(dn.as_str()).await?;
                    }
                }
            }
            // Monitored rows mirror fabric-owned objects into the store.
            UniverseKind::CurrentMonitored => {
                for mut object in batch.create {
                    object.set_monitored(true);
                    self.store.upsert_monitored(object).await?;
                }
                for mo in batch.delete {
                    if let Some(dn) = mo.dn() {
                        self.store.remove_monitored(&dn).await?;
                    }
                }
            }
            // The desired side is ground truth; nothing is ever pushed at it.
            _ => {}
        }
        Ok(())
    }

    async fn reset(&self, roots: &BTreeSet<String>) -> Result<()> {
        for root in roots {
            if let Ok(mut cache) = self.cache.lock() {
                cache.remove(root.as_str());
            }
            if self.kind.tree_kind() == TreeKind::Config {
                self.store
                    .append_action(root, fabricsync_core::ActionLogRecord::reset())
                    .await?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Multiverse
// ---------------------------------------------------------------------------

pub struct Multiverse {
    universes: HashMap<UniverseKind, Arc<dyn Universe>>,
}

impl Multiverse {
    pub fn new(store: Arc<dyn Store>, workers: Arc<WorkerRegistry>) -> Self {
        let mut universes: HashMap<UniverseKind, Arc<dyn Universe>> = HashMap::new();
        for kind in [
            UniverseKind::CurrentConfig,
            UniverseKind::DesiredOperational,
            UniverseKind::DesiredMonitored,
        ] {
            universes.insert(
                kind,
                Arc::new(FabricUniverse::new(kind, workers.clone(), store.clone())),
            );
        }
        for kind in [
            UniverseKind::DesiredConfig,
            UniverseKind::CurrentOperational,
            UniverseKind::CurrentMonitored,
        ] {
            universes.insert(kind, Arc::new(StoreUniverse::new(kind, store.clone())));
        }
        Self { universes }
    }

    pub fn universe(&self, kind: UniverseKind) -> Arc<dyn Universe> {
        self.universes[&kind].clone()
    }

    pub async fn observe_all(&self, roots: &[String]) -> Result<()> {
        for universe in self.universes.values() {
            universe.observe(roots).await?;
        }
        Ok(())
    }

    /// Does any universe `kind` reads against (other than itself) claim this
    /// key? Used for delete safety: something that ought to exist is never
    /// removed just because one view lost it.
    pub fn claimed_by_relevant(&self, kind: UniverseKind, root_rn: &str, key: &TreeKey) -> bool {
        kind.relevant()
            .iter()
            .filter(|k| **k != kind)
            .any(|k| {
                self.universe(*k)
                    .state(root_rn)
                    .find(key)
                    .is_some_and(|node| !node.is_dummy())
            })
    }

    /// Resolve a key into a model object by asking the universe itself, then
    /// the universes it reads against.
    pub fn resolve_object(
        &self,
        kind: UniverseKind,
        root_rn: &str,
        key: &TreeKey,
    ) -> Option<ModelObject> {
        if let Some(object) = self.universe(kind).object_for_key(root_rn, key) {
            return Some(object);
        }
        kind.relevant()
            .iter()
            .filter(|k| **k != kind)
            .find_map(|k| self.universe(*k).object_for_key(root_rn, key))
    }
}
