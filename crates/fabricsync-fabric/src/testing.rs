//! In-memory fake Fabric
//!
//! A controller stand-in for the test suites: a flat DN-keyed object stash,
//! per-root event queues, and a `FabricClient` implementation whose writes
//! echo back as subscription events the way a real controller would.
//! Error injection covers the reconciler's failure ladder; silent mode makes
//! writes vanish to provoke divergence.

use crate::client::{FabricClient, QueryOptions};
use crate::subscription;
use async_trait::async_trait;
use fabricsync_core::mo::{ATTR_STATUS, STATUS_CREATED, STATUS_DELETED};
use fabricsync_core::{Dn, Error, ManagedObject, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct FabricState {
    /// Flat DN-keyed server-side objects.
    server: BTreeMap<String, ManagedObject>,
    /// Pending events per subscribed root RN.
    queues: HashMap<String, Vec<ManagedObject>>,
    subscriptions: HashSet<String>,
    post_error: Option<Error>,
    silent_posts: bool,
    posted: Vec<Vec<ManagedObject>>,
}

#[derive(Default)]
pub struct FakeFabric {
    state: Mutex<FabricState>,
}

impl FakeFabric {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FabricState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enqueue(state: &mut FabricState, mo: ManagedObject) {
        let Some(dn) = mo.dn() else { return };
        let root = dn.root_rn().to_string();
        if state.subscriptions.contains(&root) {
            state.queues.entry(root).or_default().push(mo);
        }
    }

    /// Place an object server-side and announce it to any subscriber.
    pub fn seed_object(&self, mo: ManagedObject) {
        let mut state = self.lock();
        if let Some(dn) = mo.dn() {
            state.server.insert(dn.to_string(), mo.clone());
            Self::enqueue(&mut state, mo);
        }
    }

    pub fn seed_objects(&self, mos: impl IntoIterator<Item = ManagedObject>) {
        for mo in mos {
            self.seed_object(mo);
        }
    }

    /// Enqueue a raw event without touching the server state.
    pub fn emit_event(&self, mo: ManagedObject) {
        let mut state = self.lock();
        Self::enqueue(&mut state, mo);
    }

    /// Delete an object (and subtree) as if an external operator had,
    /// emitting delete events for everything removed.
    pub fn remove_external(&self, dn: &Dn) {
        let mut state = self.lock();
        let removed: Vec<ManagedObject> = state
            .server
            .iter()
            .filter(|(key, _)| Dn::new(key.as_str()).is_under(dn))
            .map(|(_, mo)| mo.clone())
            .collect();
        state
            .server
            .retain(|key, _| !Dn::new(key.as_str()).is_under(dn));
        for mut mo in removed {
            mo.set_attr(ATTR_STATUS, STATUS_DELETED);
            Self::enqueue(&mut state, mo);
        }
    }

    /// Every transaction ever attempted, in order, including rejected ones.
    pub fn posted_transactions(&self) -> Vec<Vec<ManagedObject>> {
        self.lock().posted.clone()
    }

    pub fn clear_posted(&self) {
        self.lock().posted.clear();
    }

    /// Fail every following post with `error`; `None` restores normal writes.
    pub fn set_post_error(&self, error: Option<Error>) {
        self.lock().post_error = error;
    }

    /// Accept posts without applying them (writes vanish silently).
    pub fn set_silent_posts(&self, silent: bool) {
        self.lock().silent_posts = silent;
    }

    pub fn object(&self, dn: &Dn) -> Option<ManagedObject> {
        self.lock().server.get(dn.as_str()).cloned()
    }

    pub fn has_object(&self, dn: &Dn) -> bool {
        self.object(dn).is_some()
    }
}

#[async_trait]
impl FabricClient for FakeFabric {
    async fn subscribe(&self, url: &str) -> Result<()> {
        let root = subscription::url_root(url)
            .ok_or_else(|| Error::internal(format!("unparseable subscription url {url}")))?
            .to_string();
        let mut state = self.lock();
        if !state.subscriptions.insert(root.clone()) {
            return Ok(());
        }
        // Initial dump: everything under the root, statusless, the root
        // container first so subscribers treat it as a full resync.
        let mut snapshot: Vec<ManagedObject> = state
            .server
            .values()
            .filter(|mo| mo.dn().map(|dn| dn.root_rn() == root).unwrap_or(false))
            .cloned()
            .collect();
        snapshot.sort_by_key(|mo| mo.dn().map(|dn| dn.depth()).unwrap_or(0));
        for mut mo in snapshot {
            mo.attributes.remove(ATTR_STATUS);
            state.queues.entry(root.clone()).or_default().push(mo);
        }
        Ok(())
    }

    async fn unsubscribe(&self, url: &str) -> Result<()> {
        if let Some(root) = subscription::url_root(url) {
            let mut state = self.lock();
            state.subscriptions.remove(root);
            state.queues.remove(root);
        }
        Ok(())
    }

    async fn has_events(&self, url: &str) -> bool {
        subscription::url_root(url)
            .map(|root| {
                self.lock()
                    .queues
                    .get(root)
                    .map(|q| !q.is_empty())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    async fn drain_events(&self, url: &str) -> Result<Vec<ManagedObject>> {
        let root = subscription::url_root(url)
            .ok_or_else(|| Error::internal(format!("unparseable subscription url {url}")))?;
        Ok(self.lock().queues.remove(root).unwrap_or_default())
    }

    async fn get_subtree(&self, dn: &Dn, options: QueryOptions) -> Result<Vec<ManagedObject>> {
        let state = self.lock();
        if !state.server.contains_key(dn.as_str()) {
            return Err(Error::NotFound(dn.to_string()));
        }
        Ok(state
            .server
            .iter()
            .filter(|(key, _)| Dn::new(key.as_str()).is_under(dn))
            .filter(|(_, mo)| {
                options.target_classes.is_empty() || options.target_classes.contains(&mo.class)
            })
            .map(|(_, mo)| mo.clone())
            .collect())
    }

    async fn post_transaction(&self, mos: Vec<ManagedObject>) -> Result<()> {
        let mut state = self.lock();
        // Every attempt is recorded, including rejected ones.
        state.posted.push(mos.clone());
        if let Some(error) = &state.post_error {
            return Err(error.clone());
        }
        if state.silent_posts {
            return Ok(());
        }
        // Orphan creates are rejected the way a real controller would.
        for mo in &mos {
            let Some(dn) = mo.dn() else { continue };
            if let Some(parent) = dn.parent() {
                let in_txn = mos
                    .iter()
                    .any(|m| m.dn().as_ref() == Some(&parent));
                if parent.as_str() != fabricsync_core::dn::UNI
                    && !state.server.contains_key(parent.as_str())
                    && !in_txn
                {
                    return Err(Error::fabric_response(
                        dn.to_string(),
                        "102",
                        format!("parent {parent} does not exist"),
                    ));
                }
            }
        }
        for mo in mos {
            let Some(dn) = mo.dn() else { continue };
            let mut stored = mo.clone();
            stored.attributes.remove(ATTR_STATUS);
            state.server.insert(dn.to_string(), stored);
            let mut echo = mo;
            echo.set_attr(ATTR_STATUS, STATUS_CREATED);
            Self::enqueue(&mut state, echo);
        }
        Ok(())
    }

    async fn delete(&self, dn: &Dn) -> Result<()> {
        self.remove_external(dn);
        Ok(())
    }
}
