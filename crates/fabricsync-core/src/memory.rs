//! In-memory store
//!
//! Backs the test suites and any embedder that does not bring a relational
//! store. Locks are std mutexes held only for the duration of a map access;
//! no await happens under a lock.

use crate::dn::Dn;
use crate::error::{Error, Result};
use crate::model::{AgentRecord, FaultRecord, ModelObject, ObjectStatus};
use crate::store::{ActionLogRecord, ActionOp, Store, TreeKind, MAX_ACTIONS_PER_ROOT};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    agents: Mutex<BTreeMap<String, AgentRecord>>,
    desired: Mutex<BTreeMap<String, ModelObject>>,
    monitored: Mutex<BTreeMap<String, ModelObject>>,
    trees: Mutex<HashMap<(String, TreeKind), Vec<u8>>>,
    actions: Mutex<HashMap<String, Vec<ActionLogRecord>>>,
    statuses: Mutex<BTreeMap<String, ObjectStatus>>,
    faults: Mutex<BTreeMap<String, FaultRecord>>,
    /// Overridable for tests that force RESET collapses.
    max_actions_per_root: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            max_actions_per_root: MAX_ACTIONS_PER_ROOT,
            ..Default::default()
        }
    }

    /// A store whose action logs collapse into RESET after `bound` entries.
    pub fn with_action_bound(bound: usize) -> Self {
        Self {
            max_actions_per_root: bound,
            ..Default::default()
        }
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>> {
        mutex
            .lock()
            .map_err(|_| Error::store("memory store lock poisoned"))
    }

    fn push_action(&self, root_rn: &str, record: ActionLogRecord) -> Result<()> {
        let mut actions = Self::lock(&self.actions)?;
        let log = actions.entry(root_rn.to_string()).or_default();
        if record.op != ActionOp::Reset && log.len() >= self.max_actions_per_root {
            log.clear();
            log.push(ActionLogRecord::reset());
        } else {
            log.push(record);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_agent(&self, agent: AgentRecord) -> Result<()> {
        Self::lock(&self.agents)?.insert(agent.id.clone(), agent);
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>> {
        Ok(Self::lock(&self.agents)?.get(id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        Ok(Self::lock(&self.agents)?.values().cloned().collect())
    }

    async fn desired_objects(&self, root_rn: &str) -> Result<Vec<ModelObject>> {
        Ok(Self::lock(&self.desired)?
            .values()
            .filter(|o| o.root_rn() == root_rn)
            .cloned()
            .collect())
    }

    async fn desired_object(&self, dn: &Dn) -> Result<Option<ModelObject>> {
        Ok(Self::lock(&self.desired)?.get(dn.as_str()).cloned())
    }

    async fn intent_roots(&self) -> Result<BTreeSet<String>> {
        Ok(Self::lock(&self.desired)?
            .values()
            .map(ModelObject::root_rn)
            .collect())
    }

    async fn put_desired(&self, object: ModelObject) -> Result<()> {
        let dn = object.dn();
        let root = object.root_rn();
        Self::lock(&self.desired)?.insert(dn.to_string(), object);
        self.push_action(&root, ActionLogRecord::create(dn))
    }

    async fn delete_desired(&self, dn: &Dn) -> Result<()> {
        let removed = Self::lock(&self.desired)?.remove(dn.as_str());
        if let Some(object) = removed {
            self.push_action(&object.root_rn(), ActionLogRecord::delete(dn.clone()))?;
        }
        Ok(())
    }

    async fn monitored_objects(&self, root_rn: &str) -> Result<Vec<ModelObject>> {
        Ok(Self::lock(&self.monitored)?
            .values()
            .filter(|o| o.root_rn() == root_rn)
            .cloned()
            .collect())
    }

    async fn upsert_monitored(&self, object: ModelObject) -> Result<()> {
        Self::lock(&self.monitored)?.insert(object.dn().to_string(), object);
        Ok(())
    }

    async fn remove_monitored(&self, dn: &Dn) -> Result<()> {
        Self::lock(&self.monitored)?.remove(dn.as_str());
        Ok(())
    }

    async fn save_tree(&self, root_rn: &str, kind: TreeKind, bytes: Vec<u8>) -> Result<()> {
        Self::lock(&self.trees)?.insert((root_rn.to_string(), kind), bytes);
        Ok(())
    }

    async fn load_tree(&self, root_rn: &str, kind: TreeKind) -> Result<Option<Vec<u8>>> {
        Ok(Self::lock(&self.trees)?
            .get(&(root_rn.to_string(), kind))
            .cloned())
    }

    async fn delete_trees(&self, root_rn: &str) -> Result<()> {
        Self::lock(&self.trees)?.retain(|(root, _), _| root != root_rn);
        Ok(())
    }

    async fn tree_roots(&self) -> Result<BTreeSet<String>> {
        Ok(Self::lock(&self.trees)?
            .keys()
            .map(|(root, _)| root.clone())
            .collect())
    }

    async fn drain_actions(&self, root_rn: &str) -> Result<Vec<ActionLogRecord>> {
        Ok(Self::lock(&self.actions)?
            .remove(root_rn)
            .unwrap_or_default())
    }

    async fn append_action(&self, root_rn: &str, record: ActionLogRecord) -> Result<()> {
        self.push_action(root_rn, record)
    }

    async fn set_status(&self, status: ObjectStatus) -> Result<()> {
        Self::lock(&self.statuses)?.insert(status.resource_id.clone(), status);
        Ok(())
    }

    async fn get_status(&self, resource_id: &str) -> Result<Option<ObjectStatus>> {
        Ok(Self::lock(&self.statuses)?.get(resource_id).cloned())
    }

    async fn upsert_fault(&self, fault: FaultRecord) -> Result<()> {
        Self::lock(&self.faults)?.insert(fault.external_identifier.clone(), fault);
        Ok(())
    }

    async fn remove_fault(&self, external_identifier: &str) -> Result<()> {
        Self::lock(&self.faults)?.remove(external_identifier);
        Ok(())
    }

    async fn list_faults(&self, root_rn: &str) -> Result<Vec<FaultRecord>> {
        Ok(Self::lock(&self.faults)?
            .values()
            .filter(|f| Dn::new(f.external_identifier.clone()).root_rn() == root_rn)
            .cloned()
            .collect())
    }
}
