//! Store trait - the persistence seam
//!
//! The relational store lives outside this workspace; the agent consumes it
//! through this trait. Tables: agents, hash_trees, action_logs, statuses,
//! faults, plus the declarative intent the reconciler reads desired state
//! from. `MemoryStore` in this crate is the reference implementation.

use crate::dn::Dn;
use crate::error::Result;
use crate::model::{AgentRecord, FaultRecord, ModelObject, ObjectStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Action-log bound per root; beyond it the log collapses into a RESET
/// marker and readers rebuild the root's trees from scratch.
pub const MAX_ACTIONS_PER_ROOT: usize = 1000;

/// Which of a root's three hash trees a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    Config,
    Operational,
    Monitored,
}

impl TreeKind {
    pub const ALL: [TreeKind; 3] = [TreeKind::Config, TreeKind::Operational, TreeKind::Monitored];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Operational => "operational",
            Self::Monitored => "monitored",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOp {
    Create,
    Delete,
    Reset,
}

/// One entry of a root's append-only action log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogRecord {
    pub op: ActionOp,
    /// Absent for RESET markers.
    pub dn: Option<Dn>,
    pub timestamp: DateTime<Utc>,
}

impl ActionLogRecord {
    pub fn create(dn: Dn) -> Self {
        Self {
            op: ActionOp::Create,
            dn: Some(dn),
            timestamp: Utc::now(),
        }
    }

    pub fn delete(dn: Dn) -> Self {
        Self {
            op: ActionOp::Delete,
            dn: Some(dn),
            timestamp: Utc::now(),
        }
    }

    pub fn reset() -> Self {
        Self {
            op: ActionOp::Reset,
            dn: None,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- agents ------------------------------------------------------------

    async fn upsert_agent(&self, agent: AgentRecord) -> Result<()>;
    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>>;
    async fn list_agents(&self) -> Result<Vec<AgentRecord>>;

    // -- intent ------------------------------------------------------------

    /// Declared (desired) objects under one root.
    async fn desired_objects(&self, root_rn: &str) -> Result<Vec<ModelObject>>;
    /// Point lookup of one declared object.
    async fn desired_object(&self, dn: &Dn) -> Result<Option<ModelObject>>;
    /// Roots that have any intent at all.
    async fn intent_roots(&self) -> Result<BTreeSet<String>>;
    /// Write intent and append a create entry to the root's action log.
    async fn put_desired(&self, object: ModelObject) -> Result<()>;
    /// Remove intent and append a delete entry to the root's action log.
    async fn delete_desired(&self, dn: &Dn) -> Result<()>;

    // -- monitored rows (fabric-owned objects mirrored into the store) -----

    async fn monitored_objects(&self, root_rn: &str) -> Result<Vec<ModelObject>>;
    async fn upsert_monitored(&self, object: ModelObject) -> Result<()>;
    async fn remove_monitored(&self, dn: &Dn) -> Result<()>;

    // -- hash trees --------------------------------------------------------

    async fn save_tree(&self, root_rn: &str, kind: TreeKind, bytes: Vec<u8>) -> Result<()>;
    async fn load_tree(&self, root_rn: &str, kind: TreeKind) -> Result<Option<Vec<u8>>>;
    async fn delete_trees(&self, root_rn: &str) -> Result<()>;
    /// Roots with at least one persisted tree.
    async fn tree_roots(&self) -> Result<BTreeSet<String>>;

    // -- action log --------------------------------------------------------

    /// Take and clear the pending action log of a root.
    async fn drain_actions(&self, root_rn: &str) -> Result<Vec<ActionLogRecord>>;
    async fn append_action(&self, root_rn: &str, record: ActionLogRecord) -> Result<()>;

    // -- statuses ----------------------------------------------------------

    async fn set_status(&self, status: ObjectStatus) -> Result<()>;
    async fn get_status(&self, resource_id: &str) -> Result<Option<ObjectStatus>>;

    // -- faults ------------------------------------------------------------

    async fn upsert_fault(&self, fault: FaultRecord) -> Result<()>;
    async fn remove_fault(&self, external_identifier: &str) -> Result<()>;
    async fn list_faults(&self, root_rn: &str) -> Result<Vec<FaultRecord>>;
}
