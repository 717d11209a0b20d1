//! Status reporter
//!
//! Writes per-object sync state and observed fault rows back into the store.
//! Health scores: SYNCED 100, PENDING 50, FAILED 0.

use fabricsync_core::model::Fault;
use fabricsync_core::{FaultRecord, ModelObject, ObjectStatus, Result, Store, SyncStatus};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn Store>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn mark_pending(&self, object: &ModelObject) -> Result<()> {
        self.write(object, SyncStatus::Pending, String::new()).await
    }

    pub async fn mark_synced(&self, object: &ModelObject) -> Result<()> {
        self.write(object, SyncStatus::Synced, String::new()).await
    }

    pub async fn mark_failed(&self, object: &ModelObject, message: &str) -> Result<()> {
        self.write(object, SyncStatus::Failed, message.to_string())
            .await
    }

    async fn write(
        &self,
        object: &ModelObject,
        status: SyncStatus,
        message: String,
    ) -> Result<()> {
        debug!(dn = %object.dn(), ?status, "status update");
        self.store
            .set_status(ObjectStatus::new(object, status, message))
            .await
    }

    pub async fn upsert_fault(&self, fault: &Fault) -> Result<()> {
        self.store.upsert_fault(FaultRecord::from(fault)).await
    }

    pub async fn clear_fault(&self, external_identifier: &str) -> Result<()> {
        self.store.remove_fault(external_identifier).await
    }
}
