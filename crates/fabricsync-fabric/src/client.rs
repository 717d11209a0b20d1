//! Fabric client seam
//!
//! The concrete REST/WebSocket session lives outside this workspace. The
//! agent consumes it through this trait; per-call timeouts and internal
//! serialization of a shared session are the implementation's business.

use async_trait::async_trait;
use fabricsync_core::{Dn, ManagedObject, Result};

/// Options for a subtree read.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Ask only for configurable properties (dropped for operational reads).
    pub config_only: bool,
    /// `target-subtree-class` filter; empty means every class.
    pub target_classes: Vec<String>,
}

impl QueryOptions {
    pub fn config_only() -> Self {
        Self {
            config_only: true,
            target_classes: Vec::new(),
        }
    }

    pub fn with_classes(mut self, classes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.target_classes = classes.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
pub trait FabricClient: Send + Sync {
    /// Open (or keep) the live subscription behind `url`. Idempotent.
    async fn subscribe(&self, url: &str) -> Result<()>;

    /// Drop the subscription behind `url`; best-effort.
    async fn unsubscribe(&self, url: &str) -> Result<()>;

    async fn has_events(&self, url: &str) -> bool;

    /// Take every pending event for `url`, oldest first.
    async fn drain_events(&self, url: &str) -> Result<Vec<ManagedObject>>;

    /// Read an object and its subtree. `Err(NotFound)` when the DN is gone.
    async fn get_subtree(&self, dn: &Dn, options: QueryOptions) -> Result<Vec<ManagedObject>>;

    /// Write one parent→child chain atomically.
    async fn post_transaction(&self, mos: Vec<ManagedObject>) -> Result<()>;

    /// Delete the object at `dn` (and implicitly its subtree).
    async fn delete(&self, dn: &Dn) -> Result<()>;
}
