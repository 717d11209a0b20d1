//! Fabricsync - intent-driven reconciliation agent for network fabrics
//!
//! Umbrella crate re-exporting the workspace members. Embedders bring a
//! store and a Fabric client, then drive [`agent::AgentService`].

pub use fabricsync_agent as agent;
pub use fabricsync_core as core;
pub use fabricsync_fabric as fabric;
pub use fabricsync_tree as tree;
