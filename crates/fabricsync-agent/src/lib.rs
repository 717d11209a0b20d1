//! Fabricsync Agent - per-tenant workers, universes, and the reconciler
//!
//! One process hosts one reconciler task, one heartbeat task, and one worker
//! task per served tenant root. Workers own their root's hash trees and fold
//! the live event stream into them; the reconciler diffs desired against
//! observed state across the multiverse and pushes the difference back out.

pub mod reconcile;
pub mod serve;
pub mod service;
pub mod status;
pub mod universe;
pub mod worker;

pub use reconcile::{Reconciler, TickOutcome};
pub use serve::ServeController;
pub use service::AgentService;
pub use status::StatusReporter;
pub use universe::{Multiverse, ResourceBatch, Universe, UniverseKind};
pub use worker::{PushBatch, PushOutcome, TenantWorker, WorkerRegistry, WorkerState};
