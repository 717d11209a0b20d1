//! Fabricsync Core - shared types, configuration, errors, and store traits

pub mod config;
pub mod dn;
pub mod error;
pub mod memory;
pub mod mo;
pub mod model;
pub mod store;

pub use config::AgentConfig;
pub use dn::Dn;
pub use error::{Error, ErrorClass, Result, EXIT_AUTH_EXPIRED, EXIT_HEARTBEAT_EXPIRED};
pub use memory::MemoryStore;
pub use mo::{EventBatch, ManagedObject};
pub use model::*;
pub use store::{ActionLogRecord, ActionOp, Store, TreeKind, MAX_ACTIONS_PER_ROOT};
