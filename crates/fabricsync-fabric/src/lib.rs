//! Fabricsync Fabric - the Fabric-facing seam
//!
//! Class registry, subscription URLs, model/MO conversion, tree-item
//! projection, and the `FabricClient` trait. The concrete REST/WebSocket
//! client lives outside this workspace; `testing::FakeFabric` is the
//! in-memory implementation the test suites run against.

pub mod client;
pub mod convert;
pub mod maker;
pub mod registry;
pub mod subscription;
pub mod testing;

pub use client::{FabricClient, QueryOptions};
pub use registry::{ClassInfo, NameSource};
