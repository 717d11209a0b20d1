//! Fabricsync Tree - content-addressed hash trees over DN-keyed objects
//!
//! Pure in-memory structures: no I/O, no suspension points. Snapshots of a
//! tree can therefore be taken from any task by a serialize/deserialize
//! round-trip without extra locking.

pub mod hash_tree;

pub use hash_tree::{StructuredHashTree, TreeDiff, TreeError, TreeItem, TreeKey, TreeNode};
