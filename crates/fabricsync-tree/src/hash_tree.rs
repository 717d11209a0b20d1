//! Structured hash tree
//!
//! A prefix tree keyed by typed DN segments (`class|rn`). Each node carries a
//! fingerprint of its own attributes (`partial_hash`) and a memoized hash of
//! the whole subtree (`full_hash`). The subtree hash depends only on the
//! node's fingerprint and the multiset of child hashes; child insertion order
//! is irrelevant because children live in a sorted map.
//!
//! Nodes synthesized as missing intermediates are "dummy": empty fingerprint,
//! excluded from diffs, pruned as soon as their last real child goes away.

use ring::digest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A tree key: the typed segments of a DN, root first.
pub type TreeKey = Vec<String>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TreeError {
    #[error("empty key")]
    EmptyKey,

    #[error("key root {key_root} does not match tree root {tree_root}")]
    RootMismatch { tree_root: String, key_root: String },

    #[error("malformed tree bytes: {0}")]
    Malformed(String),
}

/// One object headed for the tree: hashed attributes plus unhashed metadata
/// kept for reconstructing a pushable object from a bare diff key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreeItem {
    pub key: TreeKey,
    pub attributes: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
}

impl TreeItem {
    pub fn new(key: TreeKey) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TreeNode {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    partial_hash: String,
    #[serde(default)]
    full_hash: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    dummy: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn new_dummy() -> Self {
        Self {
            dummy: true,
            ..Default::default()
        }
    }

    pub fn partial_hash(&self) -> &str {
        &self.partial_hash
    }

    pub fn full_hash(&self) -> &str {
        &self.full_hash
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn is_dummy(&self) -> bool {
        self.dummy
    }

    /// Recompute this node's subtree hash from its fingerprint and the
    /// (already up-to-date) hashes of its children.
    fn rehash(&mut self) {
        let mut ctx = digest::Context::new(&digest::SHA256);
        ctx.update(self.partial_hash.as_bytes());
        for child in self.children.values() {
            ctx.update(b"/");
            ctx.update(child.full_hash.as_bytes());
        }
        self.full_hash = hex(ctx.finish().as_ref());
    }
}

/// Hex-encode a digest.
fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Fingerprint a sorted attribute map.
fn hash_attributes(attributes: &BTreeMap<String, String>) -> String {
    let mut ctx = digest::Context::new(&digest::SHA256);
    for (key, value) in attributes {
        ctx.update(key.as_bytes());
        ctx.update(b"=");
        ctx.update(value.as_bytes());
        ctx.update(b"\n");
    }
    hex(ctx.finish().as_ref())
}

/// Result of comparing two trees.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreeDiff {
    /// Keys present in the other tree but missing or different here.
    pub add: Vec<TreeKey>,
    /// Keys present here but absent from the other tree.
    pub remove: Vec<TreeKey>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StructuredHashTree {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root: Option<TreeNode>,
}

impl StructuredHashTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty tree pinned to a root segment.
    pub fn for_root(root_key: impl Into<String>) -> Self {
        Self {
            root_key: Some(root_key.into()),
            root: None,
        }
    }

    pub fn root_key(&self) -> Option<&str> {
        self.root_key.as_deref()
    }

    /// True when no real (non-dummy) node exists.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Hash of the whole tree; `None` while empty.
    pub fn root_hash(&self) -> Option<&str> {
        self.root.as_ref().map(|n| n.full_hash())
    }

    /// Drop all nodes; the root key is retained.
    pub fn clear(&mut self) {
        self.root = None;
    }

    pub fn find(&self, key: &[String]) -> Option<&TreeNode> {
        let (first, rest) = key.split_first()?;
        let mut node = self.root.as_ref()?;
        if self.root_key.as_deref() != Some(first.as_str()) {
            return None;
        }
        for segment in rest {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    /// Batched insert/refresh. All items must share the tree's root segment;
    /// the first item pins it on a fresh tree.
    pub fn update(&mut self, items: Vec<TreeItem>) -> Result<(), TreeError> {
        for item in items {
            self.update_one(item)?;
        }
        Ok(())
    }

    fn update_one(&mut self, item: TreeItem) -> Result<(), TreeError> {
        let (first, rest) = item.key.split_first().ok_or(TreeError::EmptyKey)?;
        match &self.root_key {
            None => self.root_key = Some(first.clone()),
            Some(root) if root == first => {}
            Some(root) => {
                return Err(TreeError::RootMismatch {
                    tree_root: root.clone(),
                    key_root: first.clone(),
                })
            }
        }
        let root = self.root.get_or_insert_with(TreeNode::new_dummy);
        Self::insert_at(root, rest, &item);
        Ok(())
    }

    fn insert_at(node: &mut TreeNode, rest: &[String], item: &TreeItem) {
        if let Some((segment, tail)) = rest.split_first() {
            let child = node
                .children
                .entry(segment.clone())
                .or_insert_with(TreeNode::new_dummy);
            Self::insert_at(child, tail, item);
        } else {
            node.partial_hash = hash_attributes(&item.attributes);
            node.metadata = item.metadata.clone();
            node.dummy = false;
        }
        // Children first, then self: hashes stay consistent bottom-up.
        node.rehash();
    }

    /// Batched removal. Unknown keys are no-ops; removing a node drops its
    /// whole subtree, and childless dummy ancestors are pruned on the way up.
    pub fn delete(&mut self, keys: Vec<TreeKey>) {
        for key in keys {
            self.delete_one(&key);
        }
    }

    fn delete_one(&mut self, key: &[String]) {
        let Some((first, rest)) = key.split_first() else {
            return;
        };
        if self.root_key.as_deref() != Some(first.as_str()) {
            return;
        }
        if rest.is_empty() {
            self.root = None;
            return;
        }
        let Some(root) = self.root.as_mut() else {
            return;
        };
        if Self::remove_at(root, rest) {
            root.rehash();
            if root.dummy && root.children.is_empty() {
                self.root = None;
            }
        }
    }

    /// Returns true when the child at `rest` was found and removed.
    fn remove_at(node: &mut TreeNode, rest: &[String]) -> bool {
        let Some((segment, tail)) = rest.split_first() else {
            return false;
        };
        if tail.is_empty() {
            return node.children.remove(segment).is_some();
        }
        let Some(child) = node.children.get_mut(segment) else {
            return false;
        };
        let removed = Self::remove_at(child, tail);
        if removed {
            child.rehash();
            if child.dummy && child.children.is_empty() {
                node.children.remove(segment);
            }
        }
        removed
    }

    /// All real nodes as `key -> node`.
    pub fn flatten(&self) -> BTreeMap<TreeKey, &TreeNode> {
        let mut out = BTreeMap::new();
        if let (Some(root_key), Some(root)) = (&self.root_key, &self.root) {
            let mut prefix = vec![root_key.clone()];
            Self::collect(root, &mut prefix, &mut out);
        }
        out
    }

    fn collect<'a>(
        node: &'a TreeNode,
        prefix: &mut TreeKey,
        out: &mut BTreeMap<TreeKey, &'a TreeNode>,
    ) {
        if !node.dummy {
            out.insert(prefix.clone(), node);
        }
        for (segment, child) in &node.children {
            prefix.push(segment.clone());
            Self::collect(child, prefix, out);
            prefix.pop();
        }
    }

    /// Compare against `other`: `add` holds keys that are new or changed in
    /// `other`, `remove` holds keys that only exist here. Dummy nodes never
    /// participate.
    pub fn diff(&self, other: &StructuredHashTree) -> TreeDiff {
        let ours = self.flatten();
        let theirs = other.flatten();
        let mut diff = TreeDiff::default();
        for (key, node) in &theirs {
            match ours.get(key) {
                Some(existing) if existing.partial_hash == node.partial_hash => {}
                _ => diff.add.push(key.clone()),
            }
        }
        for key in ours.keys() {
            if !theirs.contains_key(key) {
                diff.remove.push(key.clone());
            }
        }
        diff
    }

    /// Pull keys from `other` that this tree does not have at all. Existing
    /// keys keep their local fingerprint; used to compose the effective
    /// state a universe reads against.
    pub fn overlay(&mut self, other: &StructuredHashTree) {
        if self.root_key.is_none() {
            self.root_key = other.root_key.clone();
        }
        if self.root_key != other.root_key {
            return;
        }
        for (key, node) in other.flatten() {
            if self.find(&key).is_some() {
                continue;
            }
            let Some((_, rest)) = key.split_first() else {
                continue;
            };
            let root = self.root.get_or_insert_with(TreeNode::new_dummy);
            Self::overlay_at(root, rest, node);
        }
    }

    fn overlay_at(target: &mut TreeNode, rest: &[String], source: &TreeNode) {
        if let Some((segment, tail)) = rest.split_first() {
            let child = target
                .children
                .entry(segment.clone())
                .or_insert_with(TreeNode::new_dummy);
            Self::overlay_at(child, tail, source);
        } else {
            target.partial_hash = source.partial_hash.clone();
            target.metadata = source.metadata.clone();
            target.dummy = false;
        }
        target.rehash();
    }

    /// Deterministic byte serialization; `from_bytes` inverts it exactly.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TreeError> {
        serde_json::from_slice(bytes).map_err(|e| TreeError::Malformed(e.to_string()))
    }

    /// Independent deep copy through the byte representation.
    pub fn snapshot(&self) -> StructuredHashTree {
        self.clone()
    }
}

impl fmt::Display for StructuredHashTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(parts: &[&str]) -> TreeKey {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn item(parts: &[&str]) -> TreeItem {
        TreeItem::new(key(parts))
    }

    #[test]
    fn serialize_roundtrip_is_identity() {
        let mut tree = StructuredHashTree::new();
        tree.update(vec![
            item(&["fvTenant|tn-t"]).with_attr("descr", "x"),
            item(&["fvTenant|tn-t", "fvBD|BD-web"]).with_attr("arpFlood", "yes"),
            item(&["fvTenant|tn-t", "fvBD|BD-web", "fvRsCtx|rsctx"])
                .with_metadata("monitored", "true"),
        ])
        .unwrap();

        let bytes = tree.to_bytes();
        let back = StructuredHashTree::from_bytes(&bytes).unwrap();
        assert_eq!(tree, back);
        assert_eq!(bytes, back.to_bytes());
    }

    #[test]
    fn diff_of_equal_trees_is_empty() {
        let mut a = StructuredHashTree::new();
        a.update(vec![item(&["fvTenant|tn-t"]), item(&["fvTenant|tn-t", "fvBD|BD-b"])])
            .unwrap();
        let b = a.snapshot();
        assert!(a.diff(&b).is_empty());
    }

    #[test]
    fn diff_sees_new_key_as_add_only() {
        let mut a = StructuredHashTree::new();
        a.update(vec![item(&["fvTenant|tn-t"])]).unwrap();
        let mut b = a.snapshot();
        b.update(vec![item(&["fvTenant|tn-t", "fvBD|BD-b"])]).unwrap();

        let diff = a.diff(&b);
        assert_eq!(vec![key(&["fvTenant|tn-t", "fvBD|BD-b"])], diff.add);
        assert!(diff.remove.is_empty());

        // Swapping the operands swaps the outputs.
        let swapped = b.diff(&a);
        assert!(swapped.add.is_empty());
        assert_eq!(vec![key(&["fvTenant|tn-t", "fvBD|BD-b"])], swapped.remove);
    }

    #[test]
    fn diff_sees_changed_fingerprint() {
        let mut a = StructuredHashTree::new();
        a.update(vec![item(&["fvTenant|tn-t", "fvBD|BD-b"]).with_attr("arpFlood", "no")])
            .unwrap();
        let mut b = a.snapshot();
        b.update(vec![item(&["fvTenant|tn-t", "fvBD|BD-b"]).with_attr("arpFlood", "yes")])
            .unwrap();
        let diff = a.diff(&b);
        assert_eq!(vec![key(&["fvTenant|tn-t", "fvBD|BD-b"])], diff.add);
        assert!(diff.remove.is_empty());
    }

    #[test]
    fn update_with_equal_attributes_keeps_hash() {
        let mut tree = StructuredHashTree::new();
        tree.update(vec![item(&["fvTenant|tn-t"]).with_attr("descr", "x")])
            .unwrap();
        let before = tree.root_hash().map(str::to_string);
        tree.update(vec![item(&["fvTenant|tn-t"]).with_attr("descr", "x")])
            .unwrap();
        assert_eq!(before.as_deref(), tree.root_hash());
    }

    #[test]
    fn child_order_does_not_change_hash() {
        let mut forward = StructuredHashTree::new();
        forward
            .update(vec![
                item(&["fvTenant|tn-t"]),
                item(&["fvTenant|tn-t", "fvBD|BD-a"]),
                item(&["fvTenant|tn-t", "fvBD|BD-b"]),
            ])
            .unwrap();
        let mut reversed = StructuredHashTree::new();
        reversed
            .update(vec![
                item(&["fvTenant|tn-t"]),
                item(&["fvTenant|tn-t", "fvBD|BD-b"]),
                item(&["fvTenant|tn-t", "fvBD|BD-a"]),
            ])
            .unwrap();
        assert_eq!(forward.root_hash(), reversed.root_hash());
    }

    #[test]
    fn delete_missing_key_is_noop() {
        let mut tree = StructuredHashTree::new();
        tree.update(vec![item(&["fvTenant|tn-t"])]).unwrap();
        let before = tree.snapshot();
        tree.delete(vec![key(&["fvTenant|tn-t", "fvBD|BD-nope"])]);
        assert_eq!(before, tree);
    }

    #[test]
    fn delete_prunes_dummy_ancestors() {
        let mut tree = StructuredHashTree::new();
        // Deep insert synthesizes dummy tenant and BD nodes.
        tree.update(vec![item(&[
            "fvTenant|tn-t",
            "fvBD|BD-b",
            "fvRsCtx|rsctx",
        ])])
        .unwrap();
        assert!(tree
            .find(&key(&["fvTenant|tn-t", "fvBD|BD-b"]))
            .is_some_and(TreeNode::is_dummy));

        tree.delete(vec![key(&["fvTenant|tn-t", "fvBD|BD-b", "fvRsCtx|rsctx"])]);
        // The dummy BD and the dummy root vanish with their only child.
        assert!(tree.is_empty());
        assert_eq!(Some("fvTenant|tn-t"), tree.root_key());
    }

    #[test]
    fn delete_removes_whole_subtree() {
        let mut tree = StructuredHashTree::new();
        tree.update(vec![
            item(&["fvTenant|tn-t"]),
            item(&["fvTenant|tn-t", "fvBD|BD-b"]),
            item(&["fvTenant|tn-t", "fvBD|BD-b", "fvRsCtx|rsctx"]),
        ])
        .unwrap();
        tree.delete(vec![key(&["fvTenant|tn-t", "fvBD|BD-b"])]);
        assert!(tree.find(&key(&["fvTenant|tn-t", "fvBD|BD-b", "fvRsCtx|rsctx"])).is_none());
        assert!(tree.find(&key(&["fvTenant|tn-t"])).is_some());
    }

    #[test]
    fn root_mismatch_is_rejected() {
        let mut tree = StructuredHashTree::new();
        tree.update(vec![item(&["fvTenant|tn-a"])]).unwrap();
        let err = tree.update(vec![item(&["fvTenant|tn-b"])]).unwrap_err();
        assert!(matches!(err, TreeError::RootMismatch { .. }));
    }

    #[test]
    fn overlay_fills_only_missing_keys() {
        let mut base = StructuredHashTree::new();
        base.update(vec![item(&["fvTenant|tn-t"]).with_attr("descr", "mine")])
            .unwrap();
        let mut other = StructuredHashTree::new();
        other
            .update(vec![
                item(&["fvTenant|tn-t"]).with_attr("descr", "theirs"),
                item(&["fvTenant|tn-t", "fvBD|BD-b"]),
            ])
            .unwrap();

        let local_fingerprint = base.find(&key(&["fvTenant|tn-t"])).unwrap().partial_hash().to_string();
        base.overlay(&other);
        // Existing key untouched, new key pulled in.
        assert_eq!(
            local_fingerprint,
            base.find(&key(&["fvTenant|tn-t"])).unwrap().partial_hash()
        );
        assert!(base.find(&key(&["fvTenant|tn-t", "fvBD|BD-b"])).is_some());
    }
}
