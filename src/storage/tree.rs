//! Thread-Safe Ordered Tree Store
//!
//! This module implements the storage engine for treekv: an unbalanced binary
//! search tree keyed by name, guarded by a single mutex.
//!
//! ## Design Decisions
//!
//! 1. **One Coarse Lock**: Every public operation takes the tree lock exactly once
//!    and holds it for the whole search-then-mutate sequence.
//! 2. **Arena Nodes**: Nodes live in a `Vec` owned by the tree and link to each
//!    other by index. Freed slots are recycled through a free list.
//! 3. **Sentinel Head**: Slot 0 is a permanent head node with an empty name.
//!    Every valid key sorts after it, so its right link is the real root.
//! 4. **No Rebalancing**: Sorted inserts degrade into a chain. All traversals are
//!    iterative so a degenerate tree cannot overflow the stack.
//!
//! ## Layout
//!
//! ```text
//!          (root)            slot 0, never freed
//!             \
//!             mike
//!            /    \
//!        alice    tango
//!           \
//!           bob
//! ```

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Maximum length in bytes of a stored name or value.
pub const MAX_FIELD_LEN: usize = 255;

/// Arena slot of the sentinel head.
const HEAD: NodeId = NodeId(0);

/// Errors returned by [`TreeStore::insert`] for fields the tree refuses to hold.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("name is empty")]
    EmptyName,

    #[error("value is empty")]
    EmptyValue,

    #[error("name too long: {len} bytes (max: {max})")]
    NameTooLong { len: usize, max: usize },

    #[error("value too long: {len} bytes (max: {max})")]
    ValueTooLong { len: usize, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    value: String,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

impl Node {
    fn leaf(name: String, value: String) -> Self {
        Self {
            name,
            value,
            left: None,
            right: None,
        }
    }
}

/// Where a search ended: the matching node, if any, and the edge of `parent`
/// that points (or would point) at it.
#[derive(Debug, Clone, Copy)]
struct Search {
    target: Option<NodeId>,
    parent: NodeId,
    side: Side,
}

/// The unlocked tree. Only [`TreeStore`] touches it, and only while holding the lock.
#[derive(Debug)]
struct Tree {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    len: usize,
}

impl Tree {
    fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            free: Vec::new(),
            len: 0,
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn child(&self, parent: NodeId, side: Side) -> Option<NodeId> {
        let node = self.node(parent);
        match side {
            Side::Left => node.left,
            Side::Right => node.right,
        }
    }

    fn set_child(&mut self, parent: NodeId, side: Side, child: Option<NodeId>) {
        let node = self.node_mut(parent);
        match side {
            Side::Left => node.left = child,
            Side::Right => node.right = child,
        }
    }

    fn alloc(&mut self, name: String, value: String) -> NodeId {
        let node = Node::leaf(name, value);
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id.0] = Node::default();
        self.free.push(id);
    }

    /// Walks down from the head looking for `name`.
    ///
    /// This never locks; callers already hold the store lock.
    fn search(&self, name: &str) -> Search {
        let mut parent = HEAD;
        loop {
            let side = if name < self.node(parent).name.as_str() {
                Side::Left
            } else {
                Side::Right
            };

            match self.child(parent, side) {
                None => {
                    return Search {
                        target: None,
                        parent,
                        side,
                    }
                }
                Some(next) if self.node(next).name == name => {
                    return Search {
                        target: Some(next),
                        parent,
                        side,
                    }
                }
                Some(next) => parent = next,
            }
        }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.search(name)
            .target
            .map(|id| self.node(id).value.as_str())
    }

    fn insert(&mut self, name: String, value: String) -> bool {
        let found = self.search(&name);
        if found.target.is_some() {
            return false;
        }

        let id = self.alloc(name, value);
        self.set_child(found.parent, found.side, Some(id));
        self.len += 1;
        true
    }

    fn remove(&mut self, name: &str) -> bool {
        let Search {
            target,
            parent,
            side,
        } = self.search(name);
        let Some(target) = target else {
            return false;
        };

        let (left, right) = {
            let node = self.node(target);
            (node.left, node.right)
        };

        match (left, right) {
            (_, None) => {
                self.set_child(parent, side, left);
                self.release(target);
            }
            (None, Some(_)) => {
                self.set_child(parent, side, right);
                self.release(target);
            }
            (Some(_), Some(first)) => {
                // Successor promotion: the leftmost node of the right subtree
                // takes over the target's slot.
                let mut succ_parent = target;
                let mut succ_side = Side::Right;
                let mut succ = first;
                while let Some(next) = self.node(succ).left {
                    succ_parent = succ;
                    succ_side = Side::Left;
                    succ = next;
                }

                let succ_right = self.node(succ).right;
                self.set_child(succ_parent, succ_side, succ_right);

                let promoted = std::mem::take(self.node_mut(succ));
                let slot = self.node_mut(target);
                slot.name = promoted.name;
                slot.value = promoted.value;
                self.release(succ);
            }
        }

        self.len -= 1;
        true
    }

    /// Renders the tree in pre-order, one node per line, indented by depth.
    fn render(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(Some(HEAD), 0usize)];

        while let Some((slot, depth)) = stack.pop() {
            for _ in 0..depth {
                out.push(' ');
            }

            let Some(id) = slot else {
                out.push_str("(null)\n");
                continue;
            };

            let node = self.node(id);
            if id == HEAD {
                out.push_str("(root)\n");
            } else {
                let _ = writeln!(out, "{} {}", node.name, node.value);
            }

            // Right is pushed first so the left subtree prints first.
            stack.push((node.right, depth + 1));
            stack.push((node.left, depth + 1));
        }

        out
    }

    fn in_order(&self) -> Vec<(String, String)> {
        let mut entries = Vec::with_capacity(self.len);
        let mut stack = Vec::new();
        let mut cursor = self.node(HEAD).right;

        loop {
            while let Some(id) = cursor {
                stack.push(id);
                cursor = self.node(id).left;
            }
            let Some(id) = stack.pop() else {
                break;
            };
            let node = self.node(id);
            entries.push((node.name.clone(), node.value.clone()));
            cursor = node.right;
        }

        entries
    }

    fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack: Vec<(NodeId, usize)> = self
            .node(HEAD)
            .right
            .map(|root| (root, 1))
            .into_iter()
            .collect();

        while let Some((id, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            let node = self.node(id);
            stack.extend(node.left.map(|child| (child, depth + 1)));
            stack.extend(node.right.map(|child| (child, depth + 1)));
        }

        deepest
    }

    fn clear(&mut self) {
        self.nodes.truncate(1);
        let head = self.node_mut(HEAD);
        head.left = None;
        head.right = None;
        self.free.clear();
        self.len = 0;
    }
}

/// The ordered key-value store shared by every connection handler.
///
/// # Thread Safety
///
/// Wrap it in an `Arc` and share it across tasks. Each method takes the tree
/// lock once for its whole duration; no method calls back into another
/// locking method.
///
/// # Example
///
/// ```
/// use treekv::storage::TreeStore;
///
/// let store = TreeStore::new();
/// assert_eq!(store.insert("alice", "30"), Ok(true));
/// assert_eq!(store.insert("alice", "31"), Ok(false));
/// assert_eq!(store.query("alice"), Some("30".to_string()));
/// assert!(store.delete("alice"));
/// assert_eq!(store.query("alice"), None);
/// ```
pub struct TreeStore {
    tree: Mutex<Tree>,

    /// Statistics: total queries
    query_count: AtomicU64,

    /// Statistics: total insert attempts
    insert_count: AtomicU64,

    /// Statistics: total delete attempts
    delete_count: AtomicU64,
}

impl std::fmt::Debug for TreeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeStore")
            .field("keys", &self.len())
            .field("query_count", &self.query_count.load(Ordering::Relaxed))
            .field("insert_count", &self.insert_count.load(Ordering::Relaxed))
            .field("delete_count", &self.delete_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for TreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeStore {
    /// Creates an empty store holding only the sentinel head.
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(Tree::new()),
            query_count: AtomicU64::new(0),
            insert_count: AtomicU64::new(0),
            delete_count: AtomicU64::new(0),
        }
    }

    /// Takes the tree lock. A panic in another holder cannot leave the arena
    /// half-linked, so a poisoned lock is simply recovered.
    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up the value stored under `name`.
    pub fn query(&self, name: &str) -> Option<String> {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        self.lock().get(name).map(str::to_owned)
    }

    /// Inserts a new key.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if the key was added, `Ok(false)` if it already existed (the
    /// stored value is left untouched), or an error for an empty or oversized field.
    pub fn insert(&self, name: &str, value: &str) -> Result<bool, StoreError> {
        self.insert_count.fetch_add(1, Ordering::Relaxed);
        validate(name, value)?;
        Ok(self.lock().insert(name.to_owned(), value.to_owned()))
    }

    /// Removes a key.
    ///
    /// Returns `true` if the key was removed, `false` if it was not present.
    pub fn delete(&self, name: &str) -> bool {
        self.delete_count.fetch_add(1, Ordering::Relaxed);
        self.lock().remove(name)
    }

    /// Renders the whole tree in pre-order.
    ///
    /// The sentinel prints as `(root)`, missing children as `(null)`, and each
    /// level is indented by one more space.
    pub fn render(&self) -> String {
        self.lock().render()
    }

    /// Writes the pre-order dump to `out`.
    ///
    /// The text is rendered under the lock; the write itself happens after the
    /// lock is released.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let text = self.render();
        out.write_all(text.as_bytes())?;
        out.flush()
    }

    /// Writes the pre-order dump to `path`, creating or truncating the file.
    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let mut file = File::create(path)?;
        self.dump(&mut file)
    }

    /// Returns every `(name, value)` pair in key order.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.lock().in_order()
    }

    /// Returns the number of levels below the sentinel (0 when empty).
    pub fn depth(&self) -> usize {
        self.lock().depth()
    }

    /// Frees every node except the sentinel.
    ///
    /// Only call this once no handler can reach the store any more.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns operation statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            keys: self.len() as u64,
            queries: self.query_count.load(Ordering::Relaxed),
            inserts: self.insert_count.load(Ordering::Relaxed),
            deletes: self.delete_count.load(Ordering::Relaxed),
        }
    }
}

fn validate(name: &str, value: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::EmptyName);
    }
    if value.is_empty() {
        return Err(StoreError::EmptyValue);
    }
    if name.len() > MAX_FIELD_LEN {
        return Err(StoreError::NameTooLong {
            len: name.len(),
            max: MAX_FIELD_LEN,
        });
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(StoreError::ValueTooLong {
            len: value.len(),
            max: MAX_FIELD_LEN,
        });
    }
    Ok(())
}

/// Store statistics.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub keys: u64,
    pub queries: u64,
    pub inserts: u64,
    pub deletes: u64,
}
