//! Storage Module
//!
//! This module provides the ordered key-value store for treekv: a binary
//! search tree behind one mutex, shared by every connection handler.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TreeStore                            │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │ Mutex<Tree>                                           │  │
//! │  │   arena: [head, node, node, ...]   free list          │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!        ▲            ▲            ▲
//!        │            │            │
//!    handler 1    handler 2    handler N
//! ```
//!
//! ## Example
//!
//! ```
//! use treekv::storage::TreeStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(TreeStore::new());
//!
//! store.insert("name", "treekv").unwrap();
//! assert_eq!(store.query("name"), Some("treekv".to_string()));
//! assert!(store.delete("name"));
//! ```

pub mod tree;

// Re-export commonly used types
pub use tree::{StoreError, StoreStats, TreeStore, MAX_FIELD_LEN};
