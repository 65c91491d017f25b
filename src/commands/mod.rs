//! Command Handler Module
//!
//! This module implements the command processing layer for treekv.
//! It receives raw protocol lines, executes them against the tree store,
//! and returns the reply for each one.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Line Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Batch files  │
//! │  - Replies      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   TreeStore     │  (storage module)
//! └─────────────────┘
//! ```

pub mod handler;

// Re-export the main command handler
pub use handler::{Cancelled, CommandHandler, MAX_BATCH_DEPTH};
