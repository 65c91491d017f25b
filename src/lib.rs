//! # TreeKV - A Concurrent In-Memory Key-Value Server
//!
//! TreeKV serves a single binary-search-tree key-value store to many TCP
//! clients at once. An operator console on the server's standard input can
//! pause and resume all clients and print the tree; an interrupt cancels
//! every connected client while the server keeps accepting new ones.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              TreeKV                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────────────────┐  │
//! │  │ Pause Gate  │    │   Client    │    │         TreeStore           │  │
//! │  │  (watch)    │    │  Registry   │    │   Mutex<arena BST>          │  │
//! │  └──────▲──────┘    └──────▲──────┘    └─────────────────────────────┘  │
//! │         │                  │                                            │
//! │  ┌──────┴──────┐    ┌──────┴──────┐    ┌─────────────┐                  │
//! │  │  Operator   │    │   Signal    │    │  Shutdown   │                  │
//! │  │  Console    │    │   Monitor   │    │ Coordinator │                  │
//! │  └─────────────┘    └─────────────┘    └─────────────┘                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use treekv::config::ServerConfig;
//! use treekv::server::{bind, spawn_listener, ServerContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = Arc::new(ServerContext::new());
//!     let listener = bind(&ServerConfig::new("127.0.0.1", 7000)).await?;
//!     spawn_listener(listener, Arc::clone(&ctx));
//!
//!     // ... serve until it is time to stop
//!     ctx.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Wire Protocol
//!
//! One command per line, one reply line per command:
//!
//! - `q name` - value, or `not found`
//! - `a name value` - `added` or `already in database`
//! - `d name` - `removed` or `not in database`
//! - `f filename` - `file processed` or `bad file name`
//!
//! Anything else gets `ill-formed command`. A line starting with byte `0xFF`
//! ends the session without a reply.
//!
//! ## Module Overview
//!
//! - [`protocol`]: Command parsing and reply formatting
//! - [`storage`]: The mutex-guarded binary search tree
//! - [`commands`]: Command execution, including batch files
//! - [`connection`]: Client handlers and the client registry
//! - [`lifecycle`]: Pause gate, shutdown coordination, signals, console
//! - [`server`]: The shared server context and the TCP listener
//! - [`config`]: Command-line configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod lifecycle;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::{ServerConfig, DEFAULT_HOST};
pub use connection::{handle_connection, ClientRegistry, ConnectionStats};
pub use lifecycle::{PauseGate, ShutdownCoordinator};
pub use protocol::{parse_command, Command, ParseError, Reply};
pub use server::ServerContext;
pub use storage::TreeStore;

/// Version of TreeKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
