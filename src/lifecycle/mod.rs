//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Console (console.rs):
//!     s → PauseGate::stop        g → PauseGate::release
//!     p[file] → dump the tree    end of input → ServerContext::shutdown
//!
//! Signals (signals.rs):
//!     SIGINT → ClientRegistry::cancel_all (listener and console keep running)
//!
//! Shutdown (shutdown.rs):
//!     Close registry → Cancel all → Drain live handlers → Clear store
//! ```
//!
//! # Design Decisions
//! - The pause gate is checked at iteration boundaries, never mid-command
//! - An interrupt only cancels clients; it does not end the process
//! - Draining waits on a live counter, not on task handles

pub mod console;
pub mod pause;
pub mod shutdown;
pub mod signals;

pub use console::{run_console, ConsoleCommand};
pub use pause::PauseGate;
pub use shutdown::ShutdownCoordinator;
pub use signals::{interrupt_source, spawn_monitor};
