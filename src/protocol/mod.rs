//! Line Protocol Implementation
//!
//! This module implements the text protocol treekv clients speak.
//!
//! ## Overview
//!
//! Every request is one newline-terminated line whose first character names
//! the command. Every reply is one newline-terminated line. A client ends its
//! session by sending a line that starts with [`EOF_MARKER`], or by closing
//! the socket.
//!
//! ## Modules
//!
//! - `types`: `Command`, `Reply` and the protocol limits
//! - `parser`: tokenizer turning a line into a `Command`
//!
//! ## Example
//!
//! ```
//! use treekv::protocol::{parse_command, Command, Reply};
//!
//! let cmd = parse_command("q alice\n").unwrap();
//! assert_eq!(cmd, Command::Query { name: "alice".into() });
//!
//! assert_eq!(Reply::NotFound.to_line(), "not found\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_command, ParseError, ParseResult};
pub use types::{Command, Reply, EOF_MARKER, MAX_LINE_LEN, MAX_REPLY_LEN};
