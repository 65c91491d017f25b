//! Command Handler Module
//!
//! This module executes protocol lines against the tree store and produces
//! the reply line for each one.
//!
//! ## Supported Commands
//!
//! - `q name` - Look up a key
//! - `a name value` - Insert a key (first writer wins)
//! - `d name` - Delete a key
//! - `f filename` - Run every line of a file, suppressing the per-line replies
//!
//! ## Batch Files
//!
//! A batch file may itself contain `f` lines, up to [`MAX_BATCH_DEPTH`] levels
//! deep. The cancellation token is checked after every line so a cancelled
//! client stops between lines even when the file is long. Lines longer than
//! [`MAX_LINE_LEN`] are skipped without being buffered and count as ill-formed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │   parse()   │───>│  dispatch() │───>│    reply    │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                            │                                │
//! │                            ▼                                │
//! │                        TreeStore                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::{parse_command, Command, Reply, MAX_LINE_LEN};
use crate::storage::TreeStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::fs::File;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// How many `f` commands may nest inside each other.
pub const MAX_BATCH_DEPTH: usize = 16;

/// Returned when a client was cancelled while its command was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("command cancelled")]
pub struct Cancelled;

/// One line read from a batch file.
#[derive(Debug, PartialEq, Eq)]
enum BatchLine {
    /// A line of at most [`MAX_LINE_LEN`] bytes, left in the caller's buffer
    Line,
    /// A longer line; it has been skipped up to and including its newline
    Oversized,
    Eof,
}

/// Reads the next line into `buf` without ever holding more than
/// `MAX_LINE_LEN + 1` bytes of it.
async fn read_batch_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    cancel: &CancellationToken,
) -> io::Result<BatchLine>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_LINE_LEN as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;

    if n == 0 {
        return Ok(BatchLine::Eof);
    }
    if buf.last() == Some(&b'\n') || (n as u64) < limit {
        return Ok(BatchLine::Line);
    }

    // Skip the rest of the oversized line
    buf.clear();
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            break;
        }
        let (used, done) = match chunk.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (chunk.len(), false),
        };
        reader.consume(used);
        if done {
            break;
        }
    }
    Ok(BatchLine::Oversized)
}

type BatchFuture<'a> = Pin<Box<dyn Future<Output = Result<Reply, Cancelled>> + Send + 'a>>;

/// Executes protocol lines against the store.
#[derive(Clone)]
pub struct CommandHandler {
    /// The tree store
    store: Arc<TreeStore>,
}

impl CommandHandler {
    /// Creates a new command handler over the given store.
    pub fn new(store: Arc<TreeStore>) -> Self {
        Self { store }
    }

    /// Executes one protocol line and returns the reply.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires while a batch file is running.
    /// Every other failure is encoded in the returned [`Reply`].
    pub async fn execute(&self, line: &str, cancel: &CancellationToken) -> Result<Reply, Cancelled> {
        self.execute_at(line, cancel, 0).await
    }

    async fn execute_at(
        &self,
        line: &str,
        cancel: &CancellationToken,
        depth: usize,
    ) -> Result<Reply, Cancelled> {
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(e) => {
                trace!(error = %e, "Ill-formed command");
                return Ok(Reply::IllFormed);
            }
        };

        match command {
            Command::RunFile { path } => {
                if depth >= MAX_BATCH_DEPTH {
                    debug!(path = %path, depth, "Batch files nested too deeply");
                    return Ok(Reply::IllFormed);
                }
                self.run_file(path, cancel, depth).await
            }
            other => Ok(self.dispatch(other)),
        }
    }

    /// Runs a single store command.
    fn dispatch(&self, command: Command) -> Reply {
        match command {
            Command::Query { name } => match self.store.query(&name) {
                Some(value) => Reply::Value(value),
                None => Reply::NotFound,
            },
            Command::Add { name, value } => match self.store.insert(&name, &value) {
                Ok(true) => Reply::Added,
                Ok(false) => Reply::AlreadyPresent,
                Err(e) => {
                    trace!(error = %e, "Insert rejected");
                    Reply::IllFormed
                }
            },
            Command::Delete { name } => {
                if self.store.delete(&name) {
                    Reply::Removed
                } else {
                    Reply::NotInDatabase
                }
            }
            Command::RunFile { .. } => Reply::IllFormed,
        }
    }

    /// Runs every line of `path`, discarding the individual replies.
    ///
    /// Boxed because batch files recurse through [`Self::execute_at`].
    fn run_file<'a>(
        &'a self,
        path: String,
        cancel: &'a CancellationToken,
        depth: usize,
    ) -> BatchFuture<'a> {
        Box::pin(async move {
            let file = match File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    debug!(path = %path, error = %e, "Cannot open batch file");
                    return Ok(Reply::BadFileName);
                }
            };

            let mut reader = BufReader::new(file);
            let mut buf = Vec::new();
            let mut lines = 0u64;

            loop {
                match read_batch_line(&mut reader, &mut buf, cancel).await {
                    Ok(BatchLine::Eof) => break,
                    Ok(BatchLine::Line) => {
                        let line = String::from_utf8_lossy(&buf);
                        let _ = self.execute_at(&line, cancel, depth + 1).await?;
                    }
                    Ok(BatchLine::Oversized) => {
                        debug!(
                            path = %path,
                            line = lines + 1,
                            max = MAX_LINE_LEN,
                            "Batch line too long"
                        );
                    }
                    Err(e) => {
                        debug!(path = %path, error = %e, "Batch file read failed");
                        break;
                    }
                }
                lines += 1;

                if cancel.is_cancelled() {
                    debug!(path = %path, lines, "Batch file interrupted by cancellation");
                    return Err(Cancelled);
                }
            }

            debug!(path = %path, lines, "Batch file processed");
            Ok(Reply::FileProcessed)
        })
    }
}
