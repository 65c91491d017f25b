//! Command Line Parser
//!
//! Turns one line of protocol text into a [`Command`].
//!
//! ## Tokenization
//!
//! The first character selects the command. The rest of the line is split on
//! whitespace: a space after the prefix is optional (`qalice` is a query for
//! `alice`) and tokens beyond the ones a command needs are ignored.

use crate::protocol::types::Command;
use crate::storage::MAX_FIELD_LEN;
use thiserror::Error;

/// Errors that can occur while parsing a command line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line is empty or only whitespace
    #[error("empty command")]
    Empty,

    /// The first character is not a known command prefix
    #[error("unknown command: {0:?}")]
    UnknownCommand(char),

    /// The command is missing a name, value or file name
    #[error("missing argument for '{0}'")]
    MissingArgument(char),

    /// A name, value or file name is longer than the store accepts
    #[error("argument too long: {len} bytes (max: {max})")]
    FieldTooLong { len: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Parses a single command line. A trailing `\n` or `\r\n` is ignored.
///
/// # Example
///
/// ```
/// use treekv::protocol::{parse_command, Command};
///
/// let cmd = parse_command("a alice 30\n").unwrap();
/// assert_eq!(
///     cmd,
///     Command::Add { name: "alice".into(), value: "30".into() }
/// );
/// ```
pub fn parse_command(line: &str) -> ParseResult<Command> {
    let line = line.trim_end_matches(['\r', '\n']);

    let mut chars = line.chars();
    let prefix = match chars.next() {
        Some(c) if !c.is_whitespace() => c,
        _ => return Err(ParseError::Empty),
    };
    let mut args = chars.as_str().split_whitespace();

    let mut next_arg = || -> ParseResult<String> {
        let arg = args.next().ok_or(ParseError::MissingArgument(prefix))?;
        if arg.len() > MAX_FIELD_LEN {
            return Err(ParseError::FieldTooLong {
                len: arg.len(),
                max: MAX_FIELD_LEN,
            });
        }
        Ok(arg.to_string())
    };

    match prefix {
        'q' => Ok(Command::Query { name: next_arg()? }),
        'a' => {
            let name = next_arg()?;
            let value = next_arg()?;
            Ok(Command::Add { name, value })
        }
        'd' => Ok(Command::Delete { name: next_arg()? }),
        'f' => Ok(Command::RunFile { path: next_arg()? }),
        other => Err(ParseError::UnknownCommand(other)),
    }
}
