//! Line Protocol Data Types
//!
//! treekv speaks a plain text protocol: one command per newline-terminated
//! line, one reply line per command.
//!
//! ## Commands
//!
//! | Prefix | Form               | Reply                              |
//! |--------|--------------------|------------------------------------|
//! | `q`    | `q <name>`         | value, or `not found`              |
//! | `a`    | `a <name> <value>` | `added` / `already in database`    |
//! | `d`    | `d <name>`         | `removed` / `not in database`      |
//! | `f`    | `f <filename>`     | `file processed` / `bad file name` |
//!
//! Anything else is answered with `ill-formed command`.

use std::fmt;

/// A line starting with this byte ends the session. It is what a C client
/// writes when it stores `EOF` into a `char` buffer.
pub const EOF_MARKER: u8 = 0xFF;

/// Maximum length of a reply line, excluding the newline.
pub const MAX_REPLY_LEN: usize = 1023;

/// Maximum length of an incoming command line, excluding the newline.
pub const MAX_LINE_LEN: usize = 1024;

/// A parsed protocol command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `q <name>`
    Query { name: String },

    /// `a <name> <value>`
    Add { name: String, value: String },

    /// `d <name>`
    Delete { name: String },

    /// `f <filename>`: run every line of a file, replies suppressed
    RunFile { path: String },
}

/// The outcome of one command, rendered as a single reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Value(String),
    NotFound,
    Added,
    AlreadyPresent,
    Removed,
    NotInDatabase,
    FileProcessed,
    BadFileName,
    IllFormed,
}

impl Reply {
    /// Serializes the reply for the wire: truncated to [`MAX_REPLY_LEN`] bytes
    /// on a character boundary, then terminated by `\n`.
    pub fn to_line(&self) -> String {
        let mut line = self.to_string();
        if line.len() > MAX_REPLY_LEN {
            let mut end = MAX_REPLY_LEN;
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            line.truncate(end);
        }
        line.push('\n');
        line
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Value(value) => f.write_str(value),
            Reply::NotFound => f.write_str("not found"),
            Reply::Added => f.write_str("added"),
            Reply::AlreadyPresent => f.write_str("already in database"),
            Reply::Removed => f.write_str("removed"),
            Reply::NotInDatabase => f.write_str("not in database"),
            Reply::FileProcessed => f.write_str("file processed"),
            Reply::BadFileName => f.write_str("bad file name"),
            Reply::IllFormed => f.write_str("ill-formed command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_text() {
        assert_eq!(Reply::NotFound.to_line(), "not found\n");
        assert_eq!(Reply::Added.to_line(), "added\n");
        assert_eq!(Reply::AlreadyPresent.to_line(), "already in database\n");
        assert_eq!(Reply::Removed.to_line(), "removed\n");
        assert_eq!(Reply::NotInDatabase.to_line(), "not in database\n");
        assert_eq!(Reply::FileProcessed.to_line(), "file processed\n");
        assert_eq!(Reply::BadFileName.to_line(), "bad file name\n");
        assert_eq!(Reply::IllFormed.to_line(), "ill-formed command\n");
        assert_eq!(Reply::Value("25".into()).to_line(), "25\n");
    }

    #[test]
    fn test_reply_truncation() {
        let line = Reply::Value("x".repeat(5000)).to_line();
        assert_eq!(line.len(), MAX_REPLY_LEN + 1);
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_reply_truncation_respects_char_boundary() {
        // 'é' is two bytes, so byte 1023 falls inside a character
        let line = Reply::Value("é".repeat(600)).to_line();
        assert_eq!(line.len(), MAX_REPLY_LEN);
        assert!(line.trim_end().chars().all(|c| c == 'é'));
    }
}
