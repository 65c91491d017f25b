//! Operator console.
//!
//! Reads commands from the server's standard input:
//!
//! - `s` stops all client traffic at the next iteration boundary
//! - `g` resumes client traffic
//! - `p` prints the tree to stdout, `p<file>` writes it to `file`
//!
//! Commands are recognised by their first character. End of input ends the
//! console; the caller then shuts the server down.

use crate::server::ServerContext;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Stop,
    Go,
    /// Dump the tree; `None` means stdout
    Print(Option<PathBuf>),
}

impl ConsoleCommand {
    /// Parses one console line. Returns `None` for anything unrecognised.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut chars = line.chars();

        match chars.next()? {
            's' => Some(Self::Stop),
            'g' => Some(Self::Go),
            'p' => {
                let target = chars.as_str().trim();
                if target.is_empty() {
                    Some(Self::Print(None))
                } else {
                    Some(Self::Print(Some(PathBuf::from(target))))
                }
            }
            _ => None,
        }
    }
}

/// Processes console lines until end of input.
///
/// # Errors
///
/// Returns an error only if reading `input` fails. A failed dump is logged.
pub async fn run_console<R>(mut input: R, ctx: &ServerContext) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        if input.read_line(&mut line).await? == 0 {
            info!("Console input closed");
            return Ok(());
        }

        match ConsoleCommand::parse(&line) {
            Some(ConsoleCommand::Stop) => {
                ctx.gate().stop();
                info!("Client traffic stopped");
            }
            Some(ConsoleCommand::Go) => {
                ctx.gate().release();
                info!("Client traffic resumed");
            }
            Some(ConsoleCommand::Print(target)) => print_tree(ctx, target).await,
            None if line.trim().is_empty() => {}
            None => warn!(input = %line.trim_end(), "Unknown console command"),
        }
    }
}

async fn print_tree(ctx: &ServerContext, target: Option<PathBuf>) {
    let store = Arc::clone(ctx.store());
    let destination = target
        .as_ref()
        .map_or_else(|| "stdout".to_string(), |path| path.display().to_string());

    let result = tokio::task::spawn_blocking(move || match target {
        Some(path) => store.dump_to_file(path),
        None => store.dump(&mut io::stdout().lock()),
    })
    .await;

    match result {
        Ok(Ok(())) => debug!(destination = %destination, "Tree printed"),
        Ok(Err(e)) => warn!(destination = %destination, error = %e, "Failed to print tree"),
        Err(e) => warn!(error = %e, "Print task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    #[test]
    fn test_parse() {
        assert_eq!(ConsoleCommand::parse("s\n"), Some(ConsoleCommand::Stop));
        assert_eq!(ConsoleCommand::parse("g\r\n"), Some(ConsoleCommand::Go));
        assert_eq!(ConsoleCommand::parse("p\n"), Some(ConsoleCommand::Print(None)));
        assert_eq!(ConsoleCommand::parse("p   \n"), Some(ConsoleCommand::Print(None)));
        assert_eq!(
            ConsoleCommand::parse("p out.txt\n"),
            Some(ConsoleCommand::Print(Some(PathBuf::from("out.txt"))))
        );
        assert_eq!(
            ConsoleCommand::parse("pout.txt"),
            Some(ConsoleCommand::Print(Some(PathBuf::from("out.txt"))))
        );
        assert_eq!(ConsoleCommand::parse(""), None);
        assert_eq!(ConsoleCommand::parse("x\n"), None);
        assert_eq!(ConsoleCommand::parse(" s\n"), None);
    }

    #[tokio::test]
    async fn test_stop_and_go() {
        let ctx = ServerContext::new();

        let input = BufReader::new(Builder::new().read(b"s\n").build());
        run_console(input, &ctx).await.unwrap();
        assert!(ctx.gate().is_stopped());

        let input = BufReader::new(Builder::new().read(b"g\n").build());
        run_console(input, &ctx).await.unwrap();
        assert!(!ctx.gate().is_stopped());
    }

    #[tokio::test]
    async fn test_unknown_lines_ignored() {
        let ctx = ServerContext::new();
        let input = BufReader::new(
            Builder::new()
                .read(b"hello\n")
                .read(b"\n")
                .read(b"s\n")
                .build(),
        );

        run_console(input, &ctx).await.unwrap();
        assert!(ctx.gate().is_stopped());
    }

    #[tokio::test]
    async fn test_print_to_file() {
        let ctx = ServerContext::new();
        ctx.store().insert("m", "1").unwrap();
        ctx.store().insert("c", "2").unwrap();

        let path = std::env::temp_dir().join(format!("treekv-console-{}.txt", std::process::id()));
        let command = format!("p {}\n", path.display());
        let input = BufReader::new(Builder::new().read(command.as_bytes()).build());

        run_console(input, &ctx).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, ctx.store().render());
        assert!(written.contains("m 1"));
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_print_failure_is_not_fatal() {
        let ctx = ServerContext::new();
        let input = BufReader::new(
            Builder::new()
                .read(b"p /nonexistent-dir/treekv/out.txt\n")
                .read(b"s\n")
                .build(),
        );

        run_console(input, &ctx).await.unwrap();
        assert!(ctx.gate().is_stopped());
    }
}
