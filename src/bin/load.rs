//! TreeKV load client.
//!
//! Opens one or more sessions against a running server. With a script, each
//! of `<occurrences>` concurrent sessions replays the script line by line and
//! prints every reply. Without one, a single session reads commands from
//! standard input. Each session ends by sending the end-of-input marker.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use treekv::protocol::EOF_MARKER;

#[derive(Parser, Debug)]
#[command(name = "treekv-load", version)]
#[command(about = "Replays command scripts against a TreeKV server", long_about = None)]
struct Cli {
    /// Server host name or address
    server: String,

    /// Server port
    port: u16,

    /// Script of commands to replay; standard input when omitted
    #[arg(requires = "occurrences")]
    script: Option<PathBuf>,

    /// Number of concurrent sessions replaying the script
    #[arg(requires = "script", value_parser = clap::value_parser!(u32).range(1..))]
    occurrences: Option<u32>,
}

/// Sends every line of `input` and prints the reply to each.
async fn run_session<R>(id: u32, mut input: R, server: &str, port: u16) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let stream = TcpStream::connect((server, port))
        .await
        .with_context(|| format!("Failed to connect to '{}:{}'", server, port))?;
    let mut cxn = BufReader::new(stream);

    let mut query = String::new();
    let mut reply = String::new();

    loop {
        query.clear();
        if input.read_line(&mut query).await? == 0 {
            cxn.get_mut().write_all(&[EOF_MARKER, b'\n']).await?;
            cxn.get_mut().shutdown().await?;
            info!(session = id, "Client terminated cleanly");
            return Ok(());
        }
        if !query.ends_with('\n') {
            query.push('\n');
        }

        cxn.get_mut()
            .write_all(query.as_bytes())
            .await
            .context("No connection")?;

        reply.clear();
        if cxn.read_line(&mut reply).await? == 0 {
            anyhow::bail!("Connection terminated");
        }
        print!("{}", reply);
    }
}

async fn run_script(id: u32, script: PathBuf, server: String, port: u16) -> Result<()> {
    let file = File::open(&script)
        .await
        .with_context(|| format!("Error opening script file {}", script.display()))?;
    run_session(id, BufReader::new(file), &server, port).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let (Some(script), Some(occurrences)) = (cli.script, cli.occurrences) else {
        let stdin = BufReader::new(tokio::io::stdin());
        return run_session(0, stdin, &cli.server, cli.port).await;
    };

    let sessions: Vec<_> = (0..occurrences)
        .map(|id| tokio::spawn(run_script(id, script.clone(), cli.server.clone(), cli.port)))
        .collect();

    let mut failures = 0;
    for session in sessions {
        match session.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("{:#}", e);
                failures += 1;
            }
            Err(e) => {
                error!(error = %e, "Session task failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} sessions failed", failures, occurrences);
    }
    Ok(())
}
