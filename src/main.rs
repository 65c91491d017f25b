//! TreeKV - A Concurrent In-Memory Key-Value Server
//!
//! This is the main entry point for the TreeKV server.
//! It binds the listener, installs the interrupt monitor, and runs the
//! operator console until its input ends.

use clap::Parser;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use treekv::config::ServerConfig;
use treekv::lifecycle::{interrupt_source, run_console, spawn_monitor};
use treekv::server::{bind, spawn_listener, ServerContext};

fn print_banner(config: &ServerConfig) {
    eprintln!(
        r#"
TreeKV v{} - Concurrent In-Memory Key-Value Server
──────────────────────────────────────────────────
Server started on {}

Console: s = stop clients, g = go, p [file] = print tree
Ctrl+C cancels all clients. End of input (Ctrl+D) shuts down.
"#,
        treekv::VERSION,
        config.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = ServerConfig::parse();

    // Set up logging; stdout is reserved for tree dumps
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let ctx = Arc::new(ServerContext::new());

    // Bind the TCP listener
    let listener = bind(&config).await?;
    print_banner(&config);
    let listener_task = spawn_listener(listener, Arc::clone(&ctx));

    // Interrupts cancel clients; they do not stop the server
    let interrupts = interrupt_source()?;
    let _monitor = spawn_monitor(Arc::clone(ctx.registry()), interrupts);
    info!("Interrupt monitor installed");

    // Serve until the console's input ends
    if let Err(e) = run_console(BufReader::new(tokio::io::stdin()), &ctx).await {
        error!(error = %e, "Console input failed");
    }

    ctx.shutdown().await;
    listener_task.await?;

    info!("Server shutdown complete");
    Ok(())
}
