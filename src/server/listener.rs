//! TCP listener: accepts connections and spawns one handler task for each.

use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::server::ServerContext;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Binds the listening socket. Failure here is a startup error.
pub async fn bind(config: &ServerConfig) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Spawns the accept loop. It runs until the context's listener token fires.
pub fn spawn_listener(listener: TcpListener, ctx: Arc<ServerContext>) -> JoinHandle<()> {
    tokio::spawn(accept_loop(listener, ctx))
}

/// Main loop that accepts incoming connections
async fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>) {
    let stop = ctx.listener_stop().clone();

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                debug!("Listener stopped");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    // Spawn a task to handle this connection
                    tokio::spawn(handle_connection(stream, addr, Arc::clone(&ctx)));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
        }
    }
}
