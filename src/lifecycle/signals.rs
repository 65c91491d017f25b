//! Interrupt handling.
//!
//! # Responsibilities
//! - Install the SIGINT (Ctrl+C) listener at startup
//! - Forward every interrupt into an out-of-band channel
//! - Cancel every registered client when an interrupt arrives
//!
//! # Design Decisions
//! - An interrupt tears down client handlers only. The listener keeps
//!   accepting and the operator console keeps running.
//! - The monitor consumes a plain channel, so tests drive it without signals.

use crate::connection::ClientRegistry;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Installs the process interrupt handler and returns the channel it feeds.
///
/// Must be called from inside the runtime. Failing to install the handler is
/// a startup error.
pub fn interrupt_source() -> io::Result<mpsc::Receiver<()>> {
    let (tx, rx) = mpsc::channel(4);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::spawn(async move {
            while sigint.recv().await.is_some() {
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
    }

    Ok(rx)
}

/// Spawns the monitor task: one `cancel_all` sweep per interrupt received.
///
/// The task ends when every sender of `interrupts` is gone.
pub fn spawn_monitor(
    registry: Arc<ClientRegistry>,
    mut interrupts: mpsc::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while interrupts.recv().await.is_some() {
            let cancelled = registry.cancel_all();
            info!(cancelled, "Interrupt received, cancelling all clients");
        }
        debug!("Interrupt source closed, monitor exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::time::timeout;

    fn addr() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    #[tokio::test]
    async fn test_interrupt_cancels_registered_clients() {
        let registry = Arc::new(ClientRegistry::new());
        let (_, first) = registry.register(addr()).unwrap();
        let (_, second) = registry.register(addr()).unwrap();

        let (tx, rx) = mpsc::channel(1);
        let monitor = spawn_monitor(Arc::clone(&registry), rx);

        tx.send(()).await.unwrap();
        timeout(Duration::from_secs(1), first.cancelled()).await.unwrap();
        timeout(Duration::from_secs(1), second.cancelled()).await.unwrap();

        // Cancelling does not remove: handlers deregister themselves
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_closed());

        drop(tx);
        timeout(Duration::from_secs(1), monitor).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_clients_registered_after_interrupt_survive() {
        let registry = Arc::new(ClientRegistry::new());
        let (tx, rx) = mpsc::channel(1);
        let _monitor = spawn_monitor(Arc::clone(&registry), rx);

        let (_, early) = registry.register(addr()).unwrap();
        tx.send(()).await.unwrap();
        timeout(Duration::from_secs(1), early.cancelled()).await.unwrap();

        let (_, late) = registry.register(addr()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!late.is_cancelled());

        // A second interrupt sweeps the newcomer too
        tx.send(()).await.unwrap();
        timeout(Duration::from_secs(1), late.cancelled()).await.unwrap();
    }
}
