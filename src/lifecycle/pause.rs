//! Global pause gate for client traffic.
//!
//! The operator console flips the gate with `s` (stop) and `g` (go). Every
//! connection handler waits on the gate once per loop iteration, before it
//! consumes its next command line, so a stop never interrupts a command that
//! is already executing.

use tokio::sync::watch;

/// Stop/resume coordination shared by all connection handlers.
#[derive(Debug)]
pub struct PauseGate {
    /// `true` while client traffic is stopped
    stopped: watch::Sender<bool>,
}

impl PauseGate {
    /// Creates an open gate.
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(false);
        Self { stopped }
    }

    /// Waits until the gate is open. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.stopped.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|stopped| !*stopped).await;
    }

    /// Closes the gate; handlers block at their next iteration.
    pub fn stop(&self) {
        self.stopped.send_replace(true);
    }

    /// Opens the gate and wakes every waiting handler.
    pub fn release(&self) {
        self.stopped.send_replace(false);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}
