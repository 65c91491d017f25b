//! Shutdown coordination: counts live connection handlers so the control
//! path can wait for all of them to finish before the store is torn down.

use tokio::sync::watch;

/// Live handler counter with a drain-to-zero wait.
///
/// Draining only terminates once no new handlers can start, so the registry
/// must be closed before [`drain`](Self::drain) is relied on.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    live: watch::Sender<usize>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (live, _) = watch::channel(0);
        Self { live }
    }

    /// Records a handler start.
    pub fn enter(&self) {
        self.live.send_if_modified(|live| {
            *live += 1;
            false
        });
    }

    /// Records a handler exit, waking drainers when the count reaches zero.
    pub fn exit(&self) {
        self.live.send_if_modified(|live| {
            debug_assert!(*live > 0, "exit() without a matching enter()");
            *live = live.saturating_sub(1);
            *live == 0
        });
    }

    /// Waits until no handler is live.
    pub async fn drain(&self) {
        let mut rx = self.live.subscribe();
        let _ = rx.wait_for(|live| *live == 0).await;
    }

    /// Returns the number of live handlers.
    pub fn live(&self) -> usize {
        *self.live.borrow()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
