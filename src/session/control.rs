//! Cooperative cancellation for a running session

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ControlState {
    interrupts: u64,
    shutdown: bool,
}

/// Handle used to interrupt the current capture/playback or end the session
///
/// Clones share the same underlying signal.
#[derive(Debug, Clone)]
pub struct SessionControl {
    tx: Arc<watch::Sender<ControlState>>,
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionControl {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ControlState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Stop the capture or playback in progress; the session continues
    pub fn interrupt(&self) {
        self.tx.send_modify(|s| s.interrupts += 1);
        tracing::debug!("interrupt requested");
    }

    /// End the session after the current step
    pub fn shutdown(&self) {
        self.tx.send_modify(|s| s.shutdown = true);
        tracing::info!("shutdown requested");
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.tx.borrow().shutdown
    }

    /// A signal raised by any interrupt issued after this call, or by shutdown
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        let rx = self.tx.subscribe();
        let baseline = rx.borrow().interrupts;
        StopSignal { rx, baseline }
    }
}

/// Polled by capture and playback loops
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<ControlState>,
    baseline: u64,
}

impl StopSignal {
    /// A signal that is never raised
    #[must_use]
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(ControlState::default());
        Self { rx, baseline: 0 }
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        let state = *self.rx.borrow();
        state.shutdown || state.interrupts > self.baseline
    }

    /// Resolves once the signal is raised
    pub async fn raised(&self) {
        let mut rx = self.rx.clone();
        let baseline = self.baseline;
        if rx
            .wait_for(|s| s.shutdown || s.interrupts > baseline)
            .await
            .is_err()
        {
            // Sender gone: nobody can raise it anymore
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_interrupt_raises_existing_signals_only() {
        let control = SessionControl::new();
        let before = control.stop_signal();
        assert!(!before.is_raised());

        control.interrupt();
        assert!(before.is_raised());
        assert!(!control.is_shutdown());

        let after = control.stop_signal();
        assert!(!after.is_raised());
    }

    #[test]
    fn test_shutdown_raises_everything() {
        let control = SessionControl::new();
        control.shutdown();
        assert!(control.is_shutdown());
        assert!(control.stop_signal().is_raised());
    }

    #[test]
    fn test_clones_share_state() {
        let control = SessionControl::new();
        let other = control.clone();
        other.shutdown();
        assert!(control.is_shutdown());
    }

    #[test]
    fn test_never_is_never_raised() {
        assert!(!StopSignal::never().is_raised());
    }

    #[tokio::test]
    async fn test_raised_resolves_on_interrupt() {
        let control = SessionControl::new();
        let signal = control.stop_signal();

        let waiter = tokio::spawn(async move { signal.raised().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        control.interrupt();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
