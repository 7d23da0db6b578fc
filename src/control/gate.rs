//! Execution gate between the pick worker and operator input.
//!
//! The worker calls `wait_for_release` at every checkpoint. Operator signals
//! (release, autonomy toggles, stop) arrive from other tasks or threads and
//! only ever touch the gate's locked state. The wait polls that state at a
//! fixed interval, so a signal is picked up within one poll period.
//!
//! Releases are not buffered. `request_release` only takes effect while the
//! worker is inside a wait; a release sent before the worker reaches its next
//! checkpoint is dropped, and two releases during one wait satisfy only that
//! wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

/// Default interval between polls of the gate state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Which autonomy tier lets a checkpoint pass without a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    /// Routine checkpoint: skipped in autonomous and full-autonomous mode.
    Step,
    /// Breakpoint: skipped only in full-autonomous mode.
    FullStep,
}

/// Result of a checkpoint wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The worker may proceed.
    Released,
    /// Shutdown was requested while waiting.
    Cancelled,
}

/// Flags shared between the worker and operator input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateState {
    pub released: bool,
    pub autonomous: bool,
    pub full_autonomous: bool,
    pub stop_requested: bool,
    pub is_waiting: bool,
}

impl GateState {
    /// True when the current autonomy flags let `kind` pass without a release.
    pub fn satisfies(&self, kind: WaitKind) -> bool {
        match kind {
            WaitKind::Step => self.autonomous || self.full_autonomous,
            WaitKind::FullStep => self.full_autonomous,
        }
    }
}

/// The single execution gate of a pick run.
#[derive(Debug)]
pub struct ExecutionGate {
    state: Mutex<GateState>,
    shutdown: AtomicBool,
    poll_interval: Duration,
}

impl Default for ExecutionGate {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ExecutionGate {
    /// Create a gate in manual mode.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            shutdown: AtomicBool::new(false),
            poll_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // The state is plain flags; a panicking holder cannot leave it torn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Copy of the current flags.
    pub fn state(&self) -> GateState {
        *self.lock()
    }

    pub fn is_waiting(&self) -> bool {
        self.lock().is_waiting
    }

    /// Operator says "proceed". Returns whether a pending wait was released.
    ///
    /// Also clears a pending stop, since the operator is driving again.
    pub fn request_release(&self) -> bool {
        let mut state = self.lock();
        state.stop_requested = false;
        if state.is_waiting {
            state.released = true;
            debug!("Release accepted");
            true
        } else {
            debug!("Release ignored: worker is not waiting");
            false
        }
    }

    /// Toggle the autonomous tier. Clears any pending stop.
    pub fn set_autonomous(&self, on: bool) {
        let mut state = self.lock();
        state.autonomous = on;
        state.stop_requested = false;
        if on {
            warn!("In autonomous mode - will only stop at breakpoints");
        }
    }

    /// Toggle both autonomy tiers together. Clears any pending stop.
    pub fn set_full_autonomous(&self, on: bool) {
        let mut state = self.lock();
        state.autonomous = on;
        state.full_autonomous = on;
        state.stop_requested = false;
        if on {
            warn!("In FULL autonomous mode - will ignore breakpoints");
        }
    }

    /// Return control to manual stepping at the next checkpoint.
    ///
    /// Does not interrupt a collaborator call already in flight.
    pub fn request_stop(&self) {
        let mut state = self.lock();
        state.stop_requested = true;
        state.autonomous = false;
        state.full_autonomous = false;
        info!("Stop requested - returning to manual stepping");
    }

    /// Process is shutting down: any wait returns `Cancelled` within one poll.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Block the worker until a release, a matching autonomy flag, or shutdown.
    ///
    /// Dropping the returned future leaves the gate not waiting, so a release
    /// sent afterwards is ignored like any other early release.
    pub async fn wait_for_release(&self, kind: WaitKind, caption: &str) -> WaitOutcome {
        {
            let mut state = self.lock();
            if self.is_shut_down() {
                return WaitOutcome::Cancelled;
            }
            if state.satisfies(kind) {
                return WaitOutcome::Released;
            }
            state.is_waiting = true;
        }
        let _waiting = WaitingGuard { gate: self };

        info!("Waiting to {}", caption);

        loop {
            tokio::time::sleep(self.poll_interval).await;

            if self.is_shut_down() {
                return WaitOutcome::Cancelled;
            }
            let proceed = {
                let state = self.lock();
                state.released || state.satisfies(kind)
            };
            if proceed {
                return WaitOutcome::Released;
            }
        }
    }
}

/// Clears the waiting flags when a wait ends, however it ends.
struct WaitingGuard<'a> {
    gate: &'a ExecutionGate,
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        state.is_waiting = false;
        state.released = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::timeout;

    const POLL: Duration = Duration::from_millis(5);

    fn gate() -> Arc<ExecutionGate> {
        Arc::new(ExecutionGate::new(POLL))
    }

    async fn until_waiting(gate: &ExecutionGate) {
        while !gate.is_waiting() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_autonomous_returns_immediately() {
        let gate = gate();
        gate.set_autonomous(true);
        let outcome = timeout(
            Duration::from_millis(50),
            gate.wait_for_release(WaitKind::Step, "test"),
        )
        .await
        .expect("autonomous wait should not block");
        assert_eq!(outcome, WaitOutcome::Released);
        assert!(!gate.is_waiting());
    }

    #[tokio::test]
    async fn test_autonomous_does_not_pass_breakpoints() {
        let gate = gate();
        gate.set_autonomous(true);
        let blocked = timeout(
            Duration::from_millis(50),
            gate.wait_for_release(WaitKind::FullStep, "test"),
        )
        .await;
        assert!(blocked.is_err());

        gate.set_full_autonomous(true);
        let outcome = timeout(
            Duration::from_millis(50),
            gate.wait_for_release(WaitKind::FullStep, "test"),
        )
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Released);
    }

    #[tokio::test]
    async fn test_release_while_waiting() {
        let gate = gate();
        let worker = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_release(WaitKind::Step, "test").await })
        };

        until_waiting(&gate).await;
        assert!(gate.request_release());

        let outcome = timeout(Duration::from_secs(1), worker).await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Released);
        let state = gate.state();
        assert!(!state.released);
        assert!(!state.is_waiting);
    }

    #[tokio::test]
    async fn test_early_release_is_dropped() {
        let gate = gate();

        // Nobody is waiting yet: the release must not be remembered.
        assert!(!gate.request_release());
        assert!(!gate.state().released);

        let worker = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_release(WaitKind::Step, "test").await })
        };
        until_waiting(&gate).await;
        tokio::time::sleep(POLL * 10).await;
        assert!(!worker.is_finished());

        gate.request_release();
        let outcome = timeout(Duration::from_secs(1), worker).await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Released);
    }

    #[tokio::test]
    async fn test_double_release_satisfies_one_wait() {
        let gate = gate();
        let first = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_release(WaitKind::Step, "first").await })
        };
        until_waiting(&gate).await;
        gate.request_release();
        gate.request_release();
        assert_eq!(first.await.unwrap(), WaitOutcome::Released);

        let second = timeout(
            Duration::from_millis(50),
            gate.wait_for_release(WaitKind::Step, "second"),
        )
        .await;
        assert!(second.is_err(), "second wait must not be satisfied by the extra release");
    }

    #[tokio::test]
    async fn test_abandoned_wait_does_not_buffer_release() {
        let gate = gate();
        let abandoned = timeout(
            Duration::from_millis(20),
            gate.wait_for_release(WaitKind::Step, "abandoned"),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(!gate.is_waiting());

        assert!(!gate.request_release());
        assert!(!gate.state().released);

        let next = timeout(
            Duration::from_millis(50),
            gate.wait_for_release(WaitKind::Step, "next"),
        )
        .await;
        assert!(next.is_err(), "next wait must not be satisfied by the ignored release");
    }

    #[tokio::test]
    async fn test_aborted_worker_leaves_gate_idle() {
        let gate = gate();
        let worker = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_release(WaitKind::Step, "test").await })
        };
        until_waiting(&gate).await;
        worker.abort();
        assert!(worker.await.unwrap_err().is_cancelled());

        assert!(!gate.is_waiting());
        assert!(!gate.request_release());
    }

    #[tokio::test]
    async fn test_autonomy_toggle_releases_pending_wait() {
        let gate = gate();
        let worker = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_release(WaitKind::Step, "test").await })
        };
        until_waiting(&gate).await;
        gate.set_autonomous(true);
        let outcome = timeout(Duration::from_secs(1), worker).await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Released);
    }

    #[tokio::test]
    async fn test_stop_clears_autonomy() {
        let gate = gate();
        gate.set_full_autonomous(true);
        gate.request_stop();

        let state = gate.state();
        assert!(state.stop_requested);
        assert!(!state.autonomous);
        assert!(!state.full_autonomous);

        let blocked = timeout(
            Duration::from_millis(50),
            gate.wait_for_release(WaitKind::Step, "test"),
        )
        .await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_autonomy_clears_stop() {
        let gate = gate();
        gate.request_stop();
        gate.set_autonomous(true);
        assert!(!gate.state().stop_requested);

        gate.request_stop();
        gate.set_full_autonomous(false);
        assert!(!gate.state().stop_requested);
    }

    #[tokio::test]
    async fn test_toggles_are_idempotent() {
        let gate = gate();
        gate.set_autonomous(true);
        gate.set_autonomous(true);
        assert!(gate.state().autonomous);
        gate.set_autonomous(false);
        assert!(!gate.state().autonomous);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_wait() {
        let gate = gate();
        let worker = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_release(WaitKind::Step, "test").await })
        };
        until_waiting(&gate).await;
        gate.shutdown();

        let outcome = timeout(Duration::from_secs(1), worker).await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(!gate.is_waiting());
    }

    #[tokio::test]
    async fn test_shutdown_wins_over_autonomy() {
        let gate = gate();
        gate.set_full_autonomous(true);
        gate.shutdown();
        assert_eq!(
            gate.wait_for_release(WaitKind::Step, "test").await,
            WaitOutcome::Cancelled
        );
    }
}
