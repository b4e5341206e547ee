//! Session supervision: keeps exactly one interception session healthy
//! across the process lifetime.
//!
//! The supervisor runs on its own thread and owns the session. Restarts
//! are scheduled through a single replaceable timer, so a burst of
//! restart requests collapses into the most recent one, and a pending
//! restart is cancelled by `stop()`.

use crate::session::{InterceptionSession, SessionStatus, TapBackend, TapNotice, TapNoticeKind};
use crate::{
    ClickMode, CoreConfig, EventFilter, EventHook, ModeState, PermissionProbe, PermissionWatcher,
    SessionError, SessionResult,
};
use crossbeam_channel::{after, bounded, never, select, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Commands sent to the supervisor thread.
#[derive(Debug, Clone)]
pub enum SupervisorCommand {
    /// Attach now (defensive, idempotent while active).
    Start,
    /// Detach and cancel any pending restart.
    Stop,
    /// Restart after a delay; supersedes any pending restart.
    ScheduleRestart { delay: Duration, reason: String },
    /// The accessibility permission changed (from the permission watcher).
    PermissionChanged { granted: bool },
    /// Tear everything down and exit the thread.
    Shutdown,
}

/// Events emitted outward, for the control surface to render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SupervisorEvent {
    /// Session status changed.
    StatusChanged {
        old: SessionStatus,
        new: SessionStatus,
    },
    /// A restart was scheduled.
    RestartScheduled { delay_ms: u64, reason: String },
    /// A scheduled or supervised restart completed and the session is live.
    RestartCompleted,
    /// Failures exhausted the retry bound; user intervention is needed.
    PersistentFailure { error: String, attempts: u32 },
    /// Accessibility permission was granted or revoked.
    PermissionChanged { granted: bool },
}

struct PendingRestart {
    fire: Receiver<Instant>,
    reason: String,
}

/// Handle to control the supervisor thread.
///
/// This is the whole control-surface boundary: `start`, `stop`,
/// `schedule_restart`, and the mode accessors are all safe to call from
/// any thread in any state.
pub struct SupervisorHandle {
    cmd_tx: Sender<SupervisorCommand>,
    event_rx: Receiver<SupervisorEvent>,
    mode: ModeState,
    thread: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Attach to the global event facility. No-op while already active.
    pub fn start(&self) {
        self.send(SupervisorCommand::Start);
    }

    /// Detach and cancel any pending restart.
    pub fn stop(&self) {
        self.send(SupervisorCommand::Stop);
    }

    /// Schedule a stop-then-start after `delay`. The latest request wins:
    /// any not-yet-fired restart is superseded.
    pub fn schedule_restart(&self, delay: Duration, reason: &str) -> SessionResult<()> {
        if delay.is_zero() {
            return Err(SessionError::InvalidDelay);
        }
        self.send(SupervisorCommand::ScheduleRestart {
            delay,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Seconds-based variant of [`schedule_restart`](Self::schedule_restart)
    /// for callers holding a raw number. Rejects non-positive and
    /// non-finite values without touching any state.
    pub fn schedule_restart_secs(&self, delay_secs: f64, reason: &str) -> SessionResult<()> {
        if !delay_secs.is_finite() || delay_secs <= 0.0 {
            return Err(SessionError::InvalidDelay);
        }
        self.schedule_restart(Duration::from_secs_f64(delay_secs), reason)
    }

    /// Overwrite the click mode; visible immediately to the event path.
    pub fn set_mode(&self, mode: ClickMode) {
        self.mode.set(mode);
    }

    /// Read the current click mode. Never fails.
    pub fn mode(&self) -> ClickMode {
        self.mode.get()
    }

    /// Shared handle to the mode value, for wiring into other components.
    pub fn mode_state(&self) -> ModeState {
        self.mode.clone()
    }

    /// Try to receive an outward event (non-blocking).
    pub fn try_recv_event(&self) -> Option<SupervisorEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an outward event, waiting up to `timeout`.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<SupervisorEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Start a watcher that polls `probe` and reports permission changes
    /// into the supervisor. A regained permission resets the retry budget
    /// and triggers a prompt restart.
    pub fn watch_permission<P: PermissionProbe>(&self, probe: P) -> PermissionWatcher {
        let cmd_tx = self.cmd_tx.clone();
        PermissionWatcher::spawn(probe, move |granted| {
            let _ = cmd_tx.send(SupervisorCommand::PermissionChanged { granted });
        })
    }

    /// Stop the session and wait for the supervisor thread to finish.
    pub fn shutdown(mut self) {
        self.send(SupervisorCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    fn send(&self, cmd: SupervisorCommand) {
        if let Err(e) = self.cmd_tx.send(cmd) {
            warn!("failed to send command to supervisor: {}", e);
        }
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(SupervisorCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// The supervisor: owns the session, the restart timer, and the retry
/// budget. Runs on a dedicated thread.
pub struct Supervisor<B: TapBackend> {
    session: InterceptionSession<B>,
    config: CoreConfig,
    cmd_rx: Receiver<SupervisorCommand>,
    notice_rx: Receiver<TapNotice>,
    event_tx: Sender<SupervisorEvent>,
    pending: Option<PendingRestart>,
    consecutive_failures: u32,
}

impl<B: TapBackend> Supervisor<B> {
    /// Spawn the supervisor thread and return its control handle.
    pub fn spawn(backend: B, config: CoreConfig) -> SupervisorHandle {
        Self::spawn_with_mode(backend, config, ModeState::default())
    }

    /// Like [`spawn`](Self::spawn), with an externally owned mode value
    /// (e.g. restored from the collaborator's preference store).
    pub fn spawn_with_mode(backend: B, config: CoreConfig, mode: ModeState) -> SupervisorHandle {
        let (cmd_tx, cmd_rx) = bounded(32);
        let (event_tx, event_rx) = bounded(256);
        let (notice_tx, notice_rx) = bounded(64);

        let filter = EventFilter::new(config.filter.clone());
        let hook: EventHook = {
            let mode = mode.clone();
            Arc::new(move |event| filter.decide(event, mode.get()))
        };

        let session =
            InterceptionSession::new(backend, hook, notice_tx, config.attach_timeout());

        let supervisor = Supervisor {
            session,
            config,
            cmd_rx,
            notice_rx,
            event_tx,
            pending: None,
            consecutive_failures: 0,
        };

        let thread = thread::spawn(move || {
            supervisor.run_loop();
        });

        SupervisorHandle {
            cmd_tx,
            event_rx,
            mode,
            thread: Some(thread),
        }
    }

    fn run_loop(mut self) {
        info!("supervisor thread started");

        loop {
            // One replaceable timer: scheduling a new restart swaps the
            // receiver out, which cancels the superseded one.
            let fire = self
                .pending
                .as_ref()
                .map(|p| p.fire.clone())
                .unwrap_or_else(never);

            select! {
                recv(self.cmd_rx) -> msg => match msg {
                    Ok(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(self.notice_rx) -> msg => {
                    if let Ok(notice) = msg {
                        self.handle_notice(notice);
                    }
                }
                recv(fire) -> _ => {
                    if let Some(pending) = self.pending.take() {
                        self.restart_now(&pending.reason);
                    }
                }
            }
        }

        self.pending = None;
        self.session.stop();
        info!("supervisor thread exiting");
    }

    /// Handle a command. Returns false if the thread should exit.
    fn handle_command(&mut self, cmd: SupervisorCommand) -> bool {
        debug!(?cmd, "handling command");

        match cmd {
            SupervisorCommand::Start => {
                // An explicit start is a fresh chance: forget old failures.
                self.consecutive_failures = 0;
                self.try_start();
            }
            SupervisorCommand::Stop => {
                self.pending = None;
                let old = self.session.status();
                self.session.stop();
                self.emit_status(old);
            }
            SupervisorCommand::ScheduleRestart { delay, reason } => {
                self.schedule(delay, &reason);
            }
            SupervisorCommand::PermissionChanged { granted } => {
                self.emit(SupervisorEvent::PermissionChanged { granted });
                if granted && self.session.status() == SessionStatus::Failed {
                    info!("permission granted, scheduling restart");
                    self.consecutive_failures = 0;
                    self.schedule(Duration::from_millis(500), "accessibility permission granted");
                }
            }
            SupervisorCommand::Shutdown => {
                return false;
            }
        }

        true
    }

    fn handle_notice(&mut self, notice: TapNotice) {
        if notice.kind != TapNoticeKind::Lost {
            // Ready/Denied are consumed synchronously inside start; one
            // arriving here is from an attempt that already timed out.
            debug!(?notice, "dropping out-of-band tap notice");
            return;
        }

        let old = self.session.status();
        if self.session.mark_lost(&notice) {
            self.emit_status(old);
            self.handle_failure(SessionError::UnexpectedDetach);
        }
    }

    fn schedule(&mut self, delay: Duration, reason: &str) {
        info!(delay_ms = delay.as_millis() as u64, reason, "restart scheduled");
        self.pending = Some(PendingRestart {
            fire: after(delay),
            reason: reason.to_string(),
        });
        self.emit(SupervisorEvent::RestartScheduled {
            delay_ms: delay.as_millis() as u64,
            reason: reason.to_string(),
        });
    }

    fn restart_now(&mut self, reason: &str) {
        info!(reason, "restarting now");
        let old = self.session.status();
        self.session.stop();
        if old != SessionStatus::Detached {
            self.emit_status(old);
        }
        if self.try_start() {
            self.emit(SupervisorEvent::RestartCompleted);
        }
    }

    /// Attempt to start the session. Returns true if it reached Active.
    fn try_start(&mut self) -> bool {
        let old = self.session.status();
        match self.session.start(&self.notice_rx) {
            Ok(true) => {
                self.consecutive_failures = 0;
                self.emit_status(old);
                true
            }
            Ok(false) => true, // already active
            Err(err) => {
                self.emit_status(old);
                self.handle_failure(err);
                false
            }
        }
    }

    fn handle_failure(&mut self, err: SessionError) {
        self.consecutive_failures += 1;
        let attempts = self.consecutive_failures;

        if attempts > self.config.max_restart_attempts {
            warn!(%err, attempts, "retry budget exhausted, surfacing persistent failure");
            self.pending = None;
            self.emit(SupervisorEvent::PersistentFailure {
                error: err.to_string(),
                attempts: attempts - 1,
            });
            return;
        }

        let delay = self.config.backoff_delay(attempts);
        warn!(%err, attempt = attempts, delay_ms = delay.as_millis() as u64, "session failed, will retry");
        self.schedule(delay, &err.to_string());
    }

    fn emit_status(&self, old: SessionStatus) {
        let new = self.session.status();
        if old != new {
            self.emit(SupervisorEvent::StatusChanged { old, new });
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("failed to emit supervisor event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::{MockBackend, MockControl, MockOutcome};
    use crate::{ButtonPhase, FilterAction, Modifiers, MouseButton, RawInputEvent};

    fn fast_config() -> CoreConfig {
        CoreConfig {
            attach_timeout_ms: 100,
            max_restart_attempts: 3,
            restart_backoff_base_ms: 10,
            ..CoreConfig::default()
        }
    }

    fn spawn_supervisor() -> (SupervisorHandle, MockControl) {
        let (backend, control) = MockBackend::new();
        let handle = Supervisor::spawn(backend, fast_config());
        (handle, control)
    }

    fn drain_events(handle: &SupervisorHandle) -> Vec<SupervisorEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.try_recv_event() {
            events.push(event);
        }
        events
    }

    fn wait_for_attaches(control: &MockControl, count: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while control.attach_count() < count {
            assert!(
                Instant::now() < deadline,
                "expected {} attaches, saw {}",
                count,
                control.attach_count()
            );
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn trigger_event() -> RawInputEvent {
        RawInputEvent::button(
            MouseButton::Left,
            ButtonPhase::Press,
            Modifiers {
                control: true,
                alt: true,
                ..Modifiers::NONE
            },
        )
    }

    #[test]
    fn test_start_activates_session() {
        let (handle, control) = spawn_supervisor();
        handle.start();
        wait_for_attaches(&control, 1, Duration::from_millis(500));

        let events = {
            thread::sleep(Duration::from_millis(30));
            drain_events(&handle)
        };
        assert!(events.iter().any(|e| matches!(
            e,
            SupervisorEvent::StatusChanged {
                new: SessionStatus::Active,
                ..
            }
        )));

        handle.shutdown();
    }

    #[test]
    fn test_invalid_delay_rejected_synchronously() {
        let (handle, control) = spawn_supervisor();

        assert_eq!(
            handle.schedule_restart(Duration::ZERO, "nope"),
            Err(SessionError::InvalidDelay)
        );
        assert_eq!(
            handle.schedule_restart_secs(-1.0, "nope"),
            Err(SessionError::InvalidDelay)
        );
        assert_eq!(
            handle.schedule_restart_secs(f64::NAN, "nope"),
            Err(SessionError::InvalidDelay)
        );

        thread::sleep(Duration::from_millis(50));
        // Nothing happened: no attach, no restart.
        assert_eq!(control.attach_count(), 0);

        handle.shutdown();
    }

    #[test]
    fn test_schedule_restart_debounce_latest_wins() {
        let (handle, control) = spawn_supervisor();
        handle.start();
        wait_for_attaches(&control, 1, Duration::from_millis(500));

        // A long restart superseded by a short one fires exactly once,
        // roughly at the short delay.
        handle
            .schedule_restart(Duration::from_millis(500), "long")
            .unwrap();
        handle
            .schedule_restart(Duration::from_millis(50), "short")
            .unwrap();

        wait_for_attaches(&control, 2, Duration::from_millis(300));

        // Wait past the superseded 500ms mark: no second restart fires.
        thread::sleep(Duration::from_millis(600));
        assert_eq!(control.attach_count(), 2);

        let completed = drain_events(&handle)
            .iter()
            .filter(|e| matches!(e, SupervisorEvent::RestartCompleted))
            .count();
        assert_eq!(completed, 1);

        handle.shutdown();
    }

    #[test]
    fn test_stop_cancels_pending_restart() {
        let (handle, control) = spawn_supervisor();
        handle.start();
        wait_for_attaches(&control, 1, Duration::from_millis(500));

        handle
            .schedule_restart(Duration::from_millis(80), "cancelled")
            .unwrap();
        handle.stop();

        thread::sleep(Duration::from_millis(200));
        // The pending restart never fired.
        assert_eq!(control.attach_count(), 1);
        assert_eq!(control.detach_count(), 1);

        handle.shutdown();
    }

    #[test]
    fn test_unexpected_detach_triggers_supervised_restart() {
        let (handle, control) = spawn_supervisor();
        handle.start();
        wait_for_attaches(&control, 1, Duration::from_millis(500));

        control.invalidate();

        // One retry with the short test backoff brings it back up.
        wait_for_attaches(&control, 2, Duration::from_millis(500));

        thread::sleep(Duration::from_millis(30));
        let events = drain_events(&handle);
        assert!(events.iter().any(|e| matches!(
            e,
            SupervisorEvent::StatusChanged {
                new: SessionStatus::Failed,
                ..
            }
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, SupervisorEvent::RestartCompleted)));

        handle.shutdown();
    }

    #[test]
    fn test_retries_are_bounded_then_persistent_failure() {
        let (handle, control) = spawn_supervisor();
        // First attach succeeds, every re-attach is denied.
        control.script(&[
            MockOutcome::Ready,
            MockOutcome::Denied,
            MockOutcome::Denied,
            MockOutcome::Denied,
            MockOutcome::Denied,
            MockOutcome::Denied,
        ]);

        handle.start();
        wait_for_attaches(&control, 1, Duration::from_millis(500));

        control.invalidate();

        // Loss + 3 denied retries = 4 attaches total, then it gives up.
        wait_for_attaches(&control, 4, Duration::from_millis(1_000));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(control.attach_count(), 4, "retried past the bound");

        let events = drain_events(&handle);
        assert!(events
            .iter()
            .any(|e| matches!(e, SupervisorEvent::PersistentFailure { .. })));

        handle.shutdown();
    }

    #[test]
    fn test_explicit_start_resets_retry_budget() {
        let (handle, control) = spawn_supervisor();
        control.script(&[
            MockOutcome::Ready,
            MockOutcome::Denied,
            MockOutcome::Denied,
            MockOutcome::Denied,
            MockOutcome::Denied,
        ]);

        handle.start();
        wait_for_attaches(&control, 1, Duration::from_millis(500));
        control.invalidate();
        wait_for_attaches(&control, 4, Duration::from_millis(1_000));
        thread::sleep(Duration::from_millis(100));

        // Budget exhausted; a defensive start from the UI tries again.
        handle.start();
        wait_for_attaches(&control, 5, Duration::from_millis(500));

        handle.shutdown();
    }

    #[test]
    fn test_restart_scheduled_events_carry_reason() {
        let (handle, control) = spawn_supervisor();
        handle.start();
        wait_for_attaches(&control, 1, Duration::from_millis(500));

        handle
            .schedule_restart(Duration::from_millis(30), "display reconfigured")
            .unwrap();
        wait_for_attaches(&control, 2, Duration::from_millis(300));

        let events = drain_events(&handle);
        assert!(events.iter().any(|e| matches!(
            e,
            SupervisorEvent::RestartScheduled { reason, .. } if reason == "display reconfigured"
        )));

        handle.shutdown();
    }

    #[test]
    fn test_mode_toggle_remains_responsive_while_failed() {
        let (handle, control) = spawn_supervisor();
        control.script(&[MockOutcome::Denied, MockOutcome::Denied, MockOutcome::Denied, MockOutcome::Denied]);

        handle.start();
        thread::sleep(Duration::from_millis(100));

        // The session is failing, but the mode surface still works.
        handle.set_mode(ClickMode::Passthrough);
        assert_eq!(handle.mode(), ClickMode::Passthrough);
        handle.set_mode(ClickMode::MiddleEmulation);
        assert_eq!(handle.mode(), ClickMode::MiddleEmulation);

        handle.shutdown();
    }

    #[test]
    fn test_permission_grant_recovers_failed_session() {
        let (handle, control) = spawn_supervisor();
        // Every attach is denied until the permission arrives.
        control.script(&[
            MockOutcome::Denied,
            MockOutcome::Denied,
            MockOutcome::Denied,
            MockOutcome::Denied,
        ]);

        handle.start();
        wait_for_attaches(&control, 4, Duration::from_millis(1_000));
        thread::sleep(Duration::from_millis(100));

        // Budget exhausted; the permission watcher reports a grant.
        handle.send(SupervisorCommand::PermissionChanged { granted: true });

        // The grant resets the budget and schedules a prompt restart,
        // which now succeeds (script exhausted, attaches default to Ready).
        wait_for_attaches(&control, 5, Duration::from_millis(1_500));

        let events = drain_events(&handle);
        assert!(events.iter().any(|e| matches!(
            e,
            SupervisorEvent::PermissionChanged { granted: true }
        )));

        handle.shutdown();
    }

    #[test]
    fn test_watch_permission_reports_into_supervisor() {
        let (handle, control) = spawn_supervisor();
        handle.start();
        wait_for_attaches(&control, 1, Duration::from_millis(500));

        let watcher = handle.watch_permission(|| true);

        let deadline = Instant::now() + Duration::from_millis(500);
        let mut saw_grant = false;
        while Instant::now() < deadline && !saw_grant {
            if let Some(SupervisorEvent::PermissionChanged { granted: true }) =
                handle.recv_event_timeout(Duration::from_millis(50))
            {
                saw_grant = true;
            }
        }
        assert!(saw_grant, "permission grant never surfaced");

        watcher.stop();
        handle.shutdown();
    }

    #[test]
    fn test_end_to_end_remap_scenario() {
        let (handle, control) = spawn_supervisor();
        handle.set_mode(ClickMode::MiddleEmulation);
        handle.start();
        wait_for_attaches(&control, 1, Duration::from_millis(500));

        // Trigger click remaps to middle while emulation is on.
        assert_eq!(
            control.deliver(&trigger_event()),
            Some(FilterAction::Remap(MouseButton::Middle))
        );

        // Same event passes through after switching to passthrough.
        handle.set_mode(ClickMode::Passthrough);
        assert_eq!(
            control.deliver(&trigger_event()),
            Some(FilterAction::PassThrough)
        );

        handle.shutdown();
    }
}
