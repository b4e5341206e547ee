//! Accessibility-permission watching.
//!
//! The OS can revoke the global-event permission at any time, and a denial
//! at startup is only resolved by the user flipping a system setting. The
//! watcher polls a probe and reports changes: slowly while granted, fast
//! while denied so recovery is prompt.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Answers "is the global-event permission currently granted?".
///
/// Implemented by `midclick-platform` (accessibility trust on macOS,
/// always granted elsewhere) and by test fakes.
pub trait PermissionProbe: Send + 'static {
    fn is_granted(&self) -> bool;
}

impl<F> PermissionProbe for F
where
    F: Fn() -> bool + Send + 'static,
{
    fn is_granted(&self) -> bool {
        self()
    }
}

/// Polling intervals for the watcher.
#[derive(Debug, Clone, Copy)]
pub struct PollIntervals {
    pub granted: Duration,
    pub denied: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            granted: Duration::from_secs(5),
            denied: Duration::from_millis(500),
        }
    }
}

/// Handle to the watcher thread. Stops the thread when dropped.
pub struct PermissionWatcher {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl PermissionWatcher {
    /// Spawn a watcher with the default intervals. `notify` is called once
    /// per change, including for the initial observation.
    pub fn spawn<P, F>(probe: P, notify: F) -> Self
    where
        P: PermissionProbe,
        F: Fn(bool) + Send + 'static,
    {
        Self::spawn_with_intervals(probe, notify, PollIntervals::default())
    }

    /// Spawn a watcher with explicit intervals (short ones in tests).
    pub fn spawn_with_intervals<P, F>(probe: P, notify: F, intervals: PollIntervals) -> Self
    where
        P: PermissionProbe,
        F: Fn(bool) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded(1);

        let thread = thread::spawn(move || {
            run_watcher(probe, notify, intervals, stop_rx);
        });

        Self {
            stop_tx,
            thread: Some(thread),
        }
    }

    /// Stop the watcher and wait for its thread to finish.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PermissionWatcher {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn run_watcher<P, F>(probe: P, notify: F, intervals: PollIntervals, stop_rx: Receiver<()>)
where
    P: PermissionProbe,
    F: Fn(bool),
{
    info!("permission watcher started");
    let mut last: Option<bool> = None;

    loop {
        let granted = probe.is_granted();
        if last != Some(granted) {
            info!(granted, "permission state changed");
            notify(granted);
            last = Some(granted);
        }

        let interval = if granted {
            intervals.granted
        } else {
            intervals.denied
        };

        match stop_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    debug!("permission watcher exiting");
}
