//! Interception session: owns the live OS attachment and its state machine.
//!
//! The actual OS plumbing lives behind [`TapBackend`]. A backend spawns the
//! attachment asynchronously and reports readiness, denial, and loss as
//! epoch-stamped [`TapNotice`]s, so the session can bound the Attaching
//! state with a timeout and ignore notices from attachments it has already
//! torn down.

use crate::{FilterAction, RawInputEvent, SessionError, SessionResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-event decision hook handed to the backend.
///
/// Runs synchronously in the OS event-delivery context, so it must stay
/// lock-free and allocation-free (an atomic mode load + a pure decision).
pub type EventHook = Arc<dyn Fn(&RawInputEvent) -> FilterAction + Send + Sync>;

/// Attachment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// No attachment exists.
    Detached,
    /// Attachment requested, not yet confirmed.
    Attaching,
    /// Attachment live; events are flowing through the hook.
    Active,
    /// The last attempt failed or the attachment was lost.
    Failed,
}

/// What happened to a spawned attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapNoticeKind {
    /// The attachment is live.
    Ready,
    /// The OS refused the attachment (missing permission, usually).
    Denied(String),
    /// The OS invalidated a live attachment.
    Lost,
}

/// Notice from a backend, stamped with the attach epoch it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapNotice {
    pub epoch: u64,
    pub kind: TapNoticeKind,
}

/// A live (or in-flight) attachment that can be released exactly once.
pub trait TapAttachment: Send {
    /// Release the OS attachment. Must be safe to call while the
    /// attachment is still coming up.
    fn detach(self);
}

/// The OS boundary: spawns and releases global-event attachments.
pub trait TapBackend: Send + 'static {
    type Attachment: TapAttachment;

    /// Request an attachment. Must not block on the OS: confirmation,
    /// denial, and later invalidation arrive as [`TapNotice`]s carrying
    /// `epoch` on `notices`.
    fn attach(&mut self, hook: EventHook, notices: Sender<TapNotice>, epoch: u64)
        -> Self::Attachment;
}

/// Exactly one of these exists per supervisor; it owns at most one live
/// attachment at a time.
pub struct InterceptionSession<B: TapBackend> {
    backend: B,
    hook: EventHook,
    notice_tx: Sender<TapNotice>,
    attachment: Option<B::Attachment>,
    status: SessionStatus,
    epoch: u64,
    attach_timeout: Duration,
}

impl<B: TapBackend> InterceptionSession<B> {
    pub fn new(
        backend: B,
        hook: EventHook,
        notice_tx: Sender<TapNotice>,
        attach_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            hook,
            notice_tx,
            attachment: None,
            status: SessionStatus::Detached,
            epoch: 0,
            attach_timeout,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The epoch of the current (or most recent) attachment attempt.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// True if `notice` belongs to the attachment this session currently
    /// cares about.
    pub fn is_current(&self, notice: &TapNotice) -> bool {
        notice.epoch == self.epoch && self.attachment.is_some()
    }

    /// Start the session, waiting (bounded) for the backend to confirm.
    ///
    /// Idempotent while Active: callers invoke `start` defensively, so a
    /// second call is a no-op returning `Ok(false)`. `notice_rx` is the
    /// receiving end of the channel given at construction; stale notices
    /// from earlier epochs are drained and discarded.
    pub fn start(&mut self, notice_rx: &Receiver<TapNotice>) -> SessionResult<bool> {
        if self.status == SessionStatus::Active {
            debug!("start requested while active, ignoring");
            return Ok(false);
        }

        // A Failed session may still hold a dead attachment.
        self.release();

        self.epoch += 1;
        self.status = SessionStatus::Attaching;
        info!(epoch = self.epoch, "attaching to global event facility");

        let attachment =
            self.backend
                .attach(self.hook.clone(), self.notice_tx.clone(), self.epoch);
        self.attachment = Some(attachment);

        let deadline = Instant::now() + self.attach_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match notice_rx.recv_timeout(remaining) {
                Ok(notice) if notice.epoch == self.epoch => match notice.kind {
                    TapNoticeKind::Ready => {
                        self.status = SessionStatus::Active;
                        info!(epoch = self.epoch, "attachment active");
                        return Ok(true);
                    }
                    TapNoticeKind::Denied(reason) => {
                        warn!(epoch = self.epoch, %reason, "attachment denied");
                        self.release();
                        self.status = SessionStatus::Failed;
                        return Err(SessionError::PermissionDenied(reason));
                    }
                    TapNoticeKind::Lost => {
                        // Died before it ever confirmed.
                        warn!(epoch = self.epoch, "attachment lost while attaching");
                        self.release();
                        self.status = SessionStatus::Failed;
                        return Err(SessionError::UnexpectedDetach);
                    }
                },
                Ok(stale) => {
                    debug!(epoch = stale.epoch, "discarding stale tap notice");
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        epoch = self.epoch,
                        timeout_ms = self.attach_timeout.as_millis() as u64,
                        "attachment not confirmed in time"
                    );
                    self.release();
                    self.status = SessionStatus::Failed;
                    return Err(SessionError::AttachTimeout {
                        timeout_ms: self.attach_timeout.as_millis() as u64,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.release();
                    self.status = SessionStatus::Failed;
                    return Err(SessionError::UnexpectedDetach);
                }
            }
        }
    }

    /// Release the attachment unconditionally. Idempotent from any state.
    pub fn stop(&mut self) {
        if self.attachment.is_some() {
            info!(epoch = self.epoch, "detaching from global event facility");
        }
        self.release();
        self.status = SessionStatus::Detached;
    }

    /// Record the loss of the current attachment (signaled by the OS).
    /// Returns true if the notice applied to the live attachment.
    pub fn mark_lost(&mut self, notice: &TapNotice) -> bool {
        if !self.is_current(notice) || self.status != SessionStatus::Active {
            debug!(epoch = notice.epoch, "ignoring loss notice for stale attachment");
            return false;
        }
        warn!(epoch = self.epoch, "active attachment invalidated");
        self.release();
        self.status = SessionStatus::Failed;
        true
    }

    fn release(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            attachment.detach();
        }
    }
}

impl<B: TapBackend> Drop for InterceptionSession<B> {
    fn drop(&mut self) {
        self.release();
    }
}
