//! Common error types for midclick-core.

use thiserror::Error;

/// Failures of the interception session and its supervision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The OS refused the global-event attachment. Requires user action
    /// (accessibility permission); not worth retrying at a short interval.
    #[error("global-event attachment denied: {0}")]
    PermissionDenied(String),
    /// Attaching took longer than the configured bound.
    #[error("attachment not established within {timeout_ms}ms")]
    AttachTimeout { timeout_ms: u64 },
    /// The OS invalidated an active attachment at runtime.
    #[error("active attachment invalidated by the OS")]
    UnexpectedDetach,
    /// `schedule_restart` was called with a non-positive delay.
    #[error("restart delay must be positive")]
    InvalidDelay,
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
