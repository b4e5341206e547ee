//! midclick-core: event filtering + supervised interception session.
//!
//! Design goal: keep this crate UI-agnostic and platform-agnostic.
//! The OS attachment (event tap / hook) lives behind the [`TapBackend`]
//! trait and is implemented by `midclick-platform`; everything here is
//! testable with a mock backend.

mod config;
mod error;
mod filter;
mod mode;
mod permission;
mod session;
mod supervisor;

pub use config::CoreConfig;
pub use error::{SessionError, SessionResult};
pub use filter::{EventFilter, FilterAction, FilterConfig};
pub use mode::{ClickMode, ModeState};
pub use permission::{PermissionProbe, PermissionWatcher, PollIntervals};
pub use session::{
    EventHook, InterceptionSession, SessionStatus, TapAttachment, TapBackend, TapNotice,
    TapNoticeKind,
};
pub use supervisor::{Supervisor, SupervisorCommand, SupervisorEvent, SupervisorHandle};

use serde::{Deserialize, Serialize};

/// Physical mouse buttons we know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    /// Anything beyond the first three buttons.
    Other(u8),
}

/// Press or release half of a button event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonPhase {
    Press,
    Release,
}

/// Modifier keys held at the time of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub control: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        shift: false,
        control: false,
        alt: false,
        meta: false,
    };

    /// True if every modifier set in `required` is also set in `self`.
    pub fn contains(&self, required: &Modifiers) -> bool {
        (!required.shift || self.shift)
            && (!required.control || self.control)
            && (!required.alt || self.alt)
            && (!required.meta || self.meta)
    }
}

/// What kind of input occurrence an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    Button { button: MouseButton, phase: ButtonPhase },
    Motion { x: f64, y: f64 },
    Scroll { delta_x: i32, delta_y: i32 },
}

/// A single raw input occurrence delivered by the OS tap.
///
/// Transient: it exists for one filtering decision and is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInputEvent {
    /// Milliseconds since some process-local origin (backend-defined).
    pub timestamp_ms: u64,
    /// Pointer position when the event fired.
    pub position: (f64, f64),
    /// Modifier keys held when the event fired.
    pub modifiers: Modifiers,
    pub kind: EventKind,
}

impl RawInputEvent {
    /// Convenience constructor for a button event.
    pub fn button(button: MouseButton, phase: ButtonPhase, modifiers: Modifiers) -> Self {
        Self {
            timestamp_ms: 0,
            position: (0.0, 0.0),
            modifiers,
            kind: EventKind::Button { button, phase },
        }
    }
}
