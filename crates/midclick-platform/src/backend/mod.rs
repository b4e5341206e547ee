//! Tap backends: the OS side of the interception session.
//!
//! Platform implementations:
//! - macOS: native filtering CGEventTap (`macos.rs`)
//! - Windows/Linux: rdev grab loop with injected middle clicks (`grab.rs`)

#[cfg(target_os = "macos")]
mod macos;

#[cfg(not(target_os = "macos"))]
mod grab;

#[cfg(target_os = "macos")]
pub use macos::{MacosAttachment, MacosBackend};

#[cfg(not(target_os = "macos"))]
pub use grab::{GrabAttachment, GrabBackend};

#[cfg(target_os = "macos")]
pub type NativeBackend = MacosBackend;

#[cfg(not(target_os = "macos"))]
pub type NativeBackend = GrabBackend;

/// The tap backend for the current platform.
pub fn native_backend() -> NativeBackend {
    NativeBackend::new()
}
