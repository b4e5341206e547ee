//! midclick-platform: platform-specific I/O boundary for midclick.
//!
//! This crate provides:
//! - Tap backends implementing `midclick_core::TapBackend` (native
//!   CGEventTap on macOS, rdev grab elsewhere)
//! - Middle-button synthesis via `enigo`
//! - Accessibility-permission probing for the core's permission watcher

mod backend;
mod error;
mod injector;
mod permissions;

pub use backend::{native_backend, NativeBackend};

#[cfg(target_os = "macos")]
pub use backend::{MacosAttachment, MacosBackend};

#[cfg(not(target_os = "macos"))]
pub use backend::{GrabAttachment, GrabBackend};

pub use error::{PlatformError, PlatformResult};

pub use injector::{EnigoInjector, MiddleInjector, NoopInjector};

pub use permissions::{
    accessibility_granted, accessibility_granted_with_prompt, AccessibilityProbe,
};
