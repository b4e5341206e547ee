//! Accessibility permission probing.
//!
//! A global event tap requires the OS to trust this process. On macOS that
//! is the Accessibility list in System Settings; other platforms have no
//! equivalent gate, so the probe always reports granted there.

use midclick_core::PermissionProbe;

/// Check whether the global-event permission is currently granted.
pub fn accessibility_granted() -> bool {
    #[cfg(target_os = "macos")]
    {
        macos_accessibility_client::accessibility::application_is_trusted()
    }
    #[cfg(not(target_os = "macos"))]
    {
        true
    }
}

/// Like [`accessibility_granted`], but asks the OS to show its permission
/// prompt if access is missing. Call at most once per launch.
pub fn accessibility_granted_with_prompt() -> bool {
    #[cfg(target_os = "macos")]
    {
        macos_accessibility_client::accessibility::application_is_trusted_with_prompt()
    }
    #[cfg(not(target_os = "macos"))]
    {
        true
    }
}

/// [`PermissionProbe`] over [`accessibility_granted`], for wiring into the
/// core's permission watcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessibilityProbe;

impl PermissionProbe for AccessibilityProbe {
    fn is_granted(&self) -> bool {
        accessibility_granted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_non_macos_is_always_granted() {
        assert!(accessibility_granted());
        assert!(accessibility_granted_with_prompt());
        assert!(AccessibilityProbe.is_granted());
    }
}
