//! Common error types for midclick-platform.

use thiserror::Error;

/// Platform-level errors.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("event tap creation failed: {0}")]
    TapCreationFailed(String),
    #[error("injection failed: {0}")]
    InjectionFailed(String),
}

/// Result type for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_creation_error_names_the_cause() {
        let err = PlatformError::TapCreationFailed("grab unavailable".into());
        assert_eq!(
            err.to_string(),
            "event tap creation failed: grab unavailable"
        );
    }
}
