//! Process-wide click mode: a single atomic value shared between the
//! event-delivery context and the control surface.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// How intercepted clicks are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClickMode {
    /// Primary-click passthrough: every event is delivered untouched.
    Passthrough,
    /// Middle-click emulation: the trigger gesture remaps to middle.
    MiddleEmulation,
}

impl Default for ClickMode {
    fn default() -> Self {
        Self::MiddleEmulation
    }
}

impl ClickMode {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Passthrough,
            _ => Self::MiddleEmulation,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Passthrough => 0,
            Self::MiddleEmulation => 1,
        }
    }
}

/// Shared handle to the process-wide mode.
///
/// Cloning shares the underlying value. Reads and writes are single-word
/// atomics, so the event path can read the mode on every event without
/// taking a lock and without observing a torn value.
#[derive(Debug, Clone)]
pub struct ModeState {
    inner: Arc<AtomicU8>,
}

impl ModeState {
    pub fn new(mode: ClickMode) -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(mode.as_u8())),
        }
    }

    /// Overwrite the mode. Immediately visible to subsequent `get` calls
    /// from any thread, including the event-delivery callback.
    pub fn set(&self, mode: ClickMode) {
        self.inner.store(mode.as_u8(), Ordering::SeqCst);
    }

    /// Read the current mode. Never fails.
    pub fn get(&self) -> ClickMode {
        ClickMode::from_u8(self.inner.load(Ordering::SeqCst))
    }
}

impl Default for ModeState {
    fn default() -> Self {
        Self::new(ClickMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_get() {
        let mode = ModeState::new(ClickMode::Passthrough);
        assert_eq!(mode.get(), ClickMode::Passthrough);

        mode.set(ClickMode::MiddleEmulation);
        assert_eq!(mode.get(), ClickMode::MiddleEmulation);
    }

    #[test]
    fn test_clone_shares_value() {
        let mode = ModeState::default();
        let other = mode.clone();

        mode.set(ClickMode::Passthrough);
        assert_eq!(other.get(), ClickMode::Passthrough);
    }

    #[test]
    fn test_concurrent_readers_never_observe_torn_value() {
        let mode = ModeState::new(ClickMode::Passthrough);

        let writer = {
            let mode = mode.clone();
            thread::spawn(move || {
                for i in 0..10_000 {
                    mode.set(if i % 2 == 0 {
                        ClickMode::MiddleEmulation
                    } else {
                        ClickMode::Passthrough
                    });
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let mode = mode.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        // from_u8 is total, so the only way this could fail
                        // is a torn read producing an out-of-range value.
                        let m = mode.get();
                        assert!(matches!(
                            m,
                            ClickMode::Passthrough | ClickMode::MiddleEmulation
                        ));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
