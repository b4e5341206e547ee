//! Synthesized middle-button output.
//!
//! When a trigger click is suppressed instead of rewritten in place (the
//! grab backend cannot mutate events), the replacement middle press or
//! release is posted here, at the current pointer position.

use crate::{PlatformError, PlatformResult};
use enigo::{Button, Direction, Enigo, Mouse, Settings};
use midclick_core::ButtonPhase;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Posts synthesized middle-button events into the OS.
pub trait MiddleInjector: Send + Sync {
    /// Post one half of a middle click.
    fn post_middle(&self, phase: ButtonPhase) -> PlatformResult<()>;

    /// Post a full middle click (press then release) at the pointer.
    fn click_middle(&self) -> PlatformResult<()> {
        self.post_middle(ButtonPhase::Press)?;
        self.post_middle(ButtonPhase::Release)
    }
}

/// No-op injector for tests and headless environments.
pub struct NoopInjector;

impl MiddleInjector for NoopInjector {
    fn post_middle(&self, phase: ButtonPhase) -> PlatformResult<()> {
        debug!(?phase, "NoopInjector: would post middle button event");
        Ok(())
    }
}

/// Real injector using the `enigo` crate.
pub struct EnigoInjector {
    enigo: Mutex<Enigo>,
}

impl EnigoInjector {
    pub fn new() -> PlatformResult<Self> {
        let settings = Settings::default();
        let enigo = Enigo::new(&settings).map_err(|e| {
            PlatformError::InjectionFailed(format!("failed to create Enigo: {e}"))
        })?;
        Ok(Self {
            enigo: Mutex::new(enigo),
        })
    }
}

impl MiddleInjector for EnigoInjector {
    fn post_middle(&self, phase: ButtonPhase) -> PlatformResult<()> {
        let direction = match phase {
            ButtonPhase::Press => Direction::Press,
            ButtonPhase::Release => Direction::Release,
        };
        debug!(?phase, "posting synthesized middle button event");

        let mut enigo = match self.enigo.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("enigo mutex poisoned, recovering");
                poisoned.into_inner()
            }
        };
        enigo
            .button(Button::Middle, direction)
            .map_err(|e| PlatformError::InjectionFailed(e.to_string()))
    }
}
