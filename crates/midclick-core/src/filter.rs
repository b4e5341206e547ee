//! Pure filtering decision: given one raw event and the current mode,
//! decide whether the OS delivers it untouched, remapped, or not at all.

use crate::{ButtonPhase, ClickMode, EventKind, Modifiers, MouseButton, RawInputEvent};
use serde::{Deserialize, Serialize};

/// Outcome of a filtering decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    /// Let the OS deliver the event natively.
    PassThrough,
    /// Suppress the original and deliver it as the given button instead.
    Remap(MouseButton),
    /// Drop the event entirely.
    Suppress,
}

/// Which gesture triggers middle-click emulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Modifiers that must be held for a click to count as the trigger.
    pub trigger_modifiers: Modifiers,
    /// Physical buttons eligible for remapping.
    pub trigger_buttons: Vec<MouseButton>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            trigger_modifiers: Modifiers {
                control: true,
                alt: true,
                shift: false,
                meta: false,
            },
            trigger_buttons: vec![MouseButton::Left, MouseButton::Right],
        }
    }
}

/// The filter itself: an immutable config and a pure decision function.
///
/// `decide` performs no I/O and mutates nothing, so it can run inline in
/// the OS event-delivery callback and cannot itself fail the session.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    config: FilterConfig,
}

impl EventFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Decide what happens to `event` under `mode`.
    ///
    /// Total over the event domain: anything that is not a trigger click
    /// (motion, scroll, middle-button activity, unadorned clicks) passes
    /// through.
    pub fn decide(&self, event: &RawInputEvent, mode: ClickMode) -> FilterAction {
        if mode == ClickMode::Passthrough {
            return FilterAction::PassThrough;
        }

        match event.kind {
            EventKind::Button { button, phase: _ } => {
                if !self.config.trigger_buttons.contains(&button) {
                    return FilterAction::PassThrough;
                }
                if event.modifiers.contains(&self.config.trigger_modifiers) {
                    // Press and release are remapped symmetrically; the
                    // release pairs up as long as the modifiers are held.
                    FilterAction::Remap(MouseButton::Middle)
                } else {
                    FilterAction::PassThrough
                }
            }
            EventKind::Motion { .. } | EventKind::Scroll { .. } => FilterAction::PassThrough,
        }
    }
}
