//! Portable tap backend over `rdev::grab`.
//!
//! rdev's grab loop cannot be stopped once started, so this backend uses a
//! SINGLETON pattern: one process-wide grab thread runs for the process
//! lifetime, and attach/detach install or remove the hook entry it consults.
//! With the hook removed every event passes through untouched, which is
//! equivalent to being detached. At most one attachment exists at a time.
//!
//! Unlike the macOS tap, a grabbed event cannot be rewritten in place: a
//! remapped click is suppressed and the middle-button half is synthesized
//! through the injector instead.

use crate::injector::{EnigoInjector, MiddleInjector, NoopInjector};
use crate::PlatformError;
use crossbeam_channel::Sender;
use midclick_core::{
    ButtonPhase, EventHook, EventKind, FilterAction, Modifiers, MouseButton, RawInputEvent,
    TapAttachment, TapBackend, TapNotice, TapNoticeKind,
};
use rdev::{grab, Event, EventType, Key};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use tracing::{error, info, warn};

struct HookEntry {
    hook: EventHook,
    notices: Sender<TapNotice>,
    epoch: u64,
    injector: Arc<dyn MiddleInjector>,
}

/// The hook currently consulted by the grab callback, if any.
static HOOK_SLOT: RwLock<Option<HookEntry>> = RwLock::new(None);

/// Grab thread lifecycle: not started, running, or dead after an error.
static GRAB_STATE: AtomicU8 = AtomicU8::new(GRAB_IDLE);
const GRAB_IDLE: u8 = 0;
const GRAB_RUNNING: u8 = 1;
const GRAB_FAILED: u8 = 2;

// Modifier and pointer state tracked from the raw stream, since rdev
// button events carry neither.
static MODIFIER_MASK: AtomicU8 = AtomicU8::new(0);
const MOD_SHIFT: u8 = 1 << 0;
const MOD_CONTROL: u8 = 1 << 1;
const MOD_ALT: u8 = 1 << 2;
const MOD_META: u8 = 1 << 3;

static POINTER_X: AtomicU64 = AtomicU64::new(0);
static POINTER_Y: AtomicU64 = AtomicU64::new(0);

fn modifier_bit(key: Key) -> Option<u8> {
    match key {
        Key::ShiftLeft | Key::ShiftRight => Some(MOD_SHIFT),
        Key::ControlLeft | Key::ControlRight => Some(MOD_CONTROL),
        Key::Alt | Key::AltGr => Some(MOD_ALT),
        Key::MetaLeft | Key::MetaRight => Some(MOD_META),
        _ => None,
    }
}

fn current_modifiers() -> Modifiers {
    let mask = MODIFIER_MASK.load(Ordering::SeqCst);
    Modifiers {
        shift: mask & MOD_SHIFT != 0,
        control: mask & MOD_CONTROL != 0,
        alt: mask & MOD_ALT != 0,
        meta: mask & MOD_META != 0,
    }
}

fn current_position() -> (f64, f64) {
    (
        f64::from_bits(POINTER_X.load(Ordering::SeqCst)),
        f64::from_bits(POINTER_Y.load(Ordering::SeqCst)),
    )
}

fn convert_button(button: rdev::Button) -> MouseButton {
    match button {
        rdev::Button::Left => MouseButton::Left,
        rdev::Button::Right => MouseButton::Right,
        rdev::Button::Middle => MouseButton::Middle,
        rdev::Button::Unknown(code) => MouseButton::Other(code),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Grab callback: returning `None` swallows the event.
fn on_grab(event: Event) -> Option<Event> {
    let (button, phase) = match event.event_type {
        EventType::KeyPress(key) => {
            if let Some(bit) = modifier_bit(key) {
                MODIFIER_MASK.fetch_or(bit, Ordering::SeqCst);
            }
            return Some(event);
        }
        EventType::KeyRelease(key) => {
            if let Some(bit) = modifier_bit(key) {
                MODIFIER_MASK.fetch_and(!bit, Ordering::SeqCst);
            }
            return Some(event);
        }
        EventType::MouseMove { x, y } => {
            POINTER_X.store(x.to_bits(), Ordering::SeqCst);
            POINTER_Y.store(y.to_bits(), Ordering::SeqCst);
            return Some(event);
        }
        EventType::Wheel { .. } => return Some(event),
        EventType::ButtonPress(button) => (convert_button(button), ButtonPhase::Press),
        EventType::ButtonRelease(button) => (convert_button(button), ButtonPhase::Release),
    };

    // Pass through rather than stall input if the lock is unavailable.
    let slot = match HOOK_SLOT.read() {
        Ok(guard) => guard,
        Err(_) => return Some(event),
    };
    let Some(entry) = slot.as_ref() else {
        return Some(event);
    };

    let raw = RawInputEvent {
        timestamp_ms: now_ms(),
        position: current_position(),
        modifiers: current_modifiers(),
        kind: EventKind::Button { button, phase },
    };

    match (entry.hook)(&raw) {
        FilterAction::PassThrough => Some(event),
        FilterAction::Suppress => None,
        FilterAction::Remap(MouseButton::Middle) => {
            if let Err(e) = entry.injector.post_middle(phase) {
                warn!("failed to synthesize middle button event: {}", e);
                return Some(event);
            }
            None
        }
        FilterAction::Remap(other) => {
            warn!(?other, "unsupported remap target, passing through");
            Some(event)
        }
    }
}

fn ensure_grab_thread() {
    if GRAB_STATE
        .compare_exchange(GRAB_IDLE, GRAB_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    thread::spawn(|| {
        info!("global grab thread started");
        if let Err(e) = grab(on_grab) {
            error!(?e, "global grab failed");
            GRAB_STATE.store(GRAB_FAILED, Ordering::SeqCst);
            // The current attachment, if any, is effectively gone.
            if let Ok(slot) = HOOK_SLOT.read() {
                if let Some(entry) = slot.as_ref() {
                    let _ = entry.notices.send(TapNotice {
                        epoch: entry.epoch,
                        kind: TapNoticeKind::Lost,
                    });
                }
            }
        }
        info!("global grab thread exiting");
    });
}

/// Tap backend for platforms without a native filtering tap.
pub struct GrabBackend {
    injector: Arc<dyn MiddleInjector>,
}

impl GrabBackend {
    /// Create a backend with a real injector, falling back to a no-op one
    /// if input synthesis is unavailable (headless environments).
    pub fn new() -> Self {
        let injector: Arc<dyn MiddleInjector> = match EnigoInjector::new() {
            Ok(injector) => Arc::new(injector),
            Err(e) => {
                warn!("input synthesis unavailable, middle clicks will be swallowed: {}", e);
                Arc::new(NoopInjector)
            }
        };
        Self { injector }
    }

    pub fn with_injector(injector: Arc<dyn MiddleInjector>) -> Self {
        Self { injector }
    }
}

impl Default for GrabBackend {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GrabAttachment {
    epoch: u64,
}

impl TapAttachment for GrabAttachment {
    fn detach(self) {
        let mut slot = match HOOK_SLOT.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.as_ref().map_or(false, |e| e.epoch == self.epoch) {
            *slot = None;
            info!(epoch = self.epoch, "grab hook removed");
        }
    }
}

impl TapBackend for GrabBackend {
    type Attachment = GrabAttachment;

    fn attach(
        &mut self,
        hook: EventHook,
        notices: Sender<TapNotice>,
        epoch: u64,
    ) -> Self::Attachment {
        {
            let mut slot = match HOOK_SLOT.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *slot = Some(HookEntry {
                hook,
                notices: notices.clone(),
                epoch,
                injector: self.injector.clone(),
            });
        }

        if GRAB_STATE.load(Ordering::SeqCst) == GRAB_FAILED {
            // A previous grab attempt died; without elevated input access
            // it will not come back on its own.
            let err = PlatformError::TapCreationFailed(
                "global input grab unavailable (insufficient input access)".into(),
            );
            let _ = notices.send(TapNotice {
                epoch,
                kind: TapNoticeKind::Denied(err.to_string()),
            });
            return GrabAttachment { epoch };
        }

        ensure_grab_thread();

        // Readiness is optimistic: grab gives no startup confirmation, so
        // a failing grab surfaces as a loss right after this.
        let _ = notices.send(TapNotice {
            epoch,
            kind: TapNoticeKind::Ready,
        });

        GrabAttachment { epoch }
    }
}
