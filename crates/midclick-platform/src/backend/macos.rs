//! macOS-native tap backend using a filtering CGEventTap.
//!
//! The tap is created with default (filtering) options at the HID level,
//! so the callback can rewrite a trigger click into a middle-button event
//! in place, or swallow it by returning null. The OS disables a tap whose
//! callback stalls or when the user revokes accessibility access; both
//! arrive as tap-disabled callback types and surface as a loss so the
//! supervisor can re-attach.
//!
//! Each attachment runs its own CFRunLoop thread; detaching stops the run
//! loop and joins the thread, which releases the tap.

use crate::PlatformError;
use crossbeam_channel::Sender;
use midclick_core::{
    ButtonPhase, EventHook, EventKind, FilterAction, Modifiers, MouseButton, RawInputEvent,
    TapAttachment, TapBackend, TapNotice, TapNoticeKind,
};

use core_foundation::base::TCFType;
use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop, CFRunLoopSource};
use core_graphics::event::{CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType};
use std::cell::RefCell;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

// FFI declarations for functions not exposed by the core-graphics crate.
type CFMachPortRef = *mut c_void;
type CFRunLoopSourceRef = *mut c_void;
type CFRunLoopRef = *mut c_void;
type CFAllocatorRef = *const c_void;
type CFIndex = i64;
type CGEventRef = *mut c_void;
type CGEventFlags = u64;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct CGPoint {
    x: f64,
    y: f64,
}

// Event field and flag constants.
const MOUSE_EVENT_BUTTON_NUMBER: u32 = 3;
const MIDDLE_BUTTON_NUMBER: i64 = 2;

const FLAG_SHIFT: u64 = 0x20000;
const FLAG_CONTROL: u64 = 0x40000;
const FLAG_ALTERNATE: u64 = 0x80000;
const FLAG_COMMAND: u64 = 0x100000;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventTapCreate(
        tap: u32,
        place: u32,
        options: u32,
        events_of_interest: u64,
        callback: CGEventTapCallback,
        user_info: *mut c_void,
    ) -> CFMachPortRef;

    fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);

    fn CGEventGetLocation(event: CGEventRef) -> CGPoint;
    fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
    fn CGEventSetIntegerValueField(event: CGEventRef, field: u32, value: i64);
    fn CGEventGetFlags(event: CGEventRef) -> CGEventFlags;
    fn CGEventSetType(event: CGEventRef, event_type: u32);
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFMachPortCreateRunLoopSource(
        allocator: CFAllocatorRef,
        port: CFMachPortRef,
        order: CFIndex,
    ) -> CFRunLoopSourceRef;

    fn CFRunLoopStop(rl: CFRunLoopRef);
}

type CGEventTapCallback = extern "C" fn(
    proxy: *mut c_void,
    event_type: CGEventType,
    cg_event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef;

struct TapContext {
    hook: EventHook,
    notices: Sender<TapNotice>,
    epoch: u64,
}

// The callback runs on the tap thread's CFRunLoop; the context is installed
// there before the loop starts.
thread_local! {
    static TAP_CONTEXT: RefCell<Option<TapContext>> = const { RefCell::new(None) };
}

fn flags_to_modifiers(flags: CGEventFlags) -> Modifiers {
    Modifiers {
        shift: flags & FLAG_SHIFT != 0,
        control: flags & FLAG_CONTROL != 0,
        alt: flags & FLAG_ALTERNATE != 0,
        meta: flags & FLAG_COMMAND != 0,
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Convert a button CGEvent via raw FFI (no ownership, no Drop).
fn convert_event(event_type: CGEventType, event: CGEventRef) -> Option<(RawInputEvent, ButtonPhase)> {
    let (button, phase) = match event_type {
        CGEventType::LeftMouseDown => (MouseButton::Left, ButtonPhase::Press),
        CGEventType::LeftMouseUp => (MouseButton::Left, ButtonPhase::Release),
        CGEventType::RightMouseDown => (MouseButton::Right, ButtonPhase::Press),
        CGEventType::RightMouseUp => (MouseButton::Right, ButtonPhase::Release),
        CGEventType::OtherMouseDown | CGEventType::OtherMouseUp => {
            let number =
                unsafe { CGEventGetIntegerValueField(event, MOUSE_EVENT_BUTTON_NUMBER) };
            let button = if number == MIDDLE_BUTTON_NUMBER {
                MouseButton::Middle
            } else {
                MouseButton::Other(number as u8)
            };
            let phase = if matches!(event_type, CGEventType::OtherMouseDown) {
                ButtonPhase::Press
            } else {
                ButtonPhase::Release
            };
            (button, phase)
        }
        _ => return None,
    };

    let location = unsafe { CGEventGetLocation(event) };
    let flags = unsafe { CGEventGetFlags(event) };

    let raw = RawInputEvent {
        timestamp_ms: now_ms(),
        position: (location.x, location.y),
        modifiers: flags_to_modifiers(flags),
        kind: EventKind::Button { button, phase },
    };
    Some((raw, phase))
}

/// The tap callback: decide per event and apply the action in place.
extern "C" fn tap_callback(
    _proxy: *mut c_void,
    event_type: CGEventType,
    cg_event: CGEventRef,
    _user_info: *mut c_void,
) -> CGEventRef {
    TAP_CONTEXT.with(|slot| {
        let slot = slot.borrow();
        let Some(ctx) = slot.as_ref() else {
            return cg_event;
        };

        if matches!(
            event_type,
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput
        ) {
            warn!("event tap disabled by the OS");
            let _ = ctx.notices.try_send(TapNotice {
                epoch: ctx.epoch,
                kind: TapNoticeKind::Lost,
            });
            return cg_event;
        }

        let Some((raw, phase)) = convert_event(event_type, cg_event) else {
            return cg_event;
        };

        match (ctx.hook)(&raw) {
            FilterAction::PassThrough => cg_event,
            FilterAction::Suppress => ptr::null_mut(),
            FilterAction::Remap(MouseButton::Middle) => {
                let new_type = match phase {
                    ButtonPhase::Press => CGEventType::OtherMouseDown,
                    ButtonPhase::Release => CGEventType::OtherMouseUp,
                };
                unsafe {
                    CGEventSetType(cg_event, new_type as u32);
                    CGEventSetIntegerValueField(
                        cg_event,
                        MOUSE_EVENT_BUTTON_NUMBER,
                        MIDDLE_BUTTON_NUMBER,
                    );
                }
                cg_event
            }
            FilterAction::Remap(other) => {
                warn!(?other, "unsupported remap target, passing through");
                cg_event
            }
        }
    })
}

/// Create the tap and run its CFRunLoop until stopped.
fn run_tap(hook: EventHook, notices: Sender<TapNotice>, epoch: u64, runloop_slot: Arc<AtomicUsize>) {
    TAP_CONTEXT.with(|slot| {
        *slot.borrow_mut() = Some(TapContext {
            hook,
            notices: notices.clone(),
            epoch,
        });
    });

    let event_mask: u64 = (1 << CGEventType::LeftMouseDown as u64)
        | (1 << CGEventType::LeftMouseUp as u64)
        | (1 << CGEventType::RightMouseDown as u64)
        | (1 << CGEventType::RightMouseUp as u64)
        | (1 << CGEventType::OtherMouseDown as u64)
        | (1 << CGEventType::OtherMouseUp as u64);

    let tap = unsafe {
        CGEventTapCreate(
            CGEventTapLocation::HID as u32,
            CGEventTapPlacement::HeadInsertEventTap as u32,
            CGEventTapOptions::Default as u32,
            event_mask,
            tap_callback,
            ptr::null_mut(),
        )
    };

    if tap.is_null() {
        let err = PlatformError::TapCreationFailed(
            "CGEventTapCreate returned null (check accessibility permission)".into(),
        );
        let _ = notices.send(TapNotice {
            epoch,
            kind: TapNoticeKind::Denied(err.to_string()),
        });
        return;
    }

    debug!(epoch, "event tap created");

    let run_loop_source = unsafe { CFMachPortCreateRunLoopSource(ptr::null(), tap, 0) };
    if run_loop_source.is_null() {
        let err = PlatformError::TapCreationFailed("failed to create run loop source".into());
        let _ = notices.send(TapNotice {
            epoch,
            kind: TapNoticeKind::Denied(err.to_string()),
        });
        return;
    }

    let cf_source =
        unsafe { CFRunLoopSource::wrap_under_create_rule(run_loop_source as *mut _) };
    let run_loop = CFRunLoop::get_current();
    run_loop.add_source(&cf_source, unsafe { kCFRunLoopCommonModes });

    unsafe {
        CGEventTapEnable(tap, true);
    }

    runloop_slot.store(run_loop.as_concrete_TypeRef() as usize, Ordering::SeqCst);
    let _ = notices.send(TapNotice {
        epoch,
        kind: TapNoticeKind::Ready,
    });

    info!(epoch, "event tap active, running CFRunLoop");
    CFRunLoop::run_current();

    // Stopped via detach: disable the tap before the port is released.
    unsafe {
        CGEventTapEnable(tap, false);
    }
    runloop_slot.store(0, Ordering::SeqCst);
    TAP_CONTEXT.with(|slot| {
        *slot.borrow_mut() = None;
    });
    info!(epoch, "event tap thread exiting");
}

/// Tap backend using the native CGEventTap facility.
#[derive(Debug, Default)]
pub struct MacosBackend;

impl MacosBackend {
    pub fn new() -> Self {
        Self
    }
}

pub struct MacosAttachment {
    runloop: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

/// Wait for the tap thread to publish its run loop pointer.
///
/// The thread always either publishes the pointer or exits through one of
/// its error paths, so this terminates without a deadline. Returns 0 if
/// the thread exited without publishing (nothing to stop).
fn resolve_runloop(runloop: &AtomicUsize, thread: &JoinHandle<()>) -> usize {
    loop {
        let rl = runloop.load(Ordering::SeqCst);
        if rl != 0 {
            return rl;
        }
        if thread.is_finished() {
            return runloop.load(Ordering::SeqCst);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

impl TapAttachment for MacosAttachment {
    fn detach(mut self) {
        if let Some(thread) = self.thread.take() {
            let rl = resolve_runloop(&self.runloop, &thread);
            if rl != 0 {
                unsafe { CFRunLoopStop(rl as CFRunLoopRef) };
            }
            let _ = thread.join();
        }
    }
}

impl TapBackend for MacosBackend {
    type Attachment = MacosAttachment;

    fn attach(
        &mut self,
        hook: EventHook,
        notices: Sender<TapNotice>,
        epoch: u64,
    ) -> Self::Attachment {
        let runloop = Arc::new(AtomicUsize::new(0));
        let thread = {
            let runloop = runloop.clone();
            thread::spawn(move || {
                run_tap(hook, notices, epoch, runloop);
            })
        };

        MacosAttachment {
            runloop,
            thread: Some(thread),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_to_modifiers() {
        let m = flags_to_modifiers(FLAG_SHIFT | FLAG_COMMAND);
        assert!(m.shift);
        assert!(m.meta);
        assert!(!m.control);
        assert!(!m.alt);

        assert_eq!(flags_to_modifiers(0), Modifiers::NONE);
    }

    #[test]
    fn test_resolve_runloop_waits_for_slow_publication() {
        let runloop = Arc::new(AtomicUsize::new(0));
        let thread = {
            let runloop = runloop.clone();
            thread::spawn(move || {
                // Publication well past any fixed grace period, with the
                // thread still alive afterwards (as in run_current).
                thread::sleep(Duration::from_millis(700));
                runloop.store(0x1000, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(100));
            })
        };

        assert_eq!(resolve_runloop(&runloop, &thread), 0x1000);
        let _ = thread.join();
    }

    #[test]
    fn test_resolve_runloop_returns_zero_when_thread_exits_unpublished() {
        let runloop = Arc::new(AtomicUsize::new(0));
        let thread = thread::spawn(|| {});

        assert_eq!(resolve_runloop(&runloop, &thread), 0);
        let _ = thread.join();
    }
}
