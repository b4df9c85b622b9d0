use super::{KeyboardMatcher, TapError, TapEvent, TapEventKind, TapVerdict};
use crate::inject::{EventFlags, SYNTHETIC_EVENT_MARKER};
use crate::sys::*;
use std::ffi::c_void;
use std::ptr;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const RUN_LOOP_SLICE_SECS: f64 = 0.25;

pub fn accessibility_trusted() -> bool {
    unsafe { AXIsProcessTrusted() }
}

struct TapContext {
    matcher: KeyboardMatcher,
    port: CFMachPortRef,
}

struct RunLoop(CFRunLoopRef);

// Only used to wake the loop with CFRunLoopStop, which is thread-safe
unsafe impl Send for RunLoop {}

pub struct TapThread {
    cancel: CancellationToken,
    run_loop: RunLoop,
    thread: Option<JoinHandle<()>>,
}

impl TapThread {
    pub fn spawn(matcher: KeyboardMatcher) -> Result<Self, TapError> {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

        let thread_cancel = cancel.clone();
        let thread = std::thread::Builder::new()
            .name("padpilot-keytap".into())
            .spawn(move || run_tap(matcher, thread_cancel, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(run_loop)) => Ok(Self {
                cancel,
                run_loop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(TapError::CreateTap)
            }
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.cancel.cancel();
        unsafe { CFRunLoopStop(self.run_loop.0) };
        if thread.join().is_err() {
            error!("Keyboard tap thread panicked");
        }
    }
}

impl Drop for TapThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_tap(
    matcher: KeyboardMatcher,
    cancel: CancellationToken,
    ready: std_mpsc::SyncSender<Result<RunLoop, TapError>>,
) {
    let context = Box::into_raw(Box::new(TapContext {
        matcher,
        port: ptr::null_mut(),
    }));

    let mask: CGEventMask = 1 << kCGEventKeyDown;
    let port = unsafe {
        CGEventTapCreate(
            kCGSessionEventTap,
            kCGHeadInsertEventTap,
            kCGEventTapOptionDefault,
            mask,
            tap_callback,
            context.cast::<c_void>(),
        )
    };
    if port.is_null() {
        drop(unsafe { Box::from_raw(context) });
        let _ = ready.send(Err(TapError::CreateTap));
        return;
    }

    unsafe {
        (*context).port = port;
        let source = CFMachPortCreateRunLoopSource(ptr::null(), port, 0);
        let run_loop = CFRunLoopGetCurrent();
        CFRunLoopAddSource(run_loop, source, kCFRunLoopCommonModes);
        CGEventTapEnable(port, true);

        if ready.send(Ok(RunLoop(run_loop))).is_ok() {
            info!("Keyboard tap installed");
            while !cancel.is_cancelled() {
                CFRunLoopRunInMode(kCFRunLoopDefaultMode, RUN_LOOP_SLICE_SECS, false);
            }
        }

        CGEventTapEnable(port, false);
        CFRunLoopRemoveSource(run_loop, source, kCFRunLoopCommonModes);
        CFMachPortInvalidate(port);
        CFRelease(source as CFTypeRef);
        CFRelease(port as CFTypeRef);
        drop(Box::from_raw(context));
    }
    debug!("Keyboard tap thread exiting");
}

unsafe extern "C" fn tap_callback(
    _proxy: CGEventTapProxy,
    event_type: CGEventType,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef {
    let context = &mut *user_info.cast::<TapContext>();

    let kind = match event_type {
        kCGEventKeyDown => TapEventKind::KeyDown,
        kCGEventTapDisabledByTimeout => TapEventKind::DisabledByTimeout,
        kCGEventTapDisabledByUserInput => TapEventKind::DisabledByUserInput,
        _ => TapEventKind::Other,
    };

    let tap_event = if kind == TapEventKind::KeyDown && !event.is_null() {
        TapEvent {
            kind,
            key_code: CGEventGetIntegerValueField(event, kCGKeyboardEventKeycode) as u16,
            flags: EventFlags::from_bits(CGEventGetFlags(event)),
            synthetic: CGEventGetIntegerValueField(event, kCGEventSourceUserData)
                == SYNTHETIC_EVENT_MARKER,
        }
    } else {
        TapEvent::control(kind)
    };

    match context.matcher.handle(&tap_event) {
        TapVerdict::PassThrough => event,
        TapVerdict::Consume => ptr::null_mut(),
        TapVerdict::Reenable => {
            CGEventTapEnable(context.port, true);
            event
        }
    }
}
