//! Controller input: button identifiers, edge detection and the device sources.
//!
//! Two sources feed the engine:
//!
//! 1. [`gamepad`] - generic controller via gilrs (all buttons but capture, both sticks)
//! 2. [`hid_capture`] - vendor HID reports, decoded by [`raw_report`] (capture only)
//!
//! # Architecture
//!
//! ```text
//! gilrs ──► Collector thread ──► ButtonReport ──┐
//!               └──► watch<StickSnapshot>       ├──► engine (ButtonStateCache)
//! hidapi ──► Capture thread ───► ButtonReport ──┘
//! ```
//!
//! Each source runs on its own OS thread and is owned by a [`SourceRegistration`] that
//! cancels and joins it.

pub mod analog;
pub mod buttons;
pub mod gamepad;
pub mod hid_capture;
pub mod raw_report;
pub mod state_cache;

use buttons::ButtonId;
use state_cache::EdgeSource;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Button states observed by a source at one instant.
#[derive(Clone, Debug, PartialEq)]
pub struct ButtonReport {
    pub source: EdgeSource,
    pub states: Vec<(ButtonId, bool)>,
}

impl ButtonReport {
    pub fn single(source: EdgeSource, id: ButtonId, pressed: bool) -> Self {
        Self {
            source,
            states: vec![(id, pressed)],
        }
    }
}

/// Ownership of a source thread. Stopping or dropping it cancels and joins the thread.
pub struct SourceRegistration {
    name: &'static str,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl SourceRegistration {
    pub fn new(name: &'static str, cancel: CancellationToken, thread: JoinHandle<()>) -> Self {
        Self {
            name,
            cancel,
            thread: Some(thread),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stop(mut self) {
        self.join();
    }

    fn join(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.cancel.cancel();
        match thread.join() {
            Ok(()) => info!("{} source stopped", self.name),
            Err(_) => error!("{} source thread panicked", self.name),
        }
    }
}

impl Drop for SourceRegistration {
    fn drop(&mut self) {
        self.join();
    }
}

/// Sleeps on a source thread, waking early on cancellation. Returns true if cancelled.
pub(crate) fn sleep_or_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(20);
    let mut remaining = duration;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return true;
        }
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
    cancel.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn stop_cancels_and_joins() {
        let cancel = CancellationToken::new();
        let exited = Arc::new(AtomicBool::new(false));

        let thread_cancel = cancel.clone();
        let thread_exited = exited.clone();
        let thread = std::thread::spawn(move || {
            while !sleep_or_cancelled(&thread_cancel, Duration::from_secs(10)) {}
            thread_exited.store(true, Ordering::SeqCst);
        });

        let registration = SourceRegistration::new("test", cancel.clone(), thread);
        assert_eq!(registration.name(), "test");
        registration.stop();

        assert!(cancel.is_cancelled());
        assert!(exited.load(Ordering::SeqCst));
    }
}
