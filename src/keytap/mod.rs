//! Passive keyboard matcher.
//!
//! Observes key-down events system-wide and consumes those that match an enabled
//! shortcut binding exactly. Matches are reported to the engine, which shows them as the
//! auto-clearing "last matched" marker. Events posted by the engine itself are always
//! passed through.

#[cfg(target_os = "macos")]
mod macos;

use crate::engine::EngineEvent;
use crate::inject::{EventFlags, KeyCode};
use crate::mapping::shortcut::{find_match, Modifiers, ShortcutBinding};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error("Accessibility permission has not been granted")]
    NotTrusted,

    #[error("Failed to create the keyboard event tap")]
    CreateTap,

    #[error("Failed to start the keyboard tap thread: {0}")]
    Thread(#[from] std::io::Error),

    #[error("Keyboard observation is not supported on this platform")]
    Unsupported,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TapEventKind {
    KeyDown,
    DisabledByTimeout,
    DisabledByUserInput,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TapEvent {
    pub kind: TapEventKind,
    pub key_code: KeyCode,
    pub flags: EventFlags,
    /// Carries the engine's own source marker
    pub synthetic: bool,
}

impl TapEvent {
    pub fn key_down(key_code: KeyCode, flags: EventFlags) -> Self {
        Self {
            kind: TapEventKind::KeyDown,
            key_code,
            flags,
            synthetic: false,
        }
    }

    pub fn control(kind: TapEventKind) -> Self {
        Self {
            kind,
            key_code: 0,
            flags: EventFlags::empty(),
            synthetic: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TapVerdict {
    PassThrough,
    Consume,
    /// Re-enable the tap, then pass the event through
    Reenable,
}

pub type BindingSnapshot = Arc<Vec<ShortcutBinding>>;

/// Decides what happens to each observed event.
pub struct KeyboardMatcher {
    bindings: watch::Receiver<BindingSnapshot>,
    events: mpsc::Sender<EngineEvent>,
}

impl KeyboardMatcher {
    pub fn new(bindings: watch::Receiver<BindingSnapshot>, events: mpsc::Sender<EngineEvent>) -> Self {
        Self { bindings, events }
    }

    pub fn handle(&mut self, event: &TapEvent) -> TapVerdict {
        match event.kind {
            TapEventKind::DisabledByTimeout | TapEventKind::DisabledByUserInput => {
                warn!("Keyboard tap disabled ({:?}), re-enabling", event.kind);
                return TapVerdict::Reenable;
            }
            TapEventKind::Other => return TapVerdict::PassThrough,
            TapEventKind::KeyDown => {}
        }

        if event.synthetic {
            return TapVerdict::PassThrough;
        }

        let pressed = Modifiers::from_flags(event.flags);
        let bindings = self.bindings.borrow().clone();
        let Some(binding) = find_match(&bindings, event.key_code, pressed) else {
            return TapVerdict::PassThrough;
        };

        debug!(
            "Key {} with {:?} matched {}",
            event.key_code, pressed, binding.button_id
        );
        // Never block the tap callback
        if let Err(e) = self
            .events
            .try_send(EngineEvent::KeyMatched(binding.button_id.clone()))
        {
            debug!("Dropped match notification: {}", e);
        }
        TapVerdict::Consume
    }
}

/// A running keyboard tap. Stopping joins its thread.
pub struct KeyTap {
    #[cfg(target_os = "macos")]
    inner: macos::TapThread,
}

impl KeyTap {
    /// Installs the tap, or fails if the process may not observe the keyboard.
    pub fn install(matcher: KeyboardMatcher) -> Result<Self, TapError> {
        #[cfg(target_os = "macos")]
        {
            if !macos::accessibility_trusted() {
                return Err(TapError::NotTrusted);
            }
            let inner = macos::TapThread::spawn(matcher)?;
            info!("Keyboard matcher active");
            Ok(Self { inner })
        }
        #[cfg(not(target_os = "macos"))]
        {
            drop(matcher);
            Err(TapError::Unsupported)
        }
    }

    pub fn stop(self) {
        #[cfg(target_os = "macos")]
        self.inner.stop();
        info!("Keyboard matcher stopped");
    }
}
