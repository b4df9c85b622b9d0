//! Synthetic keyboard, pointer and scroll events.
//!
//! [`Injector`] holds the sequencing rules (modifier order, flag propagation, the warp
//! before a relative move). Posting the events to the OS goes through an
//! [`EventPoster`], so the sequencing can be exercised without a window server.

pub mod keyboard;
pub mod pointer;

#[cfg(target_os = "macos")]
mod macos;

pub use keyboard::HeldChord;

use std::ops::BitOr;

/// macOS virtual key code.
pub type KeyCode = u16;

/// Value written into the user-data field of every event the engine posts.
pub const SYNTHETIC_EVENT_MARKER: i64 = 0x7061_6470;

/// Event modifier flag mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EventFlags(u64);

impl EventFlags {
    pub const SHIFT: EventFlags = EventFlags(0x0002_0000);
    pub const CONTROL: EventFlags = EventFlags(0x0004_0000);
    pub const OPTION: EventFlags = EventFlags(0x0008_0000);
    pub const COMMAND: EventFlags = EventFlags(0x0010_0000);

    pub const fn empty() -> Self {
        EventFlags(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        EventFlags(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: EventFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EventFlags {
    type Output = EventFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        EventFlags(self.0 | rhs.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

// Kind of relative pointer event to post after a warp
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerMotion {
    Move,
    LeftDrag,
    RightDrag,
}

#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("Failed to create {0} event")]
    EventCreation(&'static str),

    #[error("Failed to read the cursor position")]
    CursorPosition,

    #[error("Failed to warp the cursor: CGError {0}")]
    Warp(i32),

    #[error("Synthetic input is not supported on this platform")]
    Unsupported,
}

/// Posts single events to the OS.
pub trait EventPoster: Send {
    fn post_key(&mut self, key_code: KeyCode, down: bool, flags: EventFlags)
        -> Result<(), InjectError>;

    fn cursor_position(&mut self) -> Result<ScreenPoint, InjectError>;

    fn warp_cursor(&mut self, to: ScreenPoint) -> Result<(), InjectError>;

    /// Posts a relative motion event located at `at` carrying the integer deltas.
    fn post_pointer(
        &mut self,
        motion: PointerMotion,
        at: ScreenPoint,
        dx: i64,
        dy: i64,
    ) -> Result<(), InjectError>;

    /// Posts a two-axis pixel scroll.
    fn post_scroll(&mut self, dx: i32, dy: i32) -> Result<(), InjectError>;
}

/// Poster for targets without synthetic input support. Every call fails.
#[derive(Debug, Default)]
pub struct UnsupportedPoster;

impl EventPoster for UnsupportedPoster {
    fn post_key(&mut self, _: KeyCode, _: bool, _: EventFlags) -> Result<(), InjectError> {
        Err(InjectError::Unsupported)
    }

    fn cursor_position(&mut self) -> Result<ScreenPoint, InjectError> {
        Err(InjectError::Unsupported)
    }

    fn warp_cursor(&mut self, _: ScreenPoint) -> Result<(), InjectError> {
        Err(InjectError::Unsupported)
    }

    fn post_pointer(
        &mut self,
        _: PointerMotion,
        _: ScreenPoint,
        _: i64,
        _: i64,
    ) -> Result<(), InjectError> {
        Err(InjectError::Unsupported)
    }

    fn post_scroll(&mut self, _: i32, _: i32) -> Result<(), InjectError> {
        Err(InjectError::Unsupported)
    }
}

/// The poster for the current platform.
pub fn system_poster() -> Box<dyn EventPoster> {
    #[cfg(target_os = "macos")]
    {
        Box::new(macos::CoreGraphicsPoster)
    }
    #[cfg(not(target_os = "macos"))]
    {
        tracing::warn!("Synthetic input is unavailable on this platform, injection disabled");
        Box::new(UnsupportedPoster)
    }
}

/// Sequences key chords and pointer motion onto an [`EventPoster`].
pub struct Injector {
    poster: Box<dyn EventPoster>,
}

impl Injector {
    pub fn new(poster: Box<dyn EventPoster>) -> Self {
        Self { poster }
    }
}
