//! Analog stick sampling: deadzone, sensitivity and pointer/scroll injection.
//!
//! The loop is driven by the engine's fixed-rate tick. Each tick it asks a
//! [`DeviceProbe`] for the active device's sticks; `None` means nothing is enumerated.

use crate::config::AnalogSettings;
use crate::inject::Injector;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalogSample {
    pub x: f32,
    pub y: f32,
}

impl AnalogSample {
    pub const ZERO: AnalogSample = AnalogSample { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    pub fn with_deadzone(self, deadzone: f32) -> Self {
        Self {
            x: apply_deadzone(self.x, deadzone),
            y: apply_deadzone(self.y, deadzone),
        }
    }
}

/// Both sticks of one device at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StickSnapshot {
    pub left: AnalogSample,
    pub right: AnalogSample,
}

// Applies deadzone to a single axis value
pub fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        value
    }
}

/// Source of the active device's stick values.
pub trait DeviceProbe: Send {
    /// Current sticks of the active device, or `None` if no device is enumerated.
    fn probe(&mut self) -> Option<StickSnapshot>;
}

/// Probe reading the snapshot published by the gamepad collector.
pub struct WatchProbe(watch::Receiver<Option<StickSnapshot>>);

impl WatchProbe {
    pub fn new(receiver: watch::Receiver<Option<StickSnapshot>>) -> Self {
        Self(receiver)
    }
}

impl DeviceProbe for WatchProbe {
    fn probe(&mut self) -> Option<StickSnapshot> {
        *self.0.borrow()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stick {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollInversion {
    pub vertical: bool,
    pub horizontal: bool,
}

/// Per-user tuning read on every tick.
pub trait Profile: Send + Sync {
    fn stick_sensitivity(&self, stick: Stick) -> f32;
    fn scroll_inversion(&self) -> ScrollInversion;
    /// Virtual mouse button held while the left stick moves, if any.
    fn held_mouse_button(&self) -> Option<MouseButton>;
}

/// [`Profile`] that the host can update while the engine runs.
#[derive(Debug)]
pub struct SharedProfile {
    left_sensitivity: AtomicU32,
    right_sensitivity: AtomicU32,
    invert_vertical: AtomicBool,
    invert_horizontal: AtomicBool,
    held_button: AtomicU8,
}

const NO_BUTTON: u8 = 0;
const LEFT_BUTTON: u8 = 1;
const RIGHT_BUTTON: u8 = 2;

impl SharedProfile {
    pub fn new(sensitivity: f32, inversion: ScrollInversion) -> Self {
        Self {
            left_sensitivity: AtomicU32::new(sensitivity.to_bits()),
            right_sensitivity: AtomicU32::new(sensitivity.to_bits()),
            invert_vertical: AtomicBool::new(inversion.vertical),
            invert_horizontal: AtomicBool::new(inversion.horizontal),
            held_button: AtomicU8::new(NO_BUTTON),
        }
    }

    pub fn from_settings(settings: &AnalogSettings) -> Self {
        Self::new(
            settings.default_sensitivity,
            ScrollInversion {
                vertical: settings.invert_scroll_vertical,
                horizontal: settings.invert_scroll_horizontal,
            },
        )
    }

    pub fn set_sensitivity(&self, stick: Stick, sensitivity: f32) {
        let slot = match stick {
            Stick::Left => &self.left_sensitivity,
            Stick::Right => &self.right_sensitivity,
        };
        slot.store(sensitivity.to_bits(), Ordering::Relaxed);
    }

    pub fn set_scroll_inversion(&self, inversion: ScrollInversion) {
        self.invert_vertical
            .store(inversion.vertical, Ordering::Relaxed);
        self.invert_horizontal
            .store(inversion.horizontal, Ordering::Relaxed);
    }

    pub fn set_held_mouse_button(&self, button: Option<MouseButton>) {
        let value = match button {
            None => NO_BUTTON,
            Some(MouseButton::Left) => LEFT_BUTTON,
            Some(MouseButton::Right) => RIGHT_BUTTON,
        };
        self.held_button.store(value, Ordering::Relaxed);
    }
}

impl Default for SharedProfile {
    fn default() -> Self {
        Self::from_settings(&AnalogSettings::default())
    }
}

impl Profile for SharedProfile {
    fn stick_sensitivity(&self, stick: Stick) -> f32 {
        let slot = match stick {
            Stick::Left => &self.left_sensitivity,
            Stick::Right => &self.right_sensitivity,
        };
        f32::from_bits(slot.load(Ordering::Relaxed))
    }

    fn scroll_inversion(&self) -> ScrollInversion {
        ScrollInversion {
            vertical: self.invert_vertical.load(Ordering::Relaxed),
            horizontal: self.invert_horizontal.load(Ordering::Relaxed),
        }
    }

    fn held_mouse_button(&self) -> Option<MouseButton> {
        match self.held_button.load(Ordering::Relaxed) {
            LEFT_BUTTON => Some(MouseButton::Left),
            RIGHT_BUTTON => Some(MouseButton::Right),
            _ => None,
        }
    }
}

/// Pointer delta for a processed left stick. Stick up moves the pointer up.
pub fn pointer_delta(left: AnalogSample, sensitivity: f32, settings: &AnalogSettings) -> (f32, f32) {
    (
        left.x * sensitivity * settings.pointer_multiplier_x,
        -left.y * sensitivity * settings.pointer_multiplier_y,
    )
}

/// Scroll delta for a processed right stick, before sub-pixel accumulation.
pub fn scroll_delta(
    right: AnalogSample,
    sensitivity: f32,
    inversion: ScrollInversion,
    settings: &AnalogSettings,
) -> (f32, f32) {
    let mut dx = right.x * sensitivity * settings.scroll_multiplier_x;
    let mut dy = -right.y * sensitivity * settings.scroll_multiplier_y;
    if inversion.horizontal {
        dx = -dx;
    }
    if inversion.vertical {
        dy = -dy;
    }
    (dx, dy)
}

// Carries fractional scroll pixels between ticks
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct ScrollCarry {
    x: f32,
    y: f32,
}

impl ScrollCarry {
    fn take_whole(&mut self, dx: f32, dy: f32) -> (f32, f32) {
        self.x += dx;
        self.y += dy;
        let whole = (self.x.trunc(), self.y.trunc());
        self.x -= whole.0;
        self.y -= whole.1;
        whole
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionChange {
    Connected,
    Disconnected,
}

/// State of the fixed-rate sampling loop.
#[derive(Debug)]
pub struct AnalogLoop {
    settings: AnalogSettings,
    connected: bool,
    sticks: StickSnapshot,
    carry: ScrollCarry,
}

impl AnalogLoop {
    pub fn new(settings: AnalogSettings) -> Self {
        Self {
            settings,
            connected: false,
            sticks: StickSnapshot::default(),
            carry: ScrollCarry::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Last processed stick values.
    pub fn sticks(&self) -> StickSnapshot {
        self.sticks
    }

    /// Runs one tick. Injection happens only while `enabled`.
    pub fn tick(
        &mut self,
        probe: Option<StickSnapshot>,
        enabled: bool,
        profile: &dyn Profile,
        injector: &mut Injector,
    ) -> Option<ConnectionChange> {
        let Some(raw) = probe else {
            if !self.connected {
                return None;
            }
            self.connected = false;
            self.sticks = StickSnapshot::default();
            self.carry = ScrollCarry::default();
            return Some(ConnectionChange::Disconnected);
        };

        let change = (!self.connected).then(|| {
            self.connected = true;
            ConnectionChange::Connected
        });

        let deadzone = self.settings.deadzone;
        self.sticks = StickSnapshot {
            left: raw.left.with_deadzone(deadzone),
            right: raw.right.with_deadzone(deadzone),
        };

        if enabled {
            self.drive_pointer(profile, injector);
            self.drive_scroll(profile, injector);
        }
        change
    }

    fn drive_pointer(&mut self, profile: &dyn Profile, injector: &mut Injector) {
        let left = self.sticks.left;
        if left.is_zero() {
            return;
        }

        let (dx, dy) = pointer_delta(
            left,
            profile.stick_sensitivity(Stick::Left),
            &self.settings,
        );
        let (dx, dy) = (f64::from(dx), f64::from(dy));
        let result = match profile.held_mouse_button() {
            None => injector.move_cursor(dx, dy),
            Some(MouseButton::Left) => injector.move_cursor_while_left_held(dx, dy),
            Some(MouseButton::Right) => injector.move_cursor_while_right_held(dx, dy),
        };
        if let Err(e) = result {
            debug!("Pointer injection failed: {}", e);
        }
    }

    fn drive_scroll(&mut self, profile: &dyn Profile, injector: &mut Injector) {
        let right = self.sticks.right;
        if right.is_zero() {
            self.carry = ScrollCarry::default();
            return;
        }

        let (dx, dy) = scroll_delta(
            right,
            profile.stick_sensitivity(Stick::Right),
            profile.scroll_inversion(),
            &self.settings,
        );
        let (dx, dy) = self.carry.take_whole(dx, dy);
        if let Err(e) = injector.scroll(f64::from(dx), f64::from(dy)) {
            warn!("Scroll injection failed: {}", e);
        }
    }
}
