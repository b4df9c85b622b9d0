use super::analog::{AnalogSample, StickSnapshot};
use super::buttons::{self, ButtonId};
use super::state_cache::EdgeSource;
use super::{ButtonReport, SourceRegistration};
use crate::engine::EngineEvent;
use chrono::Local;
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs};
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const POLL_TIMEOUT: Duration = Duration::from_millis(5);

// Buttons enumerated on every value change
const TRACKED_BUTTONS: [(Button, &str); 17] = [
    (Button::South, buttons::BUTTON_A),
    (Button::East, buttons::BUTTON_B),
    (Button::West, buttons::BUTTON_X),
    (Button::North, buttons::BUTTON_Y),
    (Button::DPadUp, buttons::DPAD_UP),
    (Button::DPadDown, buttons::DPAD_DOWN),
    (Button::DPadLeft, buttons::DPAD_LEFT),
    (Button::DPadRight, buttons::DPAD_RIGHT),
    (Button::LeftTrigger, buttons::LEFT_SHOULDER),
    (Button::RightTrigger, buttons::RIGHT_SHOULDER),
    (Button::LeftTrigger2, buttons::LEFT_TRIGGER),
    (Button::RightTrigger2, buttons::RIGHT_TRIGGER),
    (Button::LeftThumb, buttons::LEFT_THUMBSTICK),
    (Button::RightThumb, buttons::RIGHT_THUMBSTICK),
    (Button::Start, buttons::BUTTON_MENU),
    (Button::Select, buttons::BUTTON_OPTIONS),
    (Button::Mode, buttons::BUTTON_HOME),
];

/// Identifier for a gilrs button, if it is one we track.
pub fn map_button(button: Button) -> Option<ButtonId> {
    TRACKED_BUTTONS
        .iter()
        .find(|(tracked, _)| *tracked == button)
        .map(|(_, id)| ButtonId::from(*id))
}

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize gilrs: {0}")]
    Initialization(String),

    #[error("Failed to start collector thread: {0}")]
    Thread(#[from] std::io::Error),
}

#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
pub struct PadCollector<S: CollectionState> {
    // Gilrs context
    gilrs: Gilrs,

    // Device whose buttons and sticks are reported
    active_gamepad: Option<GamepadId>,

    events: mpsc::Sender<EngineEvent>,
    sticks: watch::Sender<Option<StickSnapshot>>,
    cancel: CancellationToken,
}

impl PadCollector<Initializing> {
    pub fn create(
        events: mpsc::Sender<EngineEvent>,
        sticks: watch::Sender<Option<StickSnapshot>>,
        cancel: CancellationToken,
    ) -> Result<Self, CollectorError> {
        info!("Initializing gilrs controller interface");
        let gilrs = Gilrs::new().map_err(|e| {
            error!("Failed to initialize gilrs: {}", e);
            CollectorError::Initialization(e.to_string())
        })?;

        Ok(Self::new(gilrs, None, events, sticks, cancel))
    }

    pub fn initialize(mut self) -> PadCollector<Collecting> {
        let count = self.gilrs.gamepads().count();
        if count == 0 {
            info!("No controller connected, waiting for one");
        } else {
            info!("Found {} controller(s)", count);
            for (id, gamepad) in self.gilrs.gamepads() {
                info!("  ID: {}, Name: {}, UUID: {:?}", id, gamepad.name(), gamepad.uuid());
            }
        }
        self.select_active_gamepad();

        info!("Gamepad collector initialized, transitioning to Collecting state");
        self.transition()
    }
}

impl PadCollector<Collecting> {
    pub fn run_collection_loop(&mut self) {
        info!("Starting gamepad collection loop");

        let mut event_count: u64 = 0;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(10);

        while !self.cancel.is_cancelled() {
            if let Some(Event { id, event, .. }) = self.gilrs.next_event_blocking(Some(POLL_TIMEOUT)) {
                event_count += 1;
                if !self.handle_event(id, event) {
                    break;
                }
            }

            self.publish_sticks();

            let now = Local::now();
            if now - last_log_time > log_interval {
                debug!(
                    "Gamepad collector stats: {} events in last {} seconds",
                    event_count,
                    log_interval.num_seconds()
                );
                event_count = 0;
                last_log_time = now;
            }
        }

        let _ = self.sticks.send(None);
        info!("Gamepad collection loop stopped");
    }

    // Returns false once the engine is gone
    fn handle_event(&mut self, id: GamepadId, event: EventType) -> bool {
        match event {
            EventType::Connected => {
                info!("Controller {} connected", id);
                self.select_active_gamepad();
                return true;
            }
            EventType::Disconnected => {
                warn!("Controller {} disconnected", id);
                if self.active_gamepad == Some(id) {
                    self.active_gamepad = None;
                }
                self.select_active_gamepad();
                return true;
            }
            EventType::ButtonPressed(..)
            | EventType::ButtonReleased(..)
            | EventType::ButtonChanged(..) => {}
            _ => return true,
        }

        if self.active_gamepad != Some(id) {
            return true;
        }

        let report = self.button_snapshot(id);
        self.events
            .blocking_send(EngineEvent::Buttons(report))
            .is_ok()
    }

    fn button_snapshot(&self, id: GamepadId) -> ButtonReport {
        let gamepad = self.gilrs.gamepad(id);
        ButtonReport {
            source: EdgeSource::Gamepad,
            states: TRACKED_BUTTONS
                .iter()
                .map(|(button, name)| (ButtonId::from(*name), gamepad.is_pressed(*button)))
                .collect(),
        }
    }

    fn publish_sticks(&mut self) {
        // Connection events can be missed, so enumeration is polled too
        let gilrs = &self.gilrs;
        if needs_selection(self.active_gamepad, |id| gilrs.connected_gamepad(id).is_some()) {
            self.select_active_gamepad();
        }

        let snapshot = self
            .active_gamepad
            .and_then(|id| self.gilrs.connected_gamepad(id))
            .map(|gamepad| StickSnapshot {
                left: AnalogSample::new(gamepad.value(Axis::LeftStickX), gamepad.value(Axis::LeftStickY)),
                right: AnalogSample::new(
                    gamepad.value(Axis::RightStickX),
                    gamepad.value(Axis::RightStickY),
                ),
            });
        self.sticks.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

impl<S: CollectionState> PadCollector<S> {
    // First enumerated device becomes active
    fn select_active_gamepad(&mut self) {
        if let Some(id) = self.active_gamepad {
            if self.gilrs.connected_gamepad(id).is_some() {
                return;
            }
        }
        self.active_gamepad = self.gilrs.gamepads().next().map(|(id, gamepad)| {
            info!("Selected controller: {} ({})", gamepad.name(), id);
            id
        });
    }
}

// True when there is no active device or it is no longer connected
fn needs_selection<T: Copy>(active: Option<T>, is_connected: impl Fn(T) -> bool) -> bool {
    !active.is_some_and(is_connected)
}

/// Starts the collector thread. The returned receiver carries the active device's
/// sticks, or `None` while no device is enumerated.
pub fn spawn(
    events: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
) -> Result<(SourceRegistration, watch::Receiver<Option<StickSnapshot>>), CollectorError> {
    let (sticks_tx, sticks_rx) = watch::channel(None);

    let thread_cancel = cancel.clone();
    let thread = std::thread::Builder::new()
        .name("padpilot-gamepad".into())
        .spawn(move || {
            // Gilrs stays on this thread
            match PadCollector::create(events, sticks_tx, thread_cancel) {
                Ok(collector) => collector.initialize().run_collection_loop(),
                Err(e) => error!("Gamepad collector unavailable: {}", e),
            }
        })?;

    info!("Gamepad collector started");
    Ok((SourceRegistration::new("Gamepad", cancel, thread), sticks_rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_tracked_button() {
        assert_eq!(map_button(Button::South), Some(ButtonId::from(buttons::BUTTON_A)));
        assert_eq!(
            map_button(Button::LeftTrigger2),
            Some(ButtonId::from(buttons::LEFT_TRIGGER))
        );
        assert_eq!(map_button(Button::Mode), Some(ButtonId::from(buttons::BUTTON_HOME)));
        assert_eq!(map_button(Button::C), None);
    }

    #[test]
    fn reselects_when_no_device_is_active() {
        let connected = |id: usize| id == 1;
        assert!(needs_selection(None, connected));
        assert!(needs_selection(Some(0), connected));
        assert!(!needs_selection(Some(1), connected));
    }

    #[test]
    fn tracked_buttons_are_defaults_except_capture() {
        for (_, id) in TRACKED_BUTTONS {
            assert!(ButtonId::from(id).is_default(), "{id} is not a default button");
        }
        assert!(map_button(Button::Unknown).is_none());
        assert!(!TRACKED_BUTTONS
            .iter()
            .any(|(_, id)| *id == buttons::BUTTON_CAPTURE));
    }
}
