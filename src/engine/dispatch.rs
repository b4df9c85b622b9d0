//! Button edge → detection or shortcut decision.

use crate::controller::buttons::{ButtonId, DetectedButton};
use crate::controller::state_cache::{ButtonStateCache, Edge};
use crate::mapping::shortcut::{ShortcutBinding, ShortcutTable};
use chrono::{DateTime, Local};
use tracing::{debug, info};

pub const DETECTION_PROMPT: &str = "Press a button on the controller...";

/// Learning-mode state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Detection {
    pub active: bool,
    pub message: String,
    pub last_detected: Option<DetectedButton>,
    pub detected_at: Option<DateTime<Local>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Ignore,
    Detected(DetectedButton),
    Fire(ShortcutBinding),
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    cache: ButtonStateCache,
    detection: Detection,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, id: &ButtonId, pressed: bool) -> Option<Edge> {
        self.cache.observe(id, pressed)
    }

    /// Decides what a press edge does. Release edges never do anything.
    ///
    /// In learning mode presses are recorded instead of dispatched, whether or not the
    /// controller is enabled.
    pub fn decide(&mut self, edge: &Edge, enabled: bool, table: &ShortcutTable) -> Decision {
        if !edge.pressed {
            return Decision::Ignore;
        }

        if self.detection.active {
            let button = DetectedButton::describe(&edge.id);
            info!("Detected {} ({})", button.display_name, button.id);
            self.detection.message = format!("Detected: {}", button.display_name);
            self.detection.last_detected = Some(button.clone());
            self.detection.detected_at = Some(Local::now());
            return Decision::Detected(button);
        }

        if !enabled {
            debug!("Controller disabled, ignoring {}", edge.id);
            return Decision::Ignore;
        }

        match table.enabled_binding(&edge.id) {
            Some(binding) => Decision::Fire(binding.clone()),
            None => {
                debug!("No enabled shortcut for {}", edge.id);
                Decision::Ignore
            }
        }
    }

    pub fn start_detection(&mut self) {
        info!("Button detection started");
        self.detection.active = true;
        self.detection.message = DETECTION_PROMPT.to_string();
        self.detection.last_detected = None;
        self.detection.detected_at = None;
    }

    pub fn stop_detection(&mut self) {
        info!("Button detection stopped");
        self.detection.active = false;
        self.detection.message.clear();
    }

    pub fn detection(&self) -> &Detection {
        &self.detection
    }
}
