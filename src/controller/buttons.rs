//! Button identifiers and the built-in Switch Pro Controller button set.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const BUTTON_A: &str = "button_A";
pub const BUTTON_B: &str = "button_B";
pub const BUTTON_X: &str = "button_X";
pub const BUTTON_Y: &str = "button_Y";
pub const DPAD_UP: &str = "dpad_up";
pub const DPAD_DOWN: &str = "dpad_down";
pub const DPAD_LEFT: &str = "dpad_left";
pub const DPAD_RIGHT: &str = "dpad_right";
pub const LEFT_SHOULDER: &str = "leftShoulder";
pub const RIGHT_SHOULDER: &str = "rightShoulder";
pub const LEFT_TRIGGER: &str = "leftTrigger";
pub const RIGHT_TRIGGER: &str = "rightTrigger";
pub const LEFT_THUMBSTICK: &str = "leftThumbstickButton";
pub const RIGHT_THUMBSTICK: &str = "rightThumbstickButton";
pub const BUTTON_MENU: &str = "buttonMenu";
pub const BUTTON_OPTIONS: &str = "buttonOptions";
pub const BUTTON_HOME: &str = "buttonHome";
pub const BUTTON_CAPTURE: &str = "buttonCapture";

/// Stable string key for a physical button. Never reused for a different button.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ButtonId(String);

impl ButtonId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        default_entry(&self.0).is_some()
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ButtonId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ButtonId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// Button category
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonCategory {
    Face,
    DPad,
    Shoulder,
    Stick,
    System,
    Other,
}

/// A button known to the registry, with the name shown to the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedButton {
    pub id: ButtonId,
    pub display_name: String,
    pub category: ButtonCategory,
}

impl DetectedButton {
    pub fn new(
        id: impl Into<ButtonId>,
        display_name: impl Into<String>,
        category: ButtonCategory,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            category,
        }
    }

    /// Describes an identifier, using the built-in name when it is a default button.
    pub fn describe(id: &ButtonId) -> Self {
        default_button(id.as_str())
            .unwrap_or_else(|| Self::new(id.clone(), id.as_str(), ButtonCategory::Other))
    }
}

const DEFAULT_BUTTONS: [(&str, &str, ButtonCategory); 18] = [
    (BUTTON_A, "A", ButtonCategory::Face),
    (BUTTON_B, "B", ButtonCategory::Face),
    (BUTTON_X, "X", ButtonCategory::Face),
    (BUTTON_Y, "Y", ButtonCategory::Face),
    (DPAD_UP, "↑", ButtonCategory::DPad),
    (DPAD_DOWN, "↓", ButtonCategory::DPad),
    (DPAD_LEFT, "←", ButtonCategory::DPad),
    (DPAD_RIGHT, "→", ButtonCategory::DPad),
    (LEFT_SHOULDER, "L", ButtonCategory::Shoulder),
    (RIGHT_SHOULDER, "R", ButtonCategory::Shoulder),
    (LEFT_TRIGGER, "ZL", ButtonCategory::Shoulder),
    (RIGHT_TRIGGER, "ZR", ButtonCategory::Shoulder),
    (LEFT_THUMBSTICK, "L3", ButtonCategory::Stick),
    (RIGHT_THUMBSTICK, "R3", ButtonCategory::Stick),
    (BUTTON_MENU, "+", ButtonCategory::System),
    (BUTTON_OPTIONS, "-", ButtonCategory::System),
    (BUTTON_HOME, "Home", ButtonCategory::System),
    (BUTTON_CAPTURE, "Capture", ButtonCategory::System),
];

fn default_entry(id: &str) -> Option<&'static (&'static str, &'static str, ButtonCategory)> {
    DEFAULT_BUTTONS.iter().find(|(default_id, _, _)| *default_id == id)
}

/// The built-in buttons in layout order.
pub fn default_buttons() -> Vec<DetectedButton> {
    DEFAULT_BUTTONS
        .iter()
        .map(|(id, name, category)| DetectedButton::new(*id, *name, *category))
        .collect()
}

pub fn default_button(id: &str) -> Option<DetectedButton> {
    default_entry(id).map(|(id, name, category)| DetectedButton::new(*id, *name, *category))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_is_complete_and_unique() {
        let defaults = default_buttons();
        assert_eq!(defaults.len(), 18);

        let mut ids: Vec<_> = defaults.iter().map(|b| b.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 18);
        assert!(defaults.iter().all(|b| b.id.is_default()));
    }

    #[test]
    fn describe_uses_builtin_names() {
        let capture = DetectedButton::describe(&ButtonId::from(BUTTON_CAPTURE));
        assert_eq!(capture.display_name, "Capture");
        assert_eq!(capture.category, ButtonCategory::System);

        let dpad = DetectedButton::describe(&ButtonId::from(DPAD_LEFT));
        assert_eq!(dpad.display_name, "←");
        assert_eq!(dpad.category, ButtonCategory::DPad);
    }

    #[test]
    fn describe_unknown_identifier_as_other() {
        let id = ButtonId::from("paddle_left");
        let button = DetectedButton::describe(&id);
        assert_eq!(button.display_name, "paddle_left");
        assert_eq!(button.category, ButtonCategory::Other);
        assert!(!id.is_default());
    }
}
