use crate::controller::buttons::{default_buttons, ButtonId, DetectedButton};
use tracing::{debug, info};

/// Ordered set of known buttons: the built-in set plus anything learned.
///
/// Built-in buttons can be renamed but never removed.
#[derive(Clone, Debug, PartialEq)]
pub struct ButtonRegistry {
    buttons: Vec<DetectedButton>,
}

impl Default for ButtonRegistry {
    fn default() -> Self {
        Self {
            buttons: default_buttons(),
        }
    }
}

impl ButtonRegistry {
    /// Builds a registry from persisted buttons, appending any missing built-in buttons.
    ///
    /// The flag is true when built-ins were added and the result should be persisted.
    pub fn from_persisted(persisted: Vec<DetectedButton>) -> (Self, bool) {
        let mut registry = Self {
            buttons: Vec::with_capacity(persisted.len()),
        };
        for button in persisted {
            registry.register(button);
        }

        let mut added = false;
        for button in default_buttons() {
            if !registry.contains(&button.id) {
                debug!("Adding missing default button {}", button.id);
                registry.buttons.push(button);
                added = true;
            }
        }
        (registry, added)
    }

    /// Adds a button unless its identifier is already known.
    pub fn register(&mut self, button: DetectedButton) -> bool {
        if self.contains(&button.id) {
            return false;
        }
        info!("Registered button {} ({})", button.id, button.display_name);
        self.buttons.push(button);
        true
    }

    pub fn rename(&mut self, id: &ButtonId, display_name: impl Into<String>) -> bool {
        match self.buttons.iter_mut().find(|b| &b.id == id) {
            Some(button) => {
                button.display_name = display_name.into();
                true
            }
            None => false,
        }
    }

    /// Removes a learned button. Built-in and unknown identifiers are left alone.
    pub fn remove(&mut self, id: &ButtonId) -> bool {
        if id.is_default() {
            debug!("Refusing to remove default button {}", id);
            return false;
        }
        let before = self.buttons.len();
        self.buttons.retain(|b| &b.id != id);
        before != self.buttons.len()
    }

    /// Drops every learned button, keeping the built-in set.
    pub fn clear_custom(&mut self) -> bool {
        let before = self.buttons.len();
        self.buttons.retain(|b| b.id.is_default());
        before != self.buttons.len()
    }

    pub fn contains(&self, id: &ButtonId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: &ButtonId) -> Option<&DetectedButton> {
        self.buttons.iter().find(|b| &b.id == id)
    }

    pub fn buttons(&self) -> &[DetectedButton] {
        &self.buttons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::buttons::{ButtonCategory, BUTTON_A};

    fn paddle() -> DetectedButton {
        DetectedButton::new("paddle_left", "Left paddle", ButtonCategory::Other)
    }

    #[test]
    fn defaults_are_always_present() {
        let (registry, added) = ButtonRegistry::from_persisted(vec![paddle()]);
        assert!(added);
        assert_eq!(registry.buttons().len(), 19);
        assert_eq!(registry.buttons()[0], paddle());

        let (reloaded, added) = ButtonRegistry::from_persisted(registry.buttons().to_vec());
        assert!(!added);
        assert_eq!(reloaded, registry);
    }

    #[test]
    fn removing_learned_button_succeeds() {
        let mut registry = ButtonRegistry::default();
        assert!(registry.register(paddle()));
        assert!(!registry.register(paddle()));

        assert!(registry.remove(&ButtonId::from("paddle_left")));
        assert!(!registry.contains(&ButtonId::from("paddle_left")));
    }

    #[test]
    fn removing_default_is_a_noop() {
        let mut registry = ButtonRegistry::default();
        assert!(!registry.remove(&ButtonId::from(BUTTON_A)));
        assert_eq!(registry.buttons().len(), 18);
    }

    #[test]
    fn rename_keeps_identifier() {
        let mut registry = ButtonRegistry::default();
        let id = ButtonId::from(BUTTON_A);
        assert!(registry.rename(&id, "Confirm"));
        assert_eq!(registry.get(&id).unwrap().display_name, "Confirm");
        assert!(!registry.rename(&ButtonId::from("ghost"), "Boo"));
    }

    #[test]
    fn clear_custom_keeps_defaults() {
        let mut registry = ButtonRegistry::default();
        assert!(!registry.clear_custom());
        registry.register(paddle());
        assert!(registry.clear_custom());
        assert_eq!(registry, ButtonRegistry::default());
    }
}
