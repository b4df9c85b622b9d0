use super::buttons::ButtonId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Where an edge was observed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeSource {
    Gamepad,
    RawReport,
}

/// A change in a button's pressed state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub id: ButtonId,
    pub pressed: bool,
}

/// Last known pressed state of every button that has reported at least once.
///
/// Buttons that never reported count as released, so an initial "released" snapshot
/// produces no edges.
#[derive(Debug, Default)]
pub struct ButtonStateCache {
    states: HashMap<ButtonId, bool>,
}

impl ButtonStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `pressed` for `id` and returns an edge iff it differs from the cached state.
    pub fn observe(&mut self, id: &ButtonId, pressed: bool) -> Option<Edge> {
        let previous = self.states.insert(id.clone(), pressed).unwrap_or(false);
        (previous != pressed).then(|| Edge {
            id: id.clone(),
            pressed,
        })
    }

    pub fn is_pressed(&self, id: &ButtonId) -> bool {
        self.states.get(id).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_pressed_state_twice_yields_one_edge() {
        let mut cache = ButtonStateCache::new();
        let a = ButtonId::from("button_A");

        assert_eq!(
            cache.observe(&a, true),
            Some(Edge {
                id: a.clone(),
                pressed: true
            })
        );
        assert_eq!(cache.observe(&a, true), None);
        assert!(cache.is_pressed(&a));
    }

    #[test]
    fn release_after_press_is_an_edge() {
        let mut cache = ButtonStateCache::new();
        let b = ButtonId::from("button_B");

        cache.observe(&b, true);
        let edge = cache.observe(&b, false).unwrap();
        assert!(!edge.pressed);
        assert_eq!(cache.observe(&b, false), None);
    }

    #[test]
    fn unseen_button_released_is_not_an_edge() {
        let mut cache = ButtonStateCache::new();
        assert_eq!(cache.observe(&ButtonId::from("dpad_up"), false), None);
    }

    #[test]
    fn buttons_are_tracked_independently() {
        let mut cache = ButtonStateCache::new();
        let x = ButtonId::from("button_X");
        let y = ButtonId::from("button_Y");

        assert!(cache.observe(&x, true).is_some());
        assert!(cache.observe(&y, true).is_some());
        assert!(cache.observe(&x, false).is_some());
        assert!(cache.is_pressed(&y));
    }
}
