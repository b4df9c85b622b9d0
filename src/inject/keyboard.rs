//! Keyboard chords.
//!
//! A chord goes down as: modifiers in canonical order, then the primary key carrying the
//! full modifier flags. It comes up as: the primary key with the same flags, then every
//! modifier that actually went down. The release half runs after a short delay owned by
//! the caller.

use super::{EventFlags, Injector, KeyCode};
use crate::mapping::shortcut::ShortcutBinding;
use tracing::{debug, warn};

/// The keys left down by [`Injector::press_chord`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeldChord {
    pub primary: KeyCode,
    pub flags: EventFlags,
    /// Modifier key codes in press order.
    pub modifiers: Vec<KeyCode>,
}

impl Injector {
    /// Presses the binding's chord.
    ///
    /// Returns `None` if the primary key could not be pressed; any modifiers already down
    /// are released before returning.
    pub fn press_chord(&mut self, binding: &ShortcutBinding) -> Option<HeldChord> {
        let modifiers = binding.effective_modifiers();
        let flags = modifiers.flags();

        let mut held = Vec::new();
        let mut held_flags = EventFlags::empty();
        for modifier in modifiers.iter() {
            let next_flags = held_flags | modifier.flag();
            match self.poster.post_key(modifier.key_code(), true, next_flags) {
                Ok(()) => {
                    held.push(modifier.key_code());
                    held_flags = next_flags;
                }
                Err(e) => warn!("Failed to press modifier {:?}: {}", modifier, e),
            }
        }

        if let Err(e) = self.poster.post_key(binding.key_code, true, flags) {
            warn!(
                "Failed to press key {} for {}: {}",
                binding.key_code, binding.button_id, e
            );
            self.release_modifiers(&held);
            return None;
        }

        debug!(
            "Pressed key {} with flags {:#x} for {}",
            binding.key_code,
            flags.bits(),
            binding.button_id
        );
        Some(HeldChord {
            primary: binding.key_code,
            flags,
            modifiers: held,
        })
    }

    /// Releases a chord. Modifiers are released even if the primary key-up fails.
    pub fn release_chord(&mut self, chord: HeldChord) {
        if let Err(e) = self.poster.post_key(chord.primary, false, chord.flags) {
            warn!("Failed to release key {}: {}", chord.primary, e);
        }
        self.release_modifiers(&chord.modifiers);
        debug!("Released key {}", chord.primary);
    }

    fn release_modifiers(&mut self, modifiers: &[KeyCode]) {
        for code in modifiers.iter().rev() {
            if let Err(e) = self.poster.post_key(*code, false, EventFlags::empty()) {
                warn!("Failed to release modifier key {}: {}", code, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::testing::{Posted, RecordingPoster};
    use crate::mapping::shortcut::{Modifier, Modifiers};

    const KEY_K: KeyCode = 40;
    const CONTROL: KeyCode = 59;
    const SHIFT: KeyCode = 56;

    fn control_shift_k() -> ShortcutBinding {
        ShortcutBinding::new("button_A", KEY_K).with_modifiers(
            Modifiers::NONE
                .with(Modifier::Shift)
                .with(Modifier::Control),
        )
    }

    #[test]
    fn chord_goes_down_in_canonical_order_and_comes_back_up() {
        let poster = RecordingPoster::new();
        let mut injector = Injector::new(Box::new(poster.clone()));

        let chord = injector.press_chord(&control_shift_k()).unwrap();
        injector.release_chord(chord);

        let flags = EventFlags::CONTROL | EventFlags::SHIFT;
        assert_eq!(
            poster.events(),
            vec![
                Posted::Key {
                    code: CONTROL,
                    down: true,
                    flags: EventFlags::CONTROL
                },
                Posted::Key {
                    code: SHIFT,
                    down: true,
                    flags
                },
                Posted::Key {
                    code: KEY_K,
                    down: true,
                    flags
                },
                Posted::Key {
                    code: KEY_K,
                    down: false,
                    flags
                },
                Posted::Key {
                    code: SHIFT,
                    down: false,
                    flags: EventFlags::empty()
                },
                Posted::Key {
                    code: CONTROL,
                    down: false,
                    flags: EventFlags::empty()
                },
            ]
        );
    }

    #[test]
    fn every_pressed_key_is_released_exactly_once() {
        let poster = RecordingPoster::new();
        let mut injector = Injector::new(Box::new(poster.clone()));

        let chord = injector.press_chord(&control_shift_k()).unwrap();
        injector.release_chord(chord);

        let keys = poster.keys();
        for code in [CONTROL, SHIFT, KEY_K] {
            assert_eq!(keys.iter().filter(|k| **k == (code, true)).count(), 1);
            assert_eq!(keys.iter().filter(|k| **k == (code, false)).count(), 1);
        }
    }

    #[test]
    fn failed_primary_releases_modifiers_before_returning() {
        let poster = RecordingPoster::failing_key_down(KEY_K);
        let mut injector = Injector::new(Box::new(poster.clone()));

        assert!(injector.press_chord(&control_shift_k()).is_none());
        assert_eq!(
            poster.keys(),
            vec![
                (CONTROL, true),
                (SHIFT, true),
                (SHIFT, false),
                (CONTROL, false)
            ]
        );
    }

    #[test]
    fn failed_modifier_is_not_released() {
        let poster = RecordingPoster::failing_key_down(SHIFT);
        let mut injector = Injector::new(Box::new(poster.clone()));

        let chord = injector.press_chord(&control_shift_k()).unwrap();
        assert_eq!(chord.modifiers, vec![CONTROL]);
        injector.release_chord(chord);

        assert_eq!(
            poster.keys(),
            vec![(CONTROL, true), (KEY_K, true), (KEY_K, false), (CONTROL, false)]
        );
    }

    #[test]
    fn bare_key_has_no_modifiers_or_flags() {
        let poster = RecordingPoster::new();
        let mut injector = Injector::new(Box::new(poster.clone()));

        let chord = injector
            .press_chord(&ShortcutBinding::new("button_B", KEY_K))
            .unwrap();
        assert!(chord.modifiers.is_empty());
        assert_eq!(chord.flags, EventFlags::empty());
        assert_eq!(poster.keys(), vec![(KEY_K, true)]);
    }
}
