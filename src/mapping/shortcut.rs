//! Shortcut bindings and the table that maps buttons to them.

use crate::controller::buttons::ButtonId;
use crate::inject::{EventFlags, KeyCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

// Modifier key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Modifier {
    Control,
    Option,
    Shift,
    Command,
}

impl Modifier {
    /// Order in which modifiers go down before the primary key.
    pub const CANONICAL_ORDER: [Modifier; 4] = [
        Modifier::Control,
        Modifier::Option,
        Modifier::Shift,
        Modifier::Command,
    ];

    /// Virtual key code of the left-hand key.
    pub fn key_code(self) -> KeyCode {
        match self {
            Modifier::Control => 59,
            Modifier::Option => 58,
            Modifier::Shift => 56,
            Modifier::Command => 55,
        }
    }

    pub fn flag(self) -> EventFlags {
        match self {
            Modifier::Control => EventFlags::CONTROL,
            Modifier::Option => EventFlags::OPTION,
            Modifier::Shift => EventFlags::SHIFT,
            Modifier::Command => EventFlags::COMMAND,
        }
    }
}

/// Set of the four modifiers relevant for matching and injection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    pub control: bool,
    pub option: bool,
    pub shift: bool,
    pub command: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        control: false,
        option: false,
        shift: false,
        command: false,
    };

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }

    pub fn contains(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Control => self.control,
            Modifier::Option => self.option,
            Modifier::Shift => self.shift,
            Modifier::Command => self.command,
        }
    }

    pub fn with(mut self, modifier: Modifier) -> Self {
        match modifier {
            Modifier::Control => self.control = true,
            Modifier::Option => self.option = true,
            Modifier::Shift => self.shift = true,
            Modifier::Command => self.command = true,
        }
        self
    }

    /// Members of the set in canonical press order.
    pub fn iter(&self) -> impl Iterator<Item = Modifier> + '_ {
        Modifier::CANONICAL_ORDER
            .into_iter()
            .filter(move |m| self.contains(*m))
    }

    pub fn flags(&self) -> EventFlags {
        self.iter()
            .fold(EventFlags::empty(), |flags, m| flags | m.flag())
    }

    /// Relevant modifiers present in an event's flags; every other bit is ignored.
    pub fn from_flags(flags: EventFlags) -> Self {
        Modifier::CANONICAL_ORDER
            .into_iter()
            .filter(|m| flags.contains(m.flag()))
            .fold(Self::NONE, Self::with)
    }
}

fn enabled_by_default() -> bool {
    true
}

/// Key combination fired when a button is pressed.
///
/// `modifiers` distinguishes "never configured" (`None`) from an explicitly empty set;
/// both inject no modifier keys and both match only keystrokes without modifiers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortcutBinding {
    pub button_id: ButtonId,
    pub key_code: KeyCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifiers: Option<Modifiers>,
}

impl ShortcutBinding {
    pub fn new(button_id: impl Into<ButtonId>, key_code: KeyCode) -> Self {
        Self {
            button_id: button_id.into(),
            key_code,
            description: None,
            enabled: true,
            modifiers: None,
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = Some(modifiers);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Modifiers to inject; `None` behaves like the empty set.
    pub fn effective_modifiers(&self) -> Modifiers {
        self.modifiers.unwrap_or_default()
    }

    /// Exact match on key code and the relevant modifiers of a keystroke.
    pub fn matches(&self, key_code: KeyCode, pressed: Modifiers) -> bool {
        self.key_code == key_code && self.effective_modifiers() == pressed
    }
}

/// Ordered button → shortcut mapping with at most one binding per button.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShortcutTable {
    bindings: Vec<ShortcutBinding>,
}

impl ShortcutTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bindings(bindings: Vec<ShortcutBinding>) -> Self {
        let mut table = Self::new();
        table.replace_all(bindings);
        table
    }

    /// Inserts or replaces the binding for its button, returning the previous one.
    pub fn upsert(&mut self, binding: ShortcutBinding) -> Option<ShortcutBinding> {
        debug!(
            "Upserting shortcut for {}: key {} {:?}",
            binding.button_id, binding.key_code, binding.modifiers
        );
        match self.position(&binding.button_id) {
            Some(index) => Some(std::mem::replace(&mut self.bindings[index], binding)),
            None => {
                self.bindings.push(binding);
                None
            }
        }
    }

    pub fn remove(&mut self, id: &ButtonId) -> Option<ShortcutBinding> {
        self.position(id).map(|index| self.bindings.remove(index))
    }

    /// Replaces the whole table. Later duplicates of a button override earlier ones.
    pub fn replace_all(&mut self, bindings: Vec<ShortcutBinding>) {
        let mut replacement = Self::new();
        for binding in bindings {
            replacement.upsert(binding);
        }
        *self = replacement;
    }

    /// Returns false if the button has no binding.
    pub fn set_enabled(&mut self, id: &ButtonId, enabled: bool) -> bool {
        match self.position(id) {
            Some(index) => {
                self.bindings[index].enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &ButtonId) -> Option<&ShortcutBinding> {
        self.bindings.iter().find(|b| &b.button_id == id)
    }

    /// The binding to fire for a button, if one exists and is enabled.
    pub fn enabled_binding(&self, id: &ButtonId) -> Option<&ShortcutBinding> {
        self.get(id).filter(|b| b.enabled)
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn bindings(&self) -> &[ShortcutBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn position(&self, id: &ButtonId) -> Option<usize> {
        self.bindings.iter().position(|b| &b.button_id == id)
    }
}

/// First enabled binding matching a keystroke.
pub fn find_match(
    bindings: &[ShortcutBinding],
    key_code: KeyCode,
    pressed: Modifiers,
) -> Option<&ShortcutBinding> {
    bindings
        .iter()
        .find(|b| b.enabled && b.matches(key_code, pressed))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_K: KeyCode = 40;
    const KEY_SPACE: KeyCode = 49;

    fn control_shift() -> Modifiers {
        Modifiers::NONE
            .with(Modifier::Control)
            .with(Modifier::Shift)
    }

    #[test]
    fn upsert_keeps_one_binding_per_button() {
        let mut table = ShortcutTable::new();
        assert!(table.upsert(ShortcutBinding::new("button_A", KEY_K)).is_none());

        let previous = table
            .upsert(ShortcutBinding::new("button_A", KEY_SPACE).with_modifiers(control_shift()))
            .unwrap();
        assert_eq!(previous.key_code, KEY_K);

        assert_eq!(table.len(), 1);
        let binding = table.get(&ButtonId::from("button_A")).unwrap();
        assert_eq!(binding.key_code, KEY_SPACE);
        assert_eq!(binding.modifiers, Some(control_shift()));
    }

    #[test]
    fn upsert_preserves_position() {
        let mut table = ShortcutTable::new();
        table.upsert(ShortcutBinding::new("button_A", 0));
        table.upsert(ShortcutBinding::new("button_B", 1));
        table.upsert(ShortcutBinding::new("button_A", 2));

        let order: Vec<_> = table.bindings().iter().map(|b| b.button_id.as_str()).collect();
        assert_eq!(order, ["button_A", "button_B"]);
    }

    #[test]
    fn replace_all_deduplicates() {
        let mut table = ShortcutTable::from_bindings(vec![ShortcutBinding::new("button_X", 1)]);
        table.replace_all(vec![
            ShortcutBinding::new("button_A", 1),
            ShortcutBinding::new("button_B", 2),
            ShortcutBinding::new("button_A", 3),
        ]);

        assert_eq!(table.len(), 2);
        assert!(table.get(&ButtonId::from("button_X")).is_none());
        assert_eq!(table.get(&ButtonId::from("button_A")).unwrap().key_code, 3);
    }

    #[test]
    fn disabled_binding_is_kept_but_not_fired() {
        let mut table = ShortcutTable::new();
        let id = ButtonId::from("button_Y");
        table.upsert(ShortcutBinding::new(id.clone(), KEY_K));

        assert!(table.set_enabled(&id, false));
        assert!(table.get(&id).is_some());
        assert!(table.enabled_binding(&id).is_none());

        assert!(table.set_enabled(&id, true));
        assert!(table.enabled_binding(&id).is_some());
        assert!(!table.set_enabled(&ButtonId::from("nope"), true));
    }

    #[test]
    fn remove_and_clear() {
        let mut table = ShortcutTable::new();
        table.upsert(ShortcutBinding::new("button_A", 1));
        table.upsert(ShortcutBinding::new("button_B", 2));

        assert_eq!(table.remove(&ButtonId::from("button_A")).unwrap().key_code, 1);
        assert!(table.remove(&ButtonId::from("button_A")).is_none());
        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn flags_round_trip_through_modifiers() {
        let flags = control_shift().flags();
        assert_eq!(flags, EventFlags::CONTROL | EventFlags::SHIFT);
        assert_eq!(Modifiers::from_flags(flags), control_shift());

        // Caps lock and the numeric pad bit are not relevant modifiers
        let noisy = flags | EventFlags::from_bits(0x10000 | 0x200000);
        assert_eq!(Modifiers::from_flags(noisy), control_shift());
    }

    #[test]
    fn canonical_iteration_order() {
        let all = Modifiers {
            control: true,
            option: true,
            shift: true,
            command: true,
        };
        let codes: Vec<_> = all.iter().map(Modifier::key_code).collect();
        assert_eq!(codes, [59, 58, 56, 55]);
    }

    #[test]
    fn matching_requires_exact_modifiers() {
        let chord = ShortcutBinding::new("button_A", KEY_K).with_modifiers(control_shift());
        assert!(chord.matches(KEY_K, control_shift()));
        assert!(!chord.matches(KEY_K, Modifiers::NONE.with(Modifier::Control)));
        assert!(!chord.matches(KEY_K, control_shift().with(Modifier::Command)));
        assert!(!chord.matches(KEY_SPACE, control_shift()));
    }

    #[test]
    fn unset_and_empty_modifiers_match_only_bare_keys() {
        let unset = ShortcutBinding::new("button_A", KEY_SPACE);
        let empty = ShortcutBinding::new("button_B", KEY_SPACE).with_modifiers(Modifiers::NONE);

        for binding in [&unset, &empty] {
            assert!(binding.matches(KEY_SPACE, Modifiers::NONE));
            assert!(!binding.matches(KEY_SPACE, Modifiers::NONE.with(Modifier::Shift)));
        }
    }

    #[test]
    fn find_match_skips_disabled_bindings() {
        let bindings = vec![
            ShortcutBinding::new("button_A", KEY_K).disabled(),
            ShortcutBinding::new("button_B", KEY_K),
        ];
        let found = find_match(&bindings, KEY_K, Modifiers::NONE).unwrap();
        assert_eq!(found.button_id.as_str(), "button_B");

        assert!(find_match(&bindings[..1], KEY_K, Modifiers::NONE).is_none());
    }

    #[test]
    fn bindings_survive_toml() {
        #[derive(Serialize, Deserialize)]
        struct Doc {
            shortcuts: Vec<ShortcutBinding>,
        }

        let doc = Doc {
            shortcuts: vec![
                ShortcutBinding::new("button_A", KEY_K)
                    .with_modifiers(control_shift())
                    .with_description("Kill line"),
                ShortcutBinding::new("buttonCapture", KEY_SPACE).disabled(),
            ],
        };
        let text = toml::to_string_pretty(&doc).unwrap();
        let back: Doc = toml::from_str(&text).unwrap();
        assert_eq!(back.shortcuts, doc.shortcuts);
        assert_eq!(back.shortcuts[1].modifiers, None);
    }
}
