//! Tracks pressed keys, the derived modifier mask, and lock-key
//! state, translating inbound `(keysym, pressed)` events into RDP
//! scancode events.

use std::collections::HashSet;

use crate::keymap::{Keymap, ScancodeEntry};

const MOD_SHIFT: u8 = 0x01;
const MOD_CTRL: u8 = 0x02;
const MOD_ALT: u8 = 0x04;
const MOD_SUPER: u8 = 0x08;
const MOD_ALTGR: u8 = 0x10;

const LOCK_CAPS: u8 = 0x01;
const LOCK_NUM: u8 = 0x02;
const LOCK_SCROLL: u8 = 0x04;

fn modifier_bit_for(keysym: u32) -> Option<u8> {
    match keysym {
        0xFFE1 | 0xFFE2 => Some(MOD_SHIFT),   // Shift_L / Shift_R
        0xFFE3 | 0xFFE4 => Some(MOD_CTRL),    // Control_L / Control_R
        0xFFE9 => Some(MOD_ALT),              // Alt_L
        0xFFEA => Some(MOD_ALTGR),            // Alt_R (AltGr on most layouts)
        0xFFEB | 0xFFEC => Some(MOD_SUPER),   // Super_L / Super_R
        _ => None,
    }
}

fn lock_bit_for(keysym: u32) -> Option<u8> {
    match keysym {
        0xFFE5 => Some(LOCK_CAPS),
        0xFF7F => Some(LOCK_NUM),
        0xFF14 => Some(LOCK_SCROLL),
        _ => None,
    }
}

/// The key-state machine: pressed-set, modifier mask, lock mask.
pub struct KeyStateMachine {
    keymap: Keymap,
    pressed: HashSet<u32>,
    press_order: Vec<u32>,
    modifier_mask: u8,
    lock_mask: u8,
}

impl KeyStateMachine {
    #[must_use]
    pub fn new(keymap: Keymap) -> Self {
        Self {
            keymap,
            pressed: HashSet::new(),
            press_order: Vec::new(),
            modifier_mask: 0,
            lock_mask: 0,
        }
    }

    #[must_use]
    pub fn modifier_mask(&self) -> u8 {
        self.modifier_mask
    }

    #[must_use]
    pub fn lock_mask(&self) -> u8 {
        self.lock_mask
    }

    pub fn load_keymap_chain(&mut self, chain: Vec<crate::keymap::KeymapLayer>) {
        self.keymap.load_chain(chain);
    }

    /// Process one inbound key event, returning zero or more
    /// `(scancode, pressed)` pairs to forward over RDP.
    pub fn process(&mut self, keysym: u32, pressed: bool) -> Vec<(ScancodeEntry, bool)> {
        let entry = self.keymap.lookup(keysym);
        if entry.is_undefined() {
            tracing::debug!(keysym, "no scancode mapping for keysym");
            return Vec::new();
        }

        if let Some(lock_bit) = lock_bit_for(keysym) {
            if pressed {
                self.lock_mask ^= lock_bit;
                return vec![(entry, true), (entry, false)];
            }
            return Vec::new();
        }

        self.update_pressed_set(keysym, pressed);
        vec![(entry, pressed)]
    }

    fn update_pressed_set(&mut self, keysym: u32, pressed: bool) {
        if pressed {
            if self.pressed.insert(keysym) {
                self.press_order.push(keysym);
            }
        } else if self.pressed.remove(&keysym) {
            self.press_order.retain(|k| *k != keysym);
        }
        self.recompute_modifier_mask();
    }

    fn recompute_modifier_mask(&mut self) {
        self.modifier_mask =
            self.pressed.iter().filter_map(|k| modifier_bit_for(*k)).fold(0u8, |acc, b| acc | b);
    }

    /// Called at session shutdown: emits a synthetic release for
    /// every keysym still marked pressed, in the reverse order of
    /// press, and clears all state.
    pub fn release_all_on_shutdown(&mut self) -> Vec<(ScancodeEntry, bool)> {
        let releases: Vec<_> = self
            .press_order
            .iter()
            .rev()
            .map(|keysym| (self.keymap.lookup(*keysym), false))
            .collect();
        self.pressed.clear();
        self.press_order.clear();
        self.modifier_mask = 0;
        releases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::us_qwerty_base;

    fn machine() -> KeyStateMachine {
        KeyStateMachine::new(Keymap::new(us_qwerty_base()))
    }

    #[test]
    fn unmapped_keysym_emits_nothing() {
        let mut m = machine();
        assert!(m.process(0x1234_5678, true).is_empty());
    }

    #[test]
    fn ordinary_key_emits_one_matching_event() {
        let mut m = machine();
        let events = m.process(0x0061, true); // 'a'
        assert_eq!(events, vec![(ScancodeEntry::new(0x1E), true)]);
    }

    #[test]
    fn lock_key_press_synthesizes_tap_and_toggles_lock_bit() {
        let mut m = machine();
        let events = m.process(0xFFE5, true); // CapsLock
        assert_eq!(
            events,
            vec![(ScancodeEntry::new(0x3A), true), (ScancodeEntry::new(0x3A), false)]
        );
        assert_eq!(m.lock_mask(), LOCK_CAPS);
    }

    #[test]
    fn lock_key_release_is_ignored() {
        let mut m = machine();
        m.process(0xFFE5, true);
        let events = m.process(0xFFE5, false);
        assert!(events.is_empty());
        assert_eq!(m.lock_mask(), LOCK_CAPS); // unchanged by the release
    }

    #[test]
    fn modifier_mask_tracks_pressed_set() {
        let mut m = machine();
        m.process(0xFFE1, true); // Shift_L
        assert_eq!(m.modifier_mask(), MOD_SHIFT);
        m.process(0xFFE3, true); // Control_L
        assert_eq!(m.modifier_mask(), MOD_SHIFT | MOD_CTRL);
        m.process(0xFFE1, false);
        assert_eq!(m.modifier_mask(), MOD_CTRL);
    }

    #[test]
    fn shutdown_releases_pressed_keys_in_reverse_press_order() {
        let mut m = machine();
        m.process(0x0061, true); // 'a'
        m.process(0x0062, true); // 'b'
        let releases = m.release_all_on_shutdown();
        assert_eq!(
            releases,
            vec![(ScancodeEntry::new(0x30), false), (ScancodeEntry::new(0x1E), false)]
        );
    }

    #[test]
    fn shutdown_with_nothing_pressed_emits_nothing() {
        let mut m = machine();
        assert!(m.release_all_on_shutdown().is_empty());
    }
}
