//! X11 keysym to RDP scancode translation.
//!
//! The display protocol carries X11 keysyms (32-bit, sparse across a
//! roughly 2 MiB range); the RDP wire wants 8-bit XT scancodes plus a
//! flags byte (extended, pause). The base layer is a dense two-level
//! table keyed by the high and low bytes of the keysym, covering the
//! common Latin-1/Unicode BMP range; additional layers for other
//! keyboard languages sit on top as small sparse overrides with a
//! parent pointer, so a lookup walks child to root and the first hit
//! wins.

use std::collections::HashMap;

/// 8-bit scancode flags. `extended` marks keys that use the 0xE0
/// prefix on the wire (arrows, right-hand modifiers, etc).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScancodeFlags {
    pub extended: bool,
    pub pause: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScancodeEntry {
    pub code: u8,
    pub flags: ScancodeFlags,
}

impl ScancodeEntry {
    #[must_use]
    pub fn new(code: u8) -> Self {
        Self { code, flags: ScancodeFlags::default() }
    }

    #[must_use]
    pub fn extended(code: u8) -> Self {
        Self { code, flags: ScancodeFlags { extended: true, pause: false } }
    }

    /// The `(0, 0)` sentinel returned when no layer in the chain
    /// defines a keysym.
    #[must_use]
    pub fn undefined() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        self.code == 0 && self.flags == ScancodeFlags::default()
    }
}

enum LayerStorage {
    /// Dense table over the low 16 bits of the keysym space.
    Dense(Box<[Option<ScancodeEntry>; 65536]>),
    Sparse(HashMap<u32, ScancodeEntry>),
}

/// One layer in a keymap chain.
pub struct KeymapLayer {
    storage: LayerStorage,
}

impl KeymapLayer {
    /// Build the dense base layer from a list of `(keysym, entry)`
    /// pairs. Keysyms above `0xFFFF` are silently dropped — the dense
    /// layer only covers the common BMP range; anything outside it
    /// belongs in a sparse override layer.
    #[must_use]
    pub fn dense(entries: impl IntoIterator<Item = (u32, ScancodeEntry)>) -> Self {
        let mut table: Box<[Option<ScancodeEntry>; 65536]> = vec![None; 65536]
            .into_boxed_slice()
            .try_into()
            .unwrap_or_else(|_| unreachable!("fixed-size allocation"));
        for (keysym, entry) in entries {
            if keysym <= 0xFFFF {
                table[keysym as usize] = Some(entry);
            }
        }
        Self { storage: LayerStorage::Dense(table) }
    }

    /// Build a sparse override layer, for locale-specific keymaps
    /// layered on top of the dense base.
    #[must_use]
    pub fn sparse(entries: impl IntoIterator<Item = (u32, ScancodeEntry)>) -> Self {
        Self { storage: LayerStorage::Sparse(entries.into_iter().collect()) }
    }

    fn lookup(&self, keysym: u32) -> Option<ScancodeEntry> {
        match &self.storage {
            LayerStorage::Dense(table) => {
                if keysym <= 0xFFFF {
                    table[keysym as usize]
                } else {
                    None
                }
            }
            LayerStorage::Sparse(map) => map.get(&keysym).copied(),
        }
    }
}

/// An ordered chain of layers, child-most first, with the base
/// (dense) layer last. `load_chain` atomically replaces the whole
/// chain — a lookup in progress always sees either the old chain or
/// the new one, never a mix.
pub struct Keymap {
    chain: Vec<KeymapLayer>,
}

impl Keymap {
    #[must_use]
    pub fn new(base: KeymapLayer) -> Self {
        Self { chain: vec![base] }
    }

    /// Replace the entire layer chain. `chain[0]` is consulted first.
    pub fn load_chain(&mut self, chain: Vec<KeymapLayer>) {
        self.chain = chain;
    }

    /// Walk the chain child to root, returning the first defined
    /// entry, or the `(0, 0)` sentinel if none match.
    #[must_use]
    pub fn lookup(&self, keysym: u32) -> ScancodeEntry {
        for layer in &self.chain {
            if let Some(entry) = layer.lookup(keysym) {
                return entry;
            }
        }
        ScancodeEntry::undefined()
    }
}

/// A small embedded US QWERTY base keymap covering the keys needed to
/// exercise ordinary text entry: letters, digits, common punctuation,
/// and the editing/whitespace keys. Scancodes are XT Set 1.
#[must_use]
pub fn us_qwerty_base() -> KeymapLayer {
    let letters = [
        (0x0071, 0x10), // q
        (0x0077, 0x11), // w
        (0x0065, 0x12), // e
        (0x0072, 0x13), // r
        (0x0074, 0x14), // t
        (0x0079, 0x15), // y
        (0x0075, 0x16), // u
        (0x0069, 0x17), // i
        (0x006F, 0x18), // o
        (0x0070, 0x19), // p
        (0x0061, 0x1E), // a
        (0x0073, 0x1F), // s
        (0x0064, 0x20), // d
        (0x0066, 0x21), // f
        (0x0067, 0x22), // g
        (0x0068, 0x23), // h
        (0x006A, 0x24), // j
        (0x006B, 0x25), // k
        (0x006C, 0x26), // l
        (0x007A, 0x2C), // z
        (0x0078, 0x2D), // x
        (0x0063, 0x2E), // c
        (0x0076, 0x2F), // v
        (0x0062, 0x30), // b
        (0x006E, 0x31), // n
        (0x006D, 0x32), // m
    ];

    let digits = [
        (0x0031, 0x02), // 1
        (0x0032, 0x03), // 2
        (0x0033, 0x04), // 3
        (0x0034, 0x05), // 4
        (0x0035, 0x06), // 5
        (0x0036, 0x07), // 6
        (0x0037, 0x08), // 7
        (0x0038, 0x09), // 8
        (0x0039, 0x0A), // 9
        (0x0030, 0x0B), // 0
    ];

    let mut entries: Vec<(u32, ScancodeEntry)> = letters
        .into_iter()
        .chain(digits)
        .map(|(keysym, code)| (keysym, ScancodeEntry::new(code)))
        .collect();

    entries.extend([
        (0xFF1B, ScancodeEntry::new(0x01)), // Escape
        (0xFF08, ScancodeEntry::new(0x0E)), // BackSpace
        (0xFF09, ScancodeEntry::new(0x0F)), // Tab
        (0xFF0D, ScancodeEntry::new(0x1C)), // Return
        (0x0020, ScancodeEntry::new(0x39)), // Space
        (0xFFE1, ScancodeEntry::new(0x2A)), // Shift_L
        (0xFFE2, ScancodeEntry::new(0x36)), // Shift_R
        (0xFFE3, ScancodeEntry::new(0x1D)), // Control_L
        (0xFFE4, ScancodeEntry::extended(0x1D)), // Control_R
        (0xFFE9, ScancodeEntry::new(0x38)), // Alt_L
        (0xFFEA, ScancodeEntry::extended(0x38)), // Alt_R
        (0xFFE5, ScancodeEntry::new(0x3A)), // Caps_Lock
        (0xFF7F, ScancodeEntry::extended(0x45)), // Num_Lock
        (0xFF14, ScancodeEntry::new(0x46)), // Scroll_Lock
        (0xFF51, ScancodeEntry::extended(0x4B)), // Left
        (0xFF52, ScancodeEntry::extended(0x48)), // Up
        (0xFF53, ScancodeEntry::extended(0x4D)), // Right
        (0xFF54, ScancodeEntry::extended(0x50)), // Down
        (0xFFBE, ScancodeEntry::new(0x3B)), // F1
        (0xFFBF, ScancodeEntry::new(0x3C)), // F2
    ]);

    KeymapLayer::dense(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_layer_resolves_known_keysym() {
        let keymap = Keymap::new(us_qwerty_base());
        assert_eq!(keymap.lookup(0x0061), ScancodeEntry::new(0x1E)); // 'a'
    }

    #[test]
    fn unknown_keysym_is_undefined() {
        let keymap = Keymap::new(us_qwerty_base());
        assert!(keymap.lookup(0x1234_5678).is_undefined());
    }

    #[test]
    fn child_layer_overrides_parent_at_same_keysym() {
        let parent = us_qwerty_base();
        let child = KeymapLayer::sparse([(0x0061, ScancodeEntry::new(0x99))]);
        let mut keymap = Keymap::new(parent);
        keymap.load_chain(vec![child, us_qwerty_base()]);

        assert_eq!(keymap.lookup(0x0061), ScancodeEntry::new(0x99));
        // 'b' is untouched by the child, falls through to the parent.
        assert_eq!(keymap.lookup(0x0062), ScancodeEntry::new(0x30));
    }

    #[test]
    fn chain_replacement_is_wholesale_not_merged() {
        let mut keymap = Keymap::new(us_qwerty_base());
        keymap.load_chain(vec![KeymapLayer::sparse([(0x0061, ScancodeEntry::new(0x01))])]);
        // The base layer is gone entirely; 'b' is no longer mapped.
        assert!(keymap.lookup(0x0062).is_undefined());
    }
}
