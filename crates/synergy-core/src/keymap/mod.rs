//! Key identity types and the layout-derived key map.
//!
//! The canonical representation on the wire is a [`KeyId`]: the Unicode code
//! point for printable keys, and a private 0xEF00–0xEFFF range for
//! non-character keys (function keys, arrows, modifiers).  A [`KeyButton`]
//! identifies a physical key on the local keyboard; button 0 is reserved as
//! "unknown".  The [`KeyMap`] translates from what the server wants (a KeyID
//! under a modifier mask) to the physical keystrokes that produce it on the
//! local layout.

pub mod engine;
pub mod us_ascii;

use std::collections::HashMap;

use thiserror::Error;

// ── KeyId ─────────────────────────────────────────────────────────────────────

/// Logical key identifier: a Unicode BMP code point, or a private-range value
/// for non-character keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(pub u16);

impl KeyId {
    /// Start of the private range for non-character keys.
    pub const PRIVATE_START: u16 = 0xEF00;

    pub const TAB: KeyId = KeyId(0xEF09);
    pub const RETURN: KeyId = KeyId(0xEF0D);
    pub const ESCAPE: KeyId = KeyId(0xEF1B);
    pub const BACKSPACE: KeyId = KeyId(0xEF08);
    pub const DELETE: KeyId = KeyId(0xEFFF);
    pub const HOME: KeyId = KeyId(0xEF50);
    pub const LEFT: KeyId = KeyId(0xEF51);
    pub const UP: KeyId = KeyId(0xEF52);
    pub const RIGHT: KeyId = KeyId(0xEF53);
    pub const DOWN: KeyId = KeyId(0xEF54);
    pub const PAGE_UP: KeyId = KeyId(0xEF55);
    pub const PAGE_DOWN: KeyId = KeyId(0xEF56);
    pub const END: KeyId = KeyId(0xEF57);
    pub const INSERT: KeyId = KeyId(0xEF63);
    pub const F1: KeyId = KeyId(0xEFBE);
    pub const F2: KeyId = KeyId(0xEFBF);
    pub const F3: KeyId = KeyId(0xEFC0);
    pub const F4: KeyId = KeyId(0xEFC1);
    pub const F5: KeyId = KeyId(0xEFC2);
    pub const F6: KeyId = KeyId(0xEFC3);
    pub const F7: KeyId = KeyId(0xEFC4);
    pub const F8: KeyId = KeyId(0xEFC5);
    pub const F9: KeyId = KeyId(0xEFC6);
    pub const F10: KeyId = KeyId(0xEFC7);
    pub const F11: KeyId = KeyId(0xEFC8);
    pub const F12: KeyId = KeyId(0xEFC9);

    pub const SHIFT_L: KeyId = KeyId(0xEFE1);
    pub const SHIFT_R: KeyId = KeyId(0xEFE2);
    pub const CONTROL_L: KeyId = KeyId(0xEFE3);
    pub const CONTROL_R: KeyId = KeyId(0xEFE4);
    pub const CAPS_LOCK: KeyId = KeyId(0xEFE5);
    pub const META_L: KeyId = KeyId(0xEFE7);
    pub const META_R: KeyId = KeyId(0xEFE8);
    pub const ALT_L: KeyId = KeyId(0xEFE9);
    pub const ALT_R: KeyId = KeyId(0xEFEA);
    pub const SUPER_L: KeyId = KeyId(0xEFEB);
    pub const SUPER_R: KeyId = KeyId(0xEFEC);
    pub const ALT_GR: KeyId = KeyId(0xEFED);
    pub const NUM_LOCK: KeyId = KeyId(0xEF7F);
    pub const SCROLL_LOCK: KeyId = KeyId(0xEF14);

    /// Builds a `KeyId` from a printable character, if it fits the BMP.
    pub fn from_char(c: char) -> Option<KeyId> {
        let cp = c as u32;
        if cp <= u16::MAX as u32 {
            Some(KeyId(cp as u16))
        } else {
            None
        }
    }

    /// Returns the modifier bit this key asserts, if it is a modifier key.
    pub fn modifier_bit(self) -> Option<ModifierMask> {
        match self {
            KeyId::SHIFT_L | KeyId::SHIFT_R => Some(ModifierMask::SHIFT),
            KeyId::CONTROL_L | KeyId::CONTROL_R => Some(ModifierMask::CONTROL),
            KeyId::ALT_L | KeyId::ALT_R => Some(ModifierMask::ALT),
            KeyId::META_L | KeyId::META_R => Some(ModifierMask::META),
            KeyId::SUPER_L | KeyId::SUPER_R => Some(ModifierMask::SUPER),
            KeyId::ALT_GR => Some(ModifierMask::ALT_GR),
            KeyId::CAPS_LOCK => Some(ModifierMask::CAPS_LOCK),
            KeyId::NUM_LOCK => Some(ModifierMask::NUM_LOCK),
            KeyId::SCROLL_LOCK => Some(ModifierMask::SCROLL_LOCK),
            _ => None,
        }
    }
}

// ── KeyButton ─────────────────────────────────────────────────────────────────

/// Opaque handle for a physical key; 0 is reserved as "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyButton(pub u16);

impl KeyButton {
    pub const NONE: KeyButton = KeyButton(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

// ── ModifierMask ──────────────────────────────────────────────────────────────

/// Bitmask of modifier flags as carried in key and enter messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModifierMask(pub u16);

impl ModifierMask {
    pub const NONE: ModifierMask = ModifierMask(0);
    pub const SHIFT: ModifierMask = ModifierMask(0x0001);
    pub const CONTROL: ModifierMask = ModifierMask(0x0002);
    pub const ALT: ModifierMask = ModifierMask(0x0004);
    pub const META: ModifierMask = ModifierMask(0x0008);
    pub const SUPER: ModifierMask = ModifierMask(0x0010);
    pub const ALT_GR: ModifierMask = ModifierMask(0x0020);
    pub const CAPS_LOCK: ModifierMask = ModifierMask(0x1000);
    pub const NUM_LOCK: ModifierMask = ModifierMask(0x2000);
    pub const SCROLL_LOCK: ModifierMask = ModifierMask(0x4000);

    /// All bits the protocol defines.
    pub const DEFINED: ModifierMask = ModifierMask(0x703F);
    /// The latched toggle bits.
    pub const TOGGLES: ModifierMask = ModifierMask(0x7000);

    pub fn contains(self, other: ModifierMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: ModifierMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: ModifierMask) -> ModifierMask {
        ModifierMask(self.0 | other.0)
    }

    pub fn difference(self, other: ModifierMask) -> ModifierMask {
        ModifierMask(self.0 & !other.0)
    }

    pub fn intersection(self, other: ModifierMask) -> ModifierMask {
        ModifierMask(self.0 & other.0)
    }

    pub fn toggled(self, bit: ModifierMask) -> ModifierMask {
        ModifierMask(self.0 ^ bit.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bit_count(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterates over the individual set bits.
    pub fn bits(self) -> impl Iterator<Item = ModifierMask> {
        (0..16)
            .map(|i| ModifierMask(1 << i))
            .filter(move |bit| self.contains(*bit))
    }
}

// ── Key map ───────────────────────────────────────────────────────────────────

/// Errors raised while building a key map.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyMapError {
    /// The entry's required state asserts bits outside its sensitive mask.
    #[error("required state {state:04x} not a subset of sensitive mask {mask:04x}")]
    StateNotInMask { mask: u16, state: u16 },

    /// The entry uses modifier bits the protocol does not define.
    #[error("mask {0:04x} uses undefined modifier bits")]
    UndefinedModifier(u16),

    /// The key registered as a modifier does not assert a modifier bit.
    #[error("key {0:#06x} is not a modifier")]
    NotAModifier(u16),

    /// Button 0 is reserved and cannot appear in the map.
    #[error("key button 0 is reserved")]
    ReservedButton,
}

/// One way to produce a KeyID on the local layout: press `button` while the
/// modifiers named by `mask` are in exactly the state given by `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMapEntry {
    pub button: KeyButton,
    /// The modifier bits this entry is sensitive to.
    pub mask: ModifierMask,
    /// The required value of the sensitive bits.  Subset of `mask`.
    pub state: ModifierMask,
}

/// Physical buttons that assert a modifier bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifierButton {
    pub button: KeyButton,
    pub bit: ModifierMask,
}

/// Layout-derived translation table from KeyIDs to candidate keystrokes.
///
/// Rebuilt wholesale when the screen reports a layout change; lookups never
/// mutate it.
#[derive(Debug, Clone, Default)]
pub struct KeyMap {
    entries: HashMap<KeyId, Vec<KeyMapEntry>>,
    modifiers: HashMap<KeyId, ModifierButton>,
    modifier_buttons: HashMap<u16, KeyButton>,
    dead_keys: HashMap<KeyId, ()>,
    compositions: HashMap<(KeyId, KeyId), KeyId>,
}

impl KeyMap {
    pub fn new() -> KeyMap {
        KeyMap::default()
    }

    /// Adds a candidate keystroke for `id`.  Candidates are tried in insertion
    /// order when scores tie.
    pub fn add_entry(&mut self, id: KeyId, entry: KeyMapEntry) -> Result<(), KeyMapError> {
        if !entry.button.is_valid() {
            return Err(KeyMapError::ReservedButton);
        }
        if !ModifierMask::DEFINED.contains(entry.mask) {
            return Err(KeyMapError::UndefinedModifier(entry.mask.0));
        }
        if !entry.mask.contains(entry.state) {
            return Err(KeyMapError::StateNotInMask {
                mask: entry.mask.0,
                state: entry.state.0,
            });
        }
        self.entries.entry(id).or_default().push(entry);
        Ok(())
    }

    /// Registers the physical button for a modifier key.
    pub fn add_modifier(
        &mut self,
        id: KeyId,
        button: KeyButton,
    ) -> Result<(), KeyMapError> {
        if !button.is_valid() {
            return Err(KeyMapError::ReservedButton);
        }
        let bit = id.modifier_bit().ok_or(KeyMapError::NotAModifier(id.0))?;
        self.modifiers.insert(id, ModifierButton { button, bit });
        self.modifier_buttons.entry(bit.0).or_insert(button);
        Ok(())
    }

    /// Marks `id` as a dead key: pressing it emits nothing and primes the
    /// composition state instead.
    pub fn add_dead_key(&mut self, id: KeyId) {
        self.dead_keys.insert(id, ());
    }

    /// Registers `(dead, next) → composed`.
    pub fn add_composition(&mut self, dead: KeyId, next: KeyId, composed: KeyId) {
        self.compositions.insert((dead, next), composed);
    }

    pub fn candidates(&self, id: KeyId) -> Option<&[KeyMapEntry]> {
        self.entries.get(&id).map(Vec::as_slice)
    }

    pub fn modifier(&self, id: KeyId) -> Option<ModifierButton> {
        self.modifiers.get(&id).copied()
    }

    /// The button that asserts a single modifier bit, if the layout has one.
    pub fn button_for_modifier(&self, bit: ModifierMask) -> Option<KeyButton> {
        self.modifier_buttons.get(&bit.0).copied()
    }

    pub fn is_dead_key(&self, id: KeyId) -> bool {
        self.dead_keys.contains_key(&id)
    }

    pub fn compose(&self, dead: KeyId, next: KeyId) -> Option<KeyId> {
        self.compositions.get(&(dead, next)).copied()
    }

    /// Picks the candidate that best matches `desired`: its required state
    /// must be a subset of `desired`, the score is how many desired bits it
    /// keeps asserted, and ties break toward fewer adjustments from
    /// `current`.
    pub fn best_candidate(
        &self,
        id: KeyId,
        desired: ModifierMask,
        current: ModifierMask,
    ) -> Option<KeyMapEntry> {
        let candidates = self.candidates(id)?;
        let mut best: Option<(u32, u32, KeyMapEntry)> = None;
        for entry in candidates {
            if !desired.contains(entry.state) {
                // Requires modifiers the server did not ask for; usable only
                // as the fallback below.
                continue;
            }
            let score = entry.state.intersection(desired).bit_count();
            let adjustments = entry
                .state
                .toggled(current.intersection(entry.mask))
                .bit_count();
            let better = match &best {
                None => true,
                Some((s, a, _)) => score > *s || (score == *s && adjustments < *a),
            };
            if better {
                best = Some((score, adjustments, *entry));
            }
        }
        // Fall back to the first candidate when none is reachable under the
        // desired mask; the modifier envelope will force the required state.
        best.map(|(_, _, e)| e)
            .or_else(|| candidates.first().copied())
    }
}
