//! Built-in US-ASCII keyboard layout.
//!
//! Platform screens derive their key maps from the OS (XKB, uchr, VK
//! tables); this hand-written table covers the standard US layout for the
//! mock screen and for hosts whose driver cannot report a layout.  Button
//! numbers follow the Linux evdev key codes.

use crate::keymap::{KeyButton, KeyId, KeyMap, KeyMapEntry, ModifierMask};

const SHIFTABLE: ModifierMask = ModifierMask(ModifierMask::SHIFT.0 | ModifierMask::CAPS_LOCK.0);

/// Rows of (button, unshifted char, shifted char) for the printable keys.
const PRINTABLE: &[(u16, char, char)] = &[
    (2, '1', '!'),
    (3, '2', '@'),
    (4, '3', '#'),
    (5, '4', '$'),
    (6, '5', '%'),
    (7, '6', '^'),
    (8, '7', '&'),
    (9, '8', '*'),
    (10, '9', '('),
    (11, '0', ')'),
    (12, '-', '_'),
    (13, '=', '+'),
    (26, '[', '{'),
    (27, ']', '}'),
    (39, ';', ':'),
    (40, '\'', '"'),
    (41, '`', '~'),
    (43, '\\', '|'),
    (51, ',', '<'),
    (52, '.', '>'),
    (53, '/', '?'),
];

/// (button, lowercase char) for the letter rows.
const LETTERS: &[(u16, char)] = &[
    (16, 'q'),
    (17, 'w'),
    (18, 'e'),
    (19, 'r'),
    (20, 't'),
    (21, 'y'),
    (22, 'u'),
    (23, 'i'),
    (24, 'o'),
    (25, 'p'),
    (30, 'a'),
    (31, 's'),
    (32, 'd'),
    (33, 'f'),
    (34, 'g'),
    (35, 'h'),
    (36, 'j'),
    (37, 'k'),
    (38, 'l'),
    (44, 'z'),
    (45, 'x'),
    (46, 'c'),
    (47, 'v'),
    (48, 'b'),
    (49, 'n'),
    (50, 'm'),
];

/// (button, key id) for keys insensitive to modifiers.
const SPECIAL: &[(u16, KeyId)] = &[
    (1, KeyId::ESCAPE),
    (14, KeyId::BACKSPACE),
    (15, KeyId::TAB),
    (28, KeyId::RETURN),
    (102, KeyId::HOME),
    (103, KeyId::UP),
    (104, KeyId::PAGE_UP),
    (105, KeyId::LEFT),
    (106, KeyId::RIGHT),
    (107, KeyId::END),
    (108, KeyId::DOWN),
    (109, KeyId::PAGE_DOWN),
    (110, KeyId::INSERT),
    (111, KeyId::DELETE),
    (59, KeyId::F1),
    (60, KeyId::F2),
    (61, KeyId::F3),
    (62, KeyId::F4),
    (63, KeyId::F5),
    (64, KeyId::F6),
    (65, KeyId::F7),
    (66, KeyId::F8),
    (67, KeyId::F9),
    (68, KeyId::F10),
    (87, KeyId::F11),
    (88, KeyId::F12),
];

/// (button, modifier key id) rows.
const MODIFIERS: &[(u16, KeyId)] = &[
    (42, KeyId::SHIFT_L),
    (54, KeyId::SHIFT_R),
    (29, KeyId::CONTROL_L),
    (97, KeyId::CONTROL_R),
    (56, KeyId::ALT_L),
    (100, KeyId::ALT_R),
    // AltGr shares the right-alt key on this layout.
    (100, KeyId::ALT_GR),
    (125, KeyId::META_L),
    (126, KeyId::META_R),
    (133, KeyId::SUPER_L),
    (134, KeyId::SUPER_R),
    (58, KeyId::CAPS_LOCK),
    (69, KeyId::NUM_LOCK),
    (70, KeyId::SCROLL_LOCK),
];

/// Builds the US-ASCII key map.
pub fn key_map() -> KeyMap {
    let mut map = KeyMap::new();
    let add = |map: &mut KeyMap, id: KeyId, button: u16, mask: ModifierMask, state: ModifierMask| {
        map.add_entry(
            id,
            KeyMapEntry {
                button: KeyButton(button),
                mask,
                state,
            },
        )
        .expect("static table entries are valid");
    };

    for &(button, lower) in LETTERS {
        let lower_id = KeyId::from_char(lower).expect("ASCII fits the BMP");
        let upper_id = KeyId::from_char(lower.to_ascii_uppercase()).expect("ASCII fits the BMP");
        // Caps lock inverts shift for letters.
        add(&mut map, lower_id, button, SHIFTABLE, ModifierMask::NONE);
        add(&mut map, lower_id, button, SHIFTABLE, SHIFTABLE);
        add(&mut map, upper_id, button, SHIFTABLE, ModifierMask::SHIFT);
        add(&mut map, upper_id, button, SHIFTABLE, ModifierMask::CAPS_LOCK);
    }

    for &(button, plain, shifted) in PRINTABLE {
        let plain_id = KeyId::from_char(plain).expect("ASCII fits the BMP");
        let shifted_id = KeyId::from_char(shifted).expect("ASCII fits the BMP");
        add(&mut map, plain_id, button, ModifierMask::SHIFT, ModifierMask::NONE);
        add(&mut map, shifted_id, button, ModifierMask::SHIFT, ModifierMask::SHIFT);
    }

    add(
        &mut map,
        KeyId::from_char(' ').expect("ASCII fits the BMP"),
        57,
        ModifierMask::NONE,
        ModifierMask::NONE,
    );
    for &(button, id) in SPECIAL {
        add(&mut map, id, button, ModifierMask::NONE, ModifierMask::NONE);
    }

    for &(button, id) in MODIFIERS {
        map.add_modifier(id, KeyButton(button))
            .expect("static modifier rows are valid");
    }

    map
}
