//! The key-state engine: turns server key events into local keystroke
//! programs.
//!
//! For an incoming `(key id, desired modifier mask)` the engine picks the
//! best candidate from the [`KeyMap`], wraps the physical key in a modifier
//! envelope (press whatever the candidate needs, then undo those
//! adjustments), and keeps a shadow of the server's modifier model so the
//! next event only pays for the transitions it actually needs.
//!
//! Modifier keys themselves never compose characters: they update the shadow
//! and emit a bare press or release.  Half-duplex toggles (caps/num/scroll
//! lock on keyboards where the key latches) emit a press alone and flip the
//! shadow bit.  Dead keys emit nothing and prime a composition that resolves
//! on the next character key.

use thiserror::Error;

use crate::keymap::{KeyButton, KeyId, KeyMap, ModifierMask};

// ── Errors ────────────────────────────────────────────────────────────────────

/// A key event that cannot be mapped.  The event is dropped after logging;
/// the session continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyMappingError {
    /// The key id has no entry in the current layout's map.
    #[error("no mapping for key id {0:#06x}")]
    Unmapped(u16),

    /// The envelope needs a modifier the layout has no button for.
    #[error("layout has no button asserting modifier {0:#06x}")]
    NoModifierButton(u16),
}

// ── Keystrokes ────────────────────────────────────────────────────────────────

/// One physical keystroke in a program.  `repeat` is non-zero only for the
/// character strokes of an auto-repeat event, carrying the repeat count for
/// platforms with native repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keystroke {
    pub button: KeyButton,
    pub press: bool,
    pub repeat: u16,
}

impl Keystroke {
    fn down(button: KeyButton) -> Keystroke {
        Keystroke {
            button,
            press: true,
            repeat: 0,
        }
    }

    fn up(button: KeyButton) -> Keystroke {
        Keystroke {
            button,
            press: false,
            repeat: 0,
        }
    }
}

/// An ordered keystroke program plus the undo information needed to roll the
/// shadow back if execution fails partway.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeystrokeProgram {
    pub strokes: Vec<Keystroke>,
    shadow_before: ModifierMask,
}

impl KeystrokeProgram {
    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Maps logical key events to platform keystroke sequences.
pub struct KeyStateEngine {
    map: KeyMap,
    shadow: ModifierMask,
    half_duplex: ModifierMask,
    pending_dead: Option<KeyId>,
}

impl KeyStateEngine {
    pub fn new(map: KeyMap) -> KeyStateEngine {
        KeyStateEngine {
            map,
            shadow: ModifierMask::NONE,
            half_duplex: ModifierMask::NONE,
            pending_dead: None,
        }
    }

    /// Replaces the key map after a layout change.  The swap happens between
    /// events; a primed dead-key composition is abandoned because its
    /// composition table went with the old layout.
    pub fn set_key_map(&mut self, map: KeyMap) {
        self.map = map;
        self.pending_dead = None;
    }

    /// Names which toggle modifiers are half-duplex on this screen.
    pub fn set_half_duplex(&mut self, mask: ModifierMask) {
        self.half_duplex = mask.intersection(ModifierMask::TOGGLES);
    }

    /// Adopts the server's modifier state wholesale; called at screen enter.
    pub fn reconcile(&mut self, mask: ModifierMask) {
        self.shadow = mask;
    }

    pub fn shadow(&self) -> ModifierMask {
        self.shadow
    }

    /// Restores the shadow recorded before `program` was synthesized.  Called
    /// when executing the program failed partway.
    pub fn rollback(&mut self, program: &KeystrokeProgram) {
        self.shadow = program.shadow_before;
    }

    /// Maps a key press.
    pub fn key_down(
        &mut self,
        id: KeyId,
        desired: ModifierMask,
        _button: KeyButton,
    ) -> Result<KeystrokeProgram, KeyMappingError> {
        if let Some(bit) = id.modifier_bit() {
            return self.modifier_down(id, bit);
        }
        if self.map.is_dead_key(id) {
            self.pending_dead = Some(id);
            return Ok(KeystrokeProgram {
                strokes: Vec::new(),
                shadow_before: self.shadow,
            });
        }
        if let Some(dead) = self.pending_dead.take() {
            return self.compose_down(dead, id, desired);
        }
        self.character_program(id, desired, 0)
    }

    /// Maps an auto-repeat.  Dead keys do not repeat.
    pub fn key_repeat(
        &mut self,
        id: KeyId,
        desired: ModifierMask,
        count: u16,
        _button: KeyButton,
    ) -> Result<KeystrokeProgram, KeyMappingError> {
        if id.modifier_bit().is_some() || self.map.is_dead_key(id) {
            return Ok(KeystrokeProgram {
                strokes: Vec::new(),
                shadow_before: self.shadow,
            });
        }
        self.character_program(id, desired, count)
    }

    /// Maps a key release.  Character keys were already released by their
    /// down-program, so only modifier keys produce strokes here.
    pub fn key_up(&mut self, id: KeyId, _button: KeyButton) -> KeystrokeProgram {
        let shadow_before = self.shadow;
        let Some(bit) = id.modifier_bit() else {
            return KeystrokeProgram {
                strokes: Vec::new(),
                shadow_before,
            };
        };
        if self.half_duplex.contains(bit) {
            // The latch flipped on the press; the release is swallowed.
            return KeystrokeProgram {
                strokes: Vec::new(),
                shadow_before,
            };
        }
        let Some(modifier) = self.map.modifier(id) else {
            return KeystrokeProgram {
                strokes: Vec::new(),
                shadow_before,
            };
        };
        self.shadow = self.shadow.difference(bit);
        KeystrokeProgram {
            strokes: vec![Keystroke::up(modifier.button)],
            shadow_before,
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn modifier_down(
        &mut self,
        id: KeyId,
        bit: ModifierMask,
    ) -> Result<KeystrokeProgram, KeyMappingError> {
        let modifier = self
            .map
            .modifier(id)
            .ok_or(KeyMappingError::Unmapped(id.0))?;
        let shadow_before = self.shadow;
        self.shadow = if self.half_duplex.contains(bit) {
            self.shadow.toggled(bit)
        } else {
            self.shadow.union(bit)
        };
        Ok(KeystrokeProgram {
            strokes: vec![Keystroke::down(modifier.button)],
            shadow_before,
        })
    }

    fn compose_down(
        &mut self,
        dead: KeyId,
        id: KeyId,
        desired: ModifierMask,
    ) -> Result<KeystrokeProgram, KeyMappingError> {
        if let Some(composed) = self.map.compose(dead, id) {
            return self.character_program(composed, desired, 0);
        }
        // No composition: deliver the dead key's standalone character (when
        // the layout can produce one) followed by the pressed character.
        let shadow_before = self.shadow;
        let mut strokes = Vec::new();
        if self.map.candidates(dead).is_some() {
            let dead_program = self.character_program(dead, desired, 0)?;
            strokes.extend(dead_program.strokes);
        }
        match self.character_program(id, desired, 0) {
            Ok(program) => {
                strokes.extend(program.strokes);
                Ok(KeystrokeProgram {
                    strokes,
                    shadow_before,
                })
            }
            Err(err) => {
                self.shadow = shadow_before;
                Err(err)
            }
        }
    }

    /// Builds the modifier envelope around a character key: transition the
    /// envelope modifiers into the candidate's required state, emit the key
    /// (press/release, `repeat` times for auto-repeat), undo the transitions,
    /// and record the desired mask as the new shadow.
    fn character_program(
        &mut self,
        id: KeyId,
        desired: ModifierMask,
        repeat: u16,
    ) -> Result<KeystrokeProgram, KeyMappingError> {
        let entry = self
            .map
            .best_candidate(id, desired, self.shadow)
            .ok_or(KeyMappingError::Unmapped(id.0))?;

        let current = self.shadow.intersection(entry.mask);
        let to_change = entry.state.toggled(current);

        let mut adjust = Vec::new();
        let mut undo = Vec::new();
        for bit in to_change.bits() {
            let button = self
                .map
                .button_for_modifier(bit)
                .ok_or(KeyMappingError::NoModifierButton(bit.0))?;
            if self.half_duplex.contains(bit) {
                // A latched toggle changes state on press; pressing again
                // undoes it.
                adjust.push(Keystroke::down(button));
                undo.push(Keystroke::down(button));
            } else if entry.state.contains(bit) {
                adjust.push(Keystroke::down(button));
                undo.push(Keystroke::up(button));
            } else {
                adjust.push(Keystroke::up(button));
                undo.push(Keystroke::down(button));
            }
        }
        undo.reverse();

        let mut strokes = adjust;
        strokes.push(Keystroke {
            button: entry.button,
            press: true,
            repeat,
        });
        strokes.push(Keystroke {
            button: entry.button,
            press: false,
            repeat,
        });
        strokes.extend(undo);

        let shadow_before = self.shadow;
        // The server's model after this event is the mask it sent.
        self.shadow = desired;
        Ok(KeystrokeProgram {
            strokes,
            shadow_before,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::us_ascii;

    const BUTTON_A: KeyButton = KeyButton(30);
    const BUTTON_SHIFT_L: KeyButton = KeyButton(42);

    fn engine() -> KeyStateEngine {
        KeyStateEngine::new(us_ascii::key_map())
    }

    fn strokes(program: &KeystrokeProgram) -> Vec<(u16, bool)> {
        program
            .strokes
            .iter()
            .map(|k| (k.button.0, k.press))
            .collect()
    }

    #[test]
    fn test_shifted_letter_without_shift_in_shadow_wraps_in_envelope() {
        // DKDN 'A' with mask=Shift on an empty shadow:
        // (ShiftL press)(A press)(A release)(ShiftL release).
        let mut engine = engine();
        let program = engine
            .key_down(KeyId(0x0041), ModifierMask::SHIFT, KeyButton(1))
            .expect("mapped");
        assert_eq!(
            strokes(&program),
            vec![
                (BUTTON_SHIFT_L.0, true),
                (BUTTON_A.0, true),
                (BUTTON_A.0, false),
                (BUTTON_SHIFT_L.0, false),
            ]
        );
        assert_eq!(engine.shadow(), ModifierMask::SHIFT);
    }

    #[test]
    fn test_shifted_letter_with_shift_already_in_shadow_is_bare() {
        // If the shadow already has shift, just (A press/release).
        let mut engine = engine();
        engine
            .key_down(KeyId::SHIFT_L, ModifierMask::SHIFT, KeyButton(1))
            .expect("modifier mapped");
        let program = engine
            .key_down(KeyId(0x0041), ModifierMask::SHIFT, KeyButton(1))
            .expect("mapped");
        assert_eq!(
            strokes(&program),
            vec![(BUTTON_A.0, true), (BUTTON_A.0, false)]
        );
    }

    #[test]
    fn test_lowercase_letter_under_held_shift_releases_shift_around_key() {
        // Server asks for 'a' while the shadow holds shift: the envelope
        // lifts shift, types, and puts it back.
        let mut engine = engine();
        engine.reconcile(ModifierMask::SHIFT);
        let program = engine
            .key_down(KeyId(0x0061), ModifierMask::SHIFT, KeyButton(1))
            .expect("mapped");
        assert_eq!(
            strokes(&program),
            vec![
                (BUTTON_SHIFT_L.0, false),
                (BUTTON_A.0, true),
                (BUTTON_A.0, false),
                (BUTTON_SHIFT_L.0, true),
            ]
        );
    }

    #[test]
    fn test_shadow_equals_desired_mask_after_any_program() {
        let cases = [
            (KeyId(0x0041), ModifierMask::SHIFT),
            (KeyId(0x0061), ModifierMask::NONE),
            (KeyId(0x0021), ModifierMask::SHIFT.union(ModifierMask::CONTROL)),
            (KeyId::RETURN, ModifierMask::ALT),
            (KeyId(0x0035), ModifierMask::CAPS_LOCK),
        ];
        for (id, desired) in cases {
            let mut engine = engine();
            engine.reconcile(ModifierMask::META);
            engine.key_down(id, desired, KeyButton(1)).expect("mapped");
            assert_eq!(engine.shadow(), desired, "shadow after {id:?}");
        }
    }

    #[test]
    fn test_modifier_down_and_up_track_shadow() {
        let mut engine = engine();
        let down = engine
            .key_down(KeyId::CONTROL_L, ModifierMask::CONTROL, KeyButton(1))
            .expect("mapped");
        assert_eq!(down.strokes.len(), 1);
        assert!(down.strokes[0].press);
        assert_eq!(engine.shadow(), ModifierMask::CONTROL);

        let up = engine.key_up(KeyId::CONTROL_L, KeyButton(1));
        assert_eq!(up.strokes.len(), 1);
        assert!(!up.strokes[0].press);
        assert_eq!(engine.shadow(), ModifierMask::NONE);
    }

    #[test]
    fn test_half_duplex_caps_lock_press_emits_press_alone_and_toggles() {
        let mut engine = engine();
        engine.set_half_duplex(ModifierMask::CAPS_LOCK);

        let down = engine
            .key_down(KeyId::CAPS_LOCK, ModifierMask::CAPS_LOCK, KeyButton(1))
            .expect("mapped");
        assert_eq!(down.strokes.len(), 1);
        assert!(down.strokes[0].press);
        assert_eq!(engine.shadow(), ModifierMask::CAPS_LOCK);

        // The release is swallowed for half-duplex keys.
        let up = engine.key_up(KeyId::CAPS_LOCK, KeyButton(1));
        assert!(up.is_empty());
        assert_eq!(engine.shadow(), ModifierMask::CAPS_LOCK);

        // A second press toggles the latch off.
        let down = engine
            .key_down(KeyId::CAPS_LOCK, ModifierMask::NONE, KeyButton(1))
            .expect("mapped");
        assert_eq!(down.strokes.len(), 1);
        assert_eq!(engine.shadow(), ModifierMask::NONE);
    }

    #[test]
    fn test_half_duplex_toggle_inside_envelope_presses_twice() {
        // Lowercase 'a' needs caps lock off while the latch is on: the
        // envelope presses the key to unlatch, and presses again to restore.
        let mut engine = engine();
        engine.set_half_duplex(ModifierMask::CAPS_LOCK);
        engine.reconcile(ModifierMask::CAPS_LOCK);

        let program = engine
            .key_down(KeyId(0x0061), ModifierMask::CAPS_LOCK, KeyButton(1))
            .expect("mapped");
        let caps_button = us_ascii::key_map()
            .button_for_modifier(ModifierMask::CAPS_LOCK)
            .unwrap();
        let caps_strokes: Vec<&Keystroke> = program
            .strokes
            .iter()
            .filter(|k| k.button == caps_button)
            .collect();
        assert_eq!(caps_strokes.len(), 2);
        assert!(caps_strokes.iter().all(|k| k.press));
    }

    #[test]
    fn test_auto_repeat_carries_count_on_character_strokes() {
        let mut engine = engine();
        let program = engine
            .key_repeat(KeyId(0x0061), ModifierMask::NONE, 4, KeyButton(1))
            .expect("mapped");
        assert_eq!(program.strokes.len(), 2);
        assert!(program.strokes.iter().all(|k| k.repeat == 4));
    }

    #[test]
    fn test_repeat_of_modifier_is_silent() {
        let mut engine = engine();
        let program = engine
            .key_repeat(KeyId::SHIFT_L, ModifierMask::SHIFT, 3, KeyButton(1))
            .expect("mapped");
        assert!(program.is_empty());
    }

    #[test]
    fn test_unmapped_key_is_an_error_and_leaves_shadow_alone() {
        let mut engine = engine();
        engine.reconcile(ModifierMask::ALT);
        let err = engine
            .key_down(KeyId(0x3042), ModifierMask::NONE, KeyButton(1))
            .expect_err("unmapped");
        assert_eq!(err, KeyMappingError::Unmapped(0x3042));
        assert_eq!(engine.shadow(), ModifierMask::ALT);
    }

    #[test]
    fn test_rollback_restores_the_previous_shadow() {
        let mut engine = engine();
        engine.reconcile(ModifierMask::CONTROL);
        let program = engine
            .key_down(KeyId(0x0061), ModifierMask::NONE, KeyButton(1))
            .expect("mapped");
        assert_eq!(engine.shadow(), ModifierMask::NONE);
        engine.rollback(&program);
        assert_eq!(engine.shadow(), ModifierMask::CONTROL);
    }

    // ── Dead keys ─────────────────────────────────────────────────────────────

    fn dead_key_engine() -> (KeyStateEngine, KeyId, KeyId) {
        let mut map = us_ascii::key_map();
        let dead_grave = KeyId(0xEE50);
        let a_grave = KeyId(0x00E0);
        map.add_dead_key(dead_grave);
        map.add_composition(dead_grave, KeyId(0x0061), a_grave);
        map.add_entry(
            a_grave,
            crate::keymap::KeyMapEntry {
                button: KeyButton(90),
                mask: ModifierMask::NONE,
                state: ModifierMask::NONE,
            },
        )
        .unwrap();
        (KeyStateEngine::new(map), dead_grave, a_grave)
    }

    #[test]
    fn test_dead_key_press_emits_nothing() {
        let (mut engine, dead, _) = dead_key_engine();
        let program = engine
            .key_down(dead, ModifierMask::NONE, KeyButton(1))
            .expect("dead key accepted");
        assert!(program.is_empty());
    }

    #[test]
    fn test_dead_key_then_composable_character_delivers_composed_key() {
        let (mut engine, dead, _) = dead_key_engine();
        engine
            .key_down(dead, ModifierMask::NONE, KeyButton(1))
            .unwrap();
        let program = engine
            .key_down(KeyId(0x0061), ModifierMask::NONE, KeyButton(1))
            .expect("composed");
        // The composed character's button, not 'a''s.
        assert_eq!(
            strokes(&program),
            vec![(90, true), (90, false)]
        );
    }

    #[test]
    fn test_dead_key_then_noncomposable_character_delivers_both() {
        let (mut engine, dead, _) = dead_key_engine();
        // Make the dead key itself typeable so the fallback can deliver it.
        // 0xEE50 has no standalone entry in this fixture, so only the second
        // character comes out.
        engine
            .key_down(dead, ModifierMask::NONE, KeyButton(1))
            .unwrap();
        let program = engine
            .key_down(KeyId(0x0062), ModifierMask::NONE, KeyButton(1))
            .expect("fallback");
        let b_button = us_ascii::key_map()
            .best_candidate(KeyId(0x0062), ModifierMask::NONE, ModifierMask::NONE)
            .unwrap()
            .button;
        assert_eq!(
            strokes(&program),
            vec![(b_button.0, true), (b_button.0, false)]
        );
    }

    #[test]
    fn test_key_map_swap_clears_pending_dead_key() {
        let (mut engine, dead, _) = dead_key_engine();
        engine
            .key_down(dead, ModifierMask::NONE, KeyButton(1))
            .unwrap();
        engine.set_key_map(us_ascii::key_map());
        // 'a' now types plainly instead of composing.
        let program = engine
            .key_down(KeyId(0x0061), ModifierMask::NONE, KeyButton(1))
            .expect("mapped");
        assert_eq!(
            strokes(&program),
            vec![(BUTTON_A.0, true), (BUTTON_A.0, false)]
        );
    }
}
