//! A recording mock screen.
//!
//! Always compiled (not test-gated) so the binary can run headless on hosts
//! without a platform driver and so tests on any platform can observe what
//! the client synthesizes without a physical display.  Every call is
//! recorded; tests read them back through the shared [`MockScreenHandle`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use synergy_core::keymap::us_ascii;
use synergy_core::protocol::messages::MouseButton;
use synergy_core::protocol::{ClipboardData, ClipboardId};
use synergy_core::{KeyButton, KeyMap, ModifierMask};

use crate::screen::{Screen, ScreenError, ScreenShape};

#[derive(Debug, Default)]
struct MockState {
    cursor: (i16, i16),
    entered: bool,
    leave_result: bool,
    fail_synthesis: bool,
    enters: Vec<(i16, i16, ModifierMask, bool)>,
    leaves: u32,
    keystrokes: Vec<(KeyButton, bool, u16)>,
    mouse_moves: Vec<(i16, i16)>,
    mouse_rel_moves: Vec<(i16, i16)>,
    mouse_buttons: Vec<(MouseButton, bool)>,
    mouse_wheels: Vec<(i32, i32)>,
    clipboards_set: Vec<(ClipboardId, ClipboardData)>,
    clipboard_contents: HashMap<ClipboardId, ClipboardData>,
    screensaver: Vec<bool>,
}

/// Test-side view of a [`MockScreen`]'s recorded calls.
#[derive(Clone)]
pub struct MockScreenHandle {
    state: Rc<RefCell<MockState>>,
}

impl MockScreenHandle {
    pub fn cursor(&self) -> (i16, i16) {
        self.state.borrow().cursor
    }

    pub fn entered(&self) -> bool {
        self.state.borrow().entered
    }

    pub fn enters(&self) -> Vec<(i16, i16, ModifierMask, bool)> {
        self.state.borrow().enters.clone()
    }

    pub fn leave_count(&self) -> u32 {
        self.state.borrow().leaves
    }

    pub fn keystrokes(&self) -> Vec<(KeyButton, bool, u16)> {
        self.state.borrow().keystrokes.clone()
    }

    pub fn mouse_moves(&self) -> Vec<(i16, i16)> {
        self.state.borrow().mouse_moves.clone()
    }

    pub fn mouse_rel_moves(&self) -> Vec<(i16, i16)> {
        self.state.borrow().mouse_rel_moves.clone()
    }

    pub fn mouse_buttons(&self) -> Vec<(MouseButton, bool)> {
        self.state.borrow().mouse_buttons.clone()
    }

    pub fn mouse_wheels(&self) -> Vec<(i32, i32)> {
        self.state.borrow().mouse_wheels.clone()
    }

    pub fn clipboards_set(&self) -> Vec<(ClipboardId, ClipboardData)> {
        self.state.borrow().clipboards_set.clone()
    }

    pub fn screensaver_calls(&self) -> Vec<bool> {
        self.state.borrow().screensaver.clone()
    }

    /// Makes subsequent `leave()` calls return `value`.
    pub fn set_leave_result(&self, value: bool) {
        self.state.borrow_mut().leave_result = value;
    }

    /// Makes every synthesis call fail with a runtime error.
    pub fn set_fail_synthesis(&self, value: bool) {
        self.state.borrow_mut().fail_synthesis = value;
    }

    /// Seeds the content returned by `get_clipboard`.
    pub fn set_clipboard_content(&self, id: ClipboardId, data: ClipboardData) {
        self.state.borrow_mut().clipboard_contents.insert(id, data);
    }
}

/// Mock screen driver.  In a production build this is replaced by the
/// platform driver (SendInput / XTest / CoreGraphics) selected at compile
/// time.
pub struct MockScreen {
    shape: ScreenShape,
    key_map: KeyMap,
    state: Rc<RefCell<MockState>>,
}

impl MockScreen {
    /// A 1920×1080 screen with a one-pixel jump zone, the most common
    /// fixture.
    pub fn single_1080p() -> (MockScreen, MockScreenHandle) {
        MockScreen::with_shape(ScreenShape {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
            warp_capable: true,
            zone: 1,
        })
    }

    pub fn with_shape(shape: ScreenShape) -> (MockScreen, MockScreenHandle) {
        let state = Rc::new(RefCell::new(MockState {
            leave_result: true,
            cursor: shape.center(),
            ..MockState::default()
        }));
        let handle = MockScreenHandle {
            state: Rc::clone(&state),
        };
        (
            MockScreen {
                shape,
                key_map: us_ascii::key_map(),
                state,
            },
            handle,
        )
    }

    fn check_synthesis(&self) -> Result<(), ScreenError> {
        if self.state.borrow().fail_synthesis {
            Err(ScreenError::Runtime("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Screen for MockScreen {
    fn shape(&self) -> ScreenShape {
        self.shape
    }

    fn cursor_pos(&self) -> (i16, i16) {
        self.state.borrow().cursor
    }

    fn enter(
        &mut self,
        x: i16,
        y: i16,
        mask: ModifierMask,
        for_screensaver: bool,
    ) -> Result<(), ScreenError> {
        let mut state = self.state.borrow_mut();
        state.cursor = (x, y);
        state.entered = true;
        state.enters.push((x, y, mask, for_screensaver));
        Ok(())
    }

    fn leave(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        state.leaves += 1;
        state.entered = false;
        state.leave_result
    }

    fn fake_mouse_move(&mut self, x: i16, y: i16) -> Result<(), ScreenError> {
        self.check_synthesis()?;
        let mut state = self.state.borrow_mut();
        state.cursor = (x, y);
        state.mouse_moves.push((x, y));
        Ok(())
    }

    fn fake_mouse_rel_move(&mut self, dx: i16, dy: i16) -> Result<(), ScreenError> {
        self.check_synthesis()?;
        let mut state = self.state.borrow_mut();
        state.cursor.0 = state.cursor.0.saturating_add(dx);
        state.cursor.1 = state.cursor.1.saturating_add(dy);
        state.mouse_rel_moves.push((dx, dy));
        Ok(())
    }

    fn fake_mouse_button(&mut self, button: MouseButton, press: bool) -> Result<(), ScreenError> {
        self.check_synthesis()?;
        self.state.borrow_mut().mouse_buttons.push((button, press));
        Ok(())
    }

    fn fake_mouse_wheel(&mut self, dx: i32, dy: i32) -> Result<(), ScreenError> {
        self.check_synthesis()?;
        self.state.borrow_mut().mouse_wheels.push((dx, dy));
        Ok(())
    }

    fn fake_key(&mut self, button: KeyButton, press: bool, repeat: u16) -> Result<(), ScreenError> {
        self.check_synthesis()?;
        self.state
            .borrow_mut()
            .keystrokes
            .push((button, press, repeat));
        Ok(())
    }

    fn set_clipboard(&mut self, id: ClipboardId, data: &ClipboardData) -> Result<(), ScreenError> {
        let mut state = self.state.borrow_mut();
        state.clipboard_contents.insert(id, data.clone());
        state.clipboards_set.push((id, data.clone()));
        Ok(())
    }

    fn get_clipboard(&self, id: ClipboardId) -> Result<ClipboardData, ScreenError> {
        Ok(self
            .state
            .borrow()
            .clipboard_contents
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn set_screensaver(&mut self, active: bool) -> Result<(), ScreenError> {
        self.state.borrow_mut().screensaver.push(active);
        Ok(())
    }

    fn key_map(&self) -> KeyMap {
        self.key_map.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_1080p_shape_and_center() {
        let (screen, _) = MockScreen::single_1080p();
        let shape = screen.shape();
        assert_eq!((shape.width, shape.height), (1920, 1080));
        assert_eq!(shape.center(), (960, 540));
        assert_eq!(shape.info().mx, 960);
    }

    #[test]
    fn test_enter_moves_cursor_and_records() {
        let (mut screen, handle) = MockScreen::single_1080p();
        screen
            .enter(100, 200, ModifierMask::NONE, false)
            .expect("enter");
        assert_eq!(handle.cursor(), (100, 200));
        assert!(handle.entered());
        assert_eq!(handle.enters().len(), 1);
    }

    #[test]
    fn test_leave_result_is_configurable() {
        let (mut screen, handle) = MockScreen::single_1080p();
        assert!(screen.leave());
        handle.set_leave_result(false);
        assert!(!screen.leave());
        assert_eq!(handle.leave_count(), 2);
    }

    #[test]
    fn test_fail_synthesis_turns_fake_calls_into_runtime_errors() {
        let (mut screen, handle) = MockScreen::single_1080p();
        handle.set_fail_synthesis(true);
        assert!(matches!(
            screen.fake_key(KeyButton(30), true, 0),
            Err(ScreenError::Runtime(_))
        ));
        assert!(handle.keystrokes().is_empty());
    }

    #[test]
    fn test_clipboard_set_then_get_round_trips() {
        let (mut screen, _) = MockScreen::single_1080p();
        let data = ClipboardData::from_text("hello");
        screen
            .set_clipboard(ClipboardId::Clipboard, &data)
            .expect("set");
        assert_eq!(screen.get_clipboard(ClipboardId::Clipboard).unwrap(), data);
    }
}
