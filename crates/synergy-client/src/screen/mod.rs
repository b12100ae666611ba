//! The screen capability interface.
//!
//! A screen driver owns the local display: it reports geometry, synthesizes
//! input, talks to the clipboard, and watches the screensaver.  Platform
//! implementations (SendInput on Windows, XTest on X11, CoreGraphics on
//! macOS) live behind this trait; the client core only ever sees the trait.
//!
//! Drivers that pump native events on their own thread marshal everything
//! back through the event queue: they are handed a queue handle and the
//! client's token at construction and post `ClipboardGrabbed`,
//! `ScreensaverChanged`, `KeymapChanged`, and `ScreenError` events.

pub mod mock;

use thiserror::Error;

use synergy_core::protocol::messages::MouseButton;
use synergy_core::protocol::{ClipboardData, ClipboardId};
use synergy_core::{KeyButton, KeyMap, ModifierMask, ScreenInfo};

/// Errors raised by a screen driver.
#[derive(Debug, Error)]
pub enum ScreenError {
    /// The display could not be opened at all.  Fatal: exit code 4.
    #[error("cannot open screen: {0}")]
    OpenFailure(String),

    /// The display exists but is not currently usable (e.g. X server
    /// restarting).  Retryable after `retry_in` seconds.
    #[error("screen unavailable: {detail}")]
    Unavailable { detail: String, retry_in: f64 },

    /// A synthesis call failed at runtime.  Ends the session.
    #[error("screen runtime error: {0}")]
    Runtime(String),
}

/// Pixel geometry of the local screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenShape {
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
    /// Whether the driver can warp the cursor.
    pub warp_capable: bool,
    /// Jump-zone size reported to the server.
    pub zone: i16,
}

impl ScreenShape {
    /// Center of the screen, where the cursor parks while inactive.
    pub fn center(&self) -> (i16, i16) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// The `DINF` report for this shape.
    pub fn info(&self) -> ScreenInfo {
        let (mx, my) = self.center();
        ScreenInfo {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            zone: self.zone,
            mx,
            my,
        }
    }
}

/// Capability set the client consumes.
pub trait Screen {
    fn shape(&self) -> ScreenShape;

    fn cursor_pos(&self) -> (i16, i16);

    /// Makes this screen the active input sink: warp the cursor to `(x, y)`
    /// and prepare to synthesize.
    fn enter(
        &mut self,
        x: i16,
        y: i16,
        mask: ModifierMask,
        for_screensaver: bool,
    ) -> Result<(), ScreenError>;

    /// Stops being the active sink.  Returning `false` blocks the server-side
    /// leave.
    fn leave(&mut self) -> bool;

    fn fake_mouse_move(&mut self, x: i16, y: i16) -> Result<(), ScreenError>;

    fn fake_mouse_rel_move(&mut self, dx: i16, dy: i16) -> Result<(), ScreenError>;

    fn fake_mouse_button(&mut self, button: MouseButton, press: bool) -> Result<(), ScreenError>;

    fn fake_mouse_wheel(&mut self, dx: i32, dy: i32) -> Result<(), ScreenError>;

    /// Synthesizes one keystroke.  `repeat` is non-zero when the platform
    /// should use native auto-repeat for that many repetitions.
    fn fake_key(&mut self, button: KeyButton, press: bool, repeat: u16) -> Result<(), ScreenError>;

    fn set_clipboard(&mut self, id: ClipboardId, data: &ClipboardData) -> Result<(), ScreenError>;

    fn get_clipboard(&self, id: ClipboardId) -> Result<ClipboardData, ScreenError>;

    fn set_screensaver(&mut self, active: bool) -> Result<(), ScreenError>;

    /// The key map for the current layout.  Re-fetched whenever the driver
    /// posts a `KeymapChanged` event.
    fn key_map(&self) -> KeyMap;
}
