//! All Synergy protocol message types.
//!
//! Every message on the wire is identified by a 4-byte ASCII tag (`CNOP`,
//! `DMMV`, …).  The one exception is the greeting, whose payload begins with
//! the literal string `Synergy` followed by the protocol version.  The tag is
//! the identity: two messages with the same tag always share a field layout.

use crate::keymap::{KeyButton, KeyId, ModifierMask};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol version this client implements.
pub const PROTOCOL_MAJOR: u16 = 1;
pub const PROTOCOL_MINOR: u16 = 6;

/// Default TCP port for a Synergy server.
pub const DEFAULT_PORT: u16 = 24800;

/// The literal prefix of the greeting payload.
pub const GREETING_PREFIX: &[u8] = b"Synergy";

// ── Message tags ──────────────────────────────────────────────────────────────

pub const TAG_INFO_ACK: &[u8; 4] = b"CIAK";
pub const TAG_KEEP_ALIVE: &[u8; 4] = b"CALV";
pub const TAG_RESET_OPTIONS: &[u8; 4] = b"CROP";
pub const TAG_SET_OPTIONS: &[u8; 4] = b"COPT";
pub const TAG_ENTER: &[u8; 4] = b"CINN";
pub const TAG_LEAVE: &[u8; 4] = b"COUT";
pub const TAG_GRAB_CLIPBOARD: &[u8; 4] = b"CCLP";
pub const TAG_CLOSE: &[u8; 4] = b"CBYE";
pub const TAG_NOOP: &[u8; 4] = b"CNOP";
pub const TAG_KEY_DOWN: &[u8; 4] = b"DKDN";
pub const TAG_KEY_REPEAT: &[u8; 4] = b"DKRP";
pub const TAG_KEY_UP: &[u8; 4] = b"DKUP";
pub const TAG_MOUSE_DOWN: &[u8; 4] = b"DMDN";
pub const TAG_MOUSE_UP: &[u8; 4] = b"DMUP";
pub const TAG_MOUSE_MOVE: &[u8; 4] = b"DMMV";
pub const TAG_MOUSE_REL_MOVE: &[u8; 4] = b"DMRM";
pub const TAG_MOUSE_WHEEL: &[u8; 4] = b"DMWM";
pub const TAG_CLIPBOARD_DATA: &[u8; 4] = b"DCLP";
pub const TAG_SCREENSAVER: &[u8; 4] = b"DSOP";
pub const TAG_QUERY_INFO: &[u8; 4] = b"QINF";
pub const TAG_INFO: &[u8; 4] = b"DINF";

// ── Option codes ──────────────────────────────────────────────────────────────

/// An option id is a 4-character code packed big-endian into a u32.
pub type OptionId = u32;

/// Packs a 4-character option code into its wire representation.
pub const fn option_code(code: &[u8; 4]) -> OptionId {
    ((code[0] as u32) << 24) | ((code[1] as u32) << 16) | ((code[2] as u32) << 8) | (code[3] as u32)
}

/// Milliseconds between client-initiated keep-alives; 0 disables.
pub const OPTION_HEARTBEAT: OptionId = option_code(b"HART");
/// Mirror the server's screensaver state on this screen.
pub const OPTION_SCREENSAVER_SYNC: OptionId = option_code(b"SSVR");
/// Deliver mouse motion as relative deltas instead of absolute positions.
pub const OPTION_RELATIVE_MOUSE_MOVES: OptionId = option_code(b"MDLT");
/// Caps lock is a half-duplex (toggle-on-press) key on this screen.
pub const OPTION_HALF_DUPLEX_CAPS_LOCK: OptionId = option_code(b"HDCL");
/// Num lock is a half-duplex key on this screen.
pub const OPTION_HALF_DUPLEX_NUM_LOCK: OptionId = option_code(b"HDNL");
/// Scroll lock is a half-duplex key on this screen.
pub const OPTION_HALF_DUPLEX_SCROLL_LOCK: OptionId = option_code(b"HDSL");

// ── Clipboard types ───────────────────────────────────────────────────────────

/// The two clipboard slots a screen exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClipboardId {
    /// The X11 primary selection (middle-click paste).
    Primary = 0,
    /// The ordinary copy/paste clipboard.
    Clipboard = 1,
}

impl ClipboardId {
    pub const ALL: [ClipboardId; 2] = [ClipboardId::Primary, ClipboardId::Clipboard];
}

impl TryFrom<u8> for ClipboardId {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ClipboardId::Primary),
            1 => Ok(ClipboardId::Clipboard),
            _ => Err(()),
        }
    }
}

/// One chunk of a clipboard transfer.
///
/// A transfer is exactly one `Start`, any number of `Data` chunks, and one
/// `End`; any other pattern aborts the slot on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardChunk {
    /// Declares the total assembled payload size in bytes.
    Start { total: u32 },
    /// A slice of the assembled payload.
    Data(Vec<u8>),
    /// Finalizes the transfer.
    End,
}

impl ClipboardChunk {
    pub const KIND_START: u8 = 1;
    pub const KIND_DATA: u8 = 2;
    pub const KIND_END: u8 = 3;
}

// ── Mouse buttons ─────────────────────────────────────────────────────────────

/// Mouse button identifier as carried by `DMDN`/`DMUP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MouseButton {
    Left = 1,
    Middle = 2,
    Right = 3,
    Extra0 = 4,
    Extra1 = 5,
}

impl TryFrom<u8> for MouseButton {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MouseButton::Left),
            2 => Ok(MouseButton::Middle),
            3 => Ok(MouseButton::Right),
            4 => Ok(MouseButton::Extra0),
            5 => Ok(MouseButton::Extra1),
            _ => Err(()),
        }
    }
}

// ── Screen info ───────────────────────────────────────────────────────────────

/// Screen geometry report carried by `DINF`.
///
/// All fields are signed 16-bit on the wire.  `mx`/`my` is the position the
/// server should park the cursor at when this screen is not active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenInfo {
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
    /// Size of the jump zone at the screen edges, in pixels.
    pub zone: i16,
    pub mx: i16,
    pub my: i16,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All Synergy messages this client can read or write.
///
/// Directionality is by convention, not enforced by the codec: `Hello`,
/// `NoOp`, `Close`, `KeepAlive`, `Info`, `GrabClipboard`, and `ClipboardData`
/// flow client→server; everything is accepted server→client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Greeting, both directions: `"Synergy"` + major + minor.
    Hello { major: u16, minor: u16 },
    /// `CIAK`: server acknowledges a `DINF`.
    InfoAck,
    /// `CALV`: keep-alive; peers respond with `CNOP`.
    KeepAlive,
    /// `CROP`: reset all options to defaults.
    ResetOptions,
    /// `COPT`: option id/value pairs.
    SetOptions(Vec<(OptionId, u32)>),
    /// `CINN`: cursor entered this screen.
    Enter {
        x: i16,
        y: i16,
        seq: u32,
        mask: ModifierMask,
        for_screensaver: bool,
    },
    /// `COUT`: cursor left this screen.
    Leave,
    /// `CCLP`: the clipboard with this id was grabbed on the sending side.
    GrabClipboard { id: ClipboardId, seq: u32 },
    /// `CBYE`: orderly close.
    Close,
    /// `CNOP`: no operation.
    NoOp,
    /// `DKDN`: key press.
    KeyDown {
        id: KeyId,
        mask: ModifierMask,
        button: KeyButton,
    },
    /// `DKRP`: key auto-repeat.
    KeyRepeat {
        id: KeyId,
        mask: ModifierMask,
        count: u16,
        button: KeyButton,
    },
    /// `DKUP`: key release.
    KeyUp {
        id: KeyId,
        mask: ModifierMask,
        button: KeyButton,
    },
    /// `DMDN`: mouse button press.
    MouseDown { button: MouseButton },
    /// `DMUP`: mouse button release.
    MouseUp { button: MouseButton },
    /// `DMMV`: absolute cursor move.
    MouseMove { x: i16, y: i16 },
    /// `DMRM`: relative cursor move.
    MouseRelMove { dx: i16, dy: i16 },
    /// `DMWM`: mouse wheel; deltas are multiples of 120 per notch.
    MouseWheel { dx: i16, dy: i16 },
    /// `DCLP`: one chunk of clipboard data for a slot.
    ClipboardData {
        id: ClipboardId,
        seq: u32,
        chunk: ClipboardChunk,
    },
    /// `DSOP`: server screensaver started or stopped.
    Screensaver { on: bool },
    /// `QINF`: server requests a fresh `DINF`.
    QueryInfo,
    /// `DINF`: screen geometry report.
    Info(ScreenInfo),
}

impl Message {
    /// Returns the 4-byte wire tag, or `None` for the greeting (whose payload
    /// starts with [`GREETING_PREFIX`] instead of a tag).
    pub fn tag(&self) -> Option<&'static [u8; 4]> {
        match self {
            Message::Hello { .. } => None,
            Message::InfoAck => Some(TAG_INFO_ACK),
            Message::KeepAlive => Some(TAG_KEEP_ALIVE),
            Message::ResetOptions => Some(TAG_RESET_OPTIONS),
            Message::SetOptions(_) => Some(TAG_SET_OPTIONS),
            Message::Enter { .. } => Some(TAG_ENTER),
            Message::Leave => Some(TAG_LEAVE),
            Message::GrabClipboard { .. } => Some(TAG_GRAB_CLIPBOARD),
            Message::Close => Some(TAG_CLOSE),
            Message::NoOp => Some(TAG_NOOP),
            Message::KeyDown { .. } => Some(TAG_KEY_DOWN),
            Message::KeyRepeat { .. } => Some(TAG_KEY_REPEAT),
            Message::KeyUp { .. } => Some(TAG_KEY_UP),
            Message::MouseDown { .. } => Some(TAG_MOUSE_DOWN),
            Message::MouseUp { .. } => Some(TAG_MOUSE_UP),
            Message::MouseMove { .. } => Some(TAG_MOUSE_MOVE),
            Message::MouseRelMove { .. } => Some(TAG_MOUSE_REL_MOVE),
            Message::MouseWheel { .. } => Some(TAG_MOUSE_WHEEL),
            Message::ClipboardData { .. } => Some(TAG_CLIPBOARD_DATA),
            Message::Screensaver { .. } => Some(TAG_SCREENSAVER),
            Message::QueryInfo => Some(TAG_QUERY_INFO),
            Message::Info(_) => Some(TAG_INFO),
        }
    }

    /// The greeting this client sends: protocol 1.6.
    pub fn own_hello() -> Message {
        Message::Hello {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
        }
    }
}
