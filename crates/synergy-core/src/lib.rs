//! # synergy-core
//!
//! Shared library for the Synergy client containing the wire protocol codec,
//! the key mapping engine, and the event queue.  It has zero dependencies on
//! OS APIs, UI frameworks, or network sockets.
//!
//! Synergy shares one keyboard and mouse across machines: the server owns the
//! physical input devices and forwards input, clipboard, and screensaver
//! events over TCP; each client synthesizes them on its local display.  This
//! crate defines:
//!
//! - **`protocol`** – how bytes travel over the network: length-prefixed
//!   frames with 4-byte ASCII tags, the message set, clipboard marshalling
//!   and chunk reassembly, and inbound sequence filtering.
//!
//! - **`keymap`** – key identity types, the layout-derived key map, and the
//!   key-state engine that turns server key events into local keystroke
//!   programs.
//!
//! - **`event`** – the single-threaded cooperative event queue, timers, and
//!   the token-keyed dispatcher everything else hangs off.

pub mod event;
pub mod keymap;
pub mod protocol;

pub use event::{Dispatcher, Event, EventKind, EventPayload, EventQueue, HandlerRegistry, Token};
pub use keymap::engine::{KeyMappingError, KeyStateEngine, Keystroke, KeystrokeProgram};
pub use keymap::{KeyButton, KeyId, KeyMap, KeyMapEntry, ModifierMask};
pub use protocol::{
    decode_payload, encode_frame, encode_payload, ClipboardData, ClipboardFormat, FrameReader,
    Message, ProtocolError, ScreenInfo, SequenceFilter,
};
